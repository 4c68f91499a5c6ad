use serde::{Deserialize, Serialize};

use super::{required_attr, XmlMessage};
use crate::error::Result;
use crate::return_code::EbicsReturnCode;
use crate::xml::{Document, Element, H000_NS};

/// Asks the bank which protocol versions it speaks. Sent before anything else, unsigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevRequest {
    pub host_id: String,
}

impl XmlMessage for HevRequest {
    fn to_document(&self) -> Document {
        Document::new(
            Element::new("ebicsHEVRequest")
                .with_namespace(None, H000_NS)
                .with_child(Element::text_element("HostID", self.host_id.as_str())),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(H000_NS, "ebicsHEVRequest")?;
        let mut cursor = root.cursor();
        let host_id = cursor.required_text("HostID")?;
        cursor.finish()?;
        Ok(HevRequest { host_id })
    }
}

/// `<VersionNumber ProtocolVersion="H004">02.50</VersionNumber>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    pub protocol: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevResponse {
    pub return_code: EbicsReturnCode,
    pub report_text: String,
    pub versions: Vec<VersionSpec>,
}

impl HevResponse {
    pub fn new(versions: Vec<VersionSpec>) -> Self {
        HevResponse {
            return_code: EbicsReturnCode::Ok,
            report_text: EbicsReturnCode::Ok.report_text(),
            versions,
        }
    }

    pub fn error(code: EbicsReturnCode) -> Self {
        HevResponse {
            return_code: code,
            report_text: code.report_text(),
            versions: Vec::new(),
        }
    }
}

impl XmlMessage for HevResponse {
    fn to_document(&self) -> Document {
        Document::new(
            Element::new("ebicsHEVResponse")
                .with_namespace(None, H000_NS)
                .with_child(
                    Element::new("SystemReturnCode")
                        .with_child(Element::text_element("ReturnCode", self.return_code.code()))
                        .with_child(Element::text_element("ReportText", self.report_text.as_str())),
                )
                .with_children(self.versions.iter().map(|v| {
                    Element::text_element("VersionNumber", v.version.as_str())
                        .with_attr("ProtocolVersion", v.protocol.as_str())
                })),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = document.expect_root(H000_NS, "ebicsHEVResponse")?;
        let mut cursor = root.cursor();
        let mut system_cursor = cursor.required("SystemReturnCode")?.cursor();
        let return_code = EbicsReturnCode::lookup(&system_cursor.required_text("ReturnCode")?)?;
        let report_text = system_cursor.required_text("ReportText")?;
        system_cursor.finish()?;

        let versions = cursor
            .repeated("VersionNumber")
            .into_iter()
            .map(|v| {
                Ok(VersionSpec {
                    protocol: required_attr(v, "ProtocolVersion")?.to_string(),
                    version: v.trimmed_text(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        cursor.finish()?;

        Ok(HevResponse {
            return_code,
            report_text,
            versions,
        })
    }
}
