//! Typed EBICS H004 messages.
//!
//! Every message is a plain struct with an explicit encoder and decoder. Element order is
//! part of the wire contract (it is what the signature digest is computed over), so the
//! encoders emit elements exactly in the schema's sequence order and the decoders reject
//! anything else with [`EbicsError::InvalidXml`].

mod hev;
mod key_management;
mod order_data;
mod request;
mod response;

#[cfg(test)]
mod test_messages;

pub use hev::{HevRequest, HevResponse, VersionSpec};
pub use key_management::{
    parse_order_data, EbicsKeyManagementResponse, EbicsNoPubKeyDigestsRequest, EbicsUnsecuredRequest,
};
pub use order_data::{
    AccountInfo, AddressInfo, HiaRequestOrderData, HkdResponseOrderData, HpbResponseOrderData,
    HtdResponseOrderData, OrderInfo, OrderSignatureData, PartnerInfo, Permission, PubKeyValue,
    SignaturePubKeyOrderData, UserInfo, UserSignatureData,
};
pub use request::{EbicsRequest, RequestBody, RequestDataTransfer, RequestMutableHeader, RequestStaticHeader};
pub use response::{EbicsResponse, ResponseDataTransfer};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};

use crate::codec::{base64_decode, base64_encode};
use crate::error::{EbicsError, Result};
use crate::xml::{Document, Element, DSIG_NS, H004_NS};

pub const PROTOCOL_VERSION: &str = "H004";
pub const PROTOCOL_REVISION: &str = "1";

pub const SIGNATURE_VERSION_A006: &str = "A006";
pub const AUTHENTICATION_VERSION_X002: &str = "X002";
pub const ENCRYPTION_VERSION_E002: &str = "E002";
pub const DIGEST_ALGORITHM_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Order attribute of download requests and key management downloads (HPB).
pub const ORDER_ATTRIBUTE_DOWNLOAD: &str = "DZHNN";
/// Order data and electronic signature.
pub const ORDER_ATTRIBUTE_UPLOAD: &str = "OZHNN";
/// Unsigned key management uploads (INI, HIA).
pub const ORDER_ATTRIBUTE_UNSECURED: &str = "DZNNN";
pub const SECURITY_MEDIUM_UNSPECIFIED: &str = "0000";

/// Conversion between a typed message and its XML document.
pub trait XmlMessage: Sized {
    fn to_document(&self) -> Document;

    fn from_document(document: &Document) -> Result<Self>;

    fn to_xml(&self) -> String {
        self.to_document().to_xml()
    }

    fn from_xml(xml: &str) -> Result<Self> {
        Self::from_document(&Document::parse(xml)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Initialisation,
    Transfer,
    Receipt,
}

impl TransactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionPhase::Initialisation => "Initialisation",
            TransactionPhase::Transfer => "Transfer",
            TransactionPhase::Receipt => "Receipt",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "Initialisation" => Ok(TransactionPhase::Initialisation),
            "Transfer" => Ok(TransactionPhase::Transfer),
            "Receipt" => Ok(TransactionPhase::Receipt),
            other => Err(invalid(format!("unknown transaction phase '{other}'"))),
        }
    }
}

/// 1-based segment number plus the `lastSegment` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentNumber {
    pub number: u32,
    pub last_segment: bool,
}

impl SegmentNumber {
    pub fn new(number: u32, num_segments: u32) -> Self {
        SegmentNumber {
            number,
            last_segment: number >= num_segments,
        }
    }

    fn to_element(self) -> Element {
        Element::text_element("SegmentNumber", self.number.to_string())
            .with_attr("lastSegment", bool_str(self.last_segment))
    }

    fn from_element(element: &Element) -> Result<Self> {
        Ok(SegmentNumber {
            number: parse_number(&element.trimmed_text(), "SegmentNumber")?,
            last_segment: parse_bool(element.attr("lastSegment").unwrap_or("false"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderParams {
    Standard { date_range: Option<DateRange> },
    Generic(Vec<(String, String)>),
}

impl OrderParams {
    fn to_element(&self) -> Element {
        match self {
            OrderParams::Standard { date_range } => Element::new("StandardOrderParams").with_opt_child(
                date_range.as_ref().map(|range| {
                    Element::new("DateRange")
                        .with_child(Element::text_element("Start", format_date(range.start)))
                        .with_child(Element::text_element("End", format_date(range.end)))
                }),
            ),
            OrderParams::Generic(params) => Element::new("GenericOrderParams").with_children(
                params.iter().map(|(name, value)| {
                    Element::new("Parameter")
                        .with_child(Element::text_element("Name", name.as_str()))
                        .with_child(Element::text_element("Value", value.as_str()).with_attr("Type", "string"))
                }),
            ),
        }
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let params = match element.name.as_str() {
            "StandardOrderParams" => {
                let date_range = match cursor.optional("DateRange") {
                    Some(range) => {
                        let mut range_cursor = range.cursor();
                        let start = parse_date(&range_cursor.required_text("Start")?)?;
                        let end = parse_date(&range_cursor.required_text("End")?)?;
                        range_cursor.finish()?;
                        Some(DateRange { start, end })
                    }
                    None => None,
                };
                OrderParams::Standard { date_range }
            }
            "GenericOrderParams" => {
                let mut params = Vec::new();
                for parameter in cursor.repeated("Parameter") {
                    let mut parameter_cursor = parameter.cursor();
                    let name = parameter_cursor.required_text("Name")?;
                    let value = parameter_cursor.required_text("Value")?;
                    parameter_cursor.finish()?;
                    params.push((name, value));
                }
                OrderParams::Generic(params)
            }
            other => return Err(invalid(format!("unsupported order params <{other}>"))),
        };
        cursor.finish()?;
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub order_type: String,
    pub order_id: Option<String>,
    pub order_attribute: String,
    pub params: Option<OrderParams>,
}

impl OrderDetails {
    pub fn new(order_type: &str, order_attribute: &str, params: Option<OrderParams>) -> Self {
        OrderDetails {
            order_type: order_type.to_string(),
            order_id: None,
            order_attribute: order_attribute.to_string(),
            params,
        }
    }

    fn to_element(&self) -> Element {
        Element::new("OrderDetails")
            .with_child(Element::text_element("OrderType", self.order_type.as_str()))
            .with_opt_child(self.order_id.as_deref().map(|id| Element::text_element("OrderID", id)))
            .with_child(Element::text_element("OrderAttribute", self.order_attribute.as_str()))
            .with_opt_child(self.params.as_ref().map(OrderParams::to_element))
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let order_type = cursor.required_text("OrderType")?;
        let order_id = cursor.optional_text("OrderID");
        let order_attribute = cursor.required_text("OrderAttribute")?;
        let params = match cursor
            .optional("StandardOrderParams")
            .or_else(|| cursor.optional("GenericOrderParams"))
        {
            Some(params) => Some(OrderParams::from_element(params)?),
            None => None,
        };
        cursor.finish()?;
        Ok(OrderDetails {
            order_type,
            order_id,
            order_attribute,
            params,
        })
    }
}

/// `<Authentication Version="X002" Algorithm="...sha256">` and its `Encryption` sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubKeyDigest {
    pub version: String,
    pub digest: Vec<u8>,
}

impl PubKeyDigest {
    fn to_element(&self, name: &str) -> Element {
        Element::text_element(name, base64_encode(&self.digest))
            .with_attr("Version", self.version.as_str())
            .with_attr("Algorithm", DIGEST_ALGORITHM_SHA256)
    }

    fn from_element(element: &Element) -> Result<Self> {
        let algorithm = required_attr(element, "Algorithm")?;
        if algorithm != DIGEST_ALGORITHM_SHA256 {
            return Err(invalid(format!("unsupported digest algorithm {algorithm}")));
        }
        Ok(PubKeyDigest {
            version: required_attr(element, "Version")?.to_string(),
            digest: base64_decode(&element.text())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankPubKeyDigests {
    pub authentication: PubKeyDigest,
    pub encryption: PubKeyDigest,
}

impl BankPubKeyDigests {
    pub fn new(authentication: [u8; 32], encryption: [u8; 32]) -> Self {
        BankPubKeyDigests {
            authentication: PubKeyDigest {
                version: AUTHENTICATION_VERSION_X002.to_string(),
                digest: authentication.to_vec(),
            },
            encryption: PubKeyDigest {
                version: ENCRYPTION_VERSION_E002.to_string(),
                digest: encryption.to_vec(),
            },
        }
    }

    fn to_element(&self) -> Element {
        Element::new("BankPubKeyDigests")
            .with_child(self.authentication.to_element("Authentication"))
            .with_child(self.encryption.to_element("Encryption"))
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let authentication = PubKeyDigest::from_element(cursor.required("Authentication")?)?;
        let encryption = PubKeyDigest::from_element(cursor.required("Encryption")?)?;
        cursor.finish()?;
        Ok(BankPubKeyDigests {
            authentication,
            encryption,
        })
    }
}

/// Binds a transaction to the encryption key its transaction key was wrapped with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEncryptionInfo {
    pub encryption_pub_key_digest: Vec<u8>,
    pub transaction_key: Vec<u8>,
}

impl DataEncryptionInfo {
    pub fn new(pub_key_digest: &[u8], encrypted_transaction_key: &[u8]) -> Self {
        DataEncryptionInfo {
            encryption_pub_key_digest: pub_key_digest.to_vec(),
            transaction_key: encrypted_transaction_key.to_vec(),
        }
    }

    fn to_element(&self) -> Element {
        authenticated("DataEncryptionInfo")
            .with_child(
                PubKeyDigest {
                    version: ENCRYPTION_VERSION_E002.to_string(),
                    digest: self.encryption_pub_key_digest.clone(),
                }
                .to_element("EncryptionPubKeyDigest"),
            )
            .with_child(Element::text_element("TransactionKey", base64_encode(&self.transaction_key)))
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = check_authenticated(element)?.cursor();
        let digest = PubKeyDigest::from_element(cursor.required("EncryptionPubKeyDigest")?)?;
        if digest.version != ENCRYPTION_VERSION_E002 {
            return Err(invalid(format!("unsupported encryption version {}", digest.version)));
        }
        let transaction_key = base64_decode(&cursor.required_text("TransactionKey")?)?;
        cursor.finish()?;
        Ok(DataEncryptionInfo {
            encryption_pub_key_digest: digest.digest,
            transaction_key,
        })
    }
}

/// `<Product Language="en">...</Product>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub language: String,
    pub name: String,
}

impl Product {
    fn to_element(&self) -> Element {
        Element::text_element("Product", self.name.as_str()).with_attr("Language", self.language.as_str())
    }

    fn from_element(element: &Element) -> Self {
        Product {
            language: element.attr("Language").unwrap_or("en").to_string(),
            name: element.trimmed_text(),
        }
    }
}

fn invalid(message: impl Into<String>) -> EbicsError {
    EbicsError::InvalidXml(message.into())
}

fn required_attr<'a>(element: &'a Element, name: &str) -> Result<&'a str> {
    element
        .attr(name)
        .ok_or_else(|| invalid(format!("<{}> misses attribute {name}", element.name)))
}

/// Root element of the H004 envelopes, with the `ds` prefix declared for the signature.
fn envelope(name: &str) -> Element {
    Element::new(name)
        .with_namespace(None, H004_NS)
        .with_namespace(Some("ds"), DSIG_NS)
        .with_attr("Version", PROTOCOL_VERSION)
        .with_attr("Revision", PROTOCOL_REVISION)
}

fn check_envelope<'a>(document: &'a Document, name: &str) -> Result<&'a Element> {
    let root = document.expect_root(H004_NS, name)?;
    match root.attr("Version") {
        Some(PROTOCOL_VERSION) => Ok(root),
        other => Err(invalid(format!("unsupported protocol version {other:?}"))),
    }
}

fn authenticated(name: &str) -> Element {
    Element::new(name).with_attr("authenticate", "true")
}

/// Elements covered by the AuthSignature must say so.
fn check_authenticated(element: &Element) -> Result<&Element> {
    match element.attr("authenticate") {
        Some("true") => Ok(element),
        _ => Err(invalid(format!("<{}> lacks authenticate=\"true\"", element.name))),
    }
}

fn text_opt(name: &str, value: Option<&str>) -> Option<Element> {
    value.map(|v| Element::text_element(name, v))
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(invalid(format!("'{other}' is not a boolean"))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{what} '{value}' is not a number")))
}

/// The current time, truncated to what survives a round trip through the wire format.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// `xs:dateTime`; values without a zone are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|t| t.and_utc()))
        .map_err(|_| invalid(format!("'{value}' is not a timestamp")))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| invalid(format!("'{value}' is not a date")))
}
