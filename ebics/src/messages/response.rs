use chrono::{DateTime, Utc};

use super::{
    authenticated, check_authenticated, check_envelope, envelope, format_timestamp, parse_number, parse_timestamp, text_opt,
    DataEncryptionInfo, SegmentNumber, TransactionPhase, XmlMessage,
};
use crate::error::Result;
use crate::return_code::EbicsReturnCode;
use crate::xml::{Document, Element};

/// `body/DataTransfer` of responses carrying order data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDataTransfer {
    pub data_encryption_info: Option<DataEncryptionInfo>,
    pub order_data: String,
}

impl ResponseDataTransfer {
    pub(super) fn to_element(&self) -> Element {
        Element::new("DataTransfer")
            .with_opt_child(self.data_encryption_info.as_ref().map(DataEncryptionInfo::to_element))
            .with_child(Element::text_element("OrderData", self.order_data.as_str()))
    }

    pub(super) fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let data_encryption_info = match cursor.optional("DataEncryptionInfo") {
            Some(info) => Some(DataEncryptionInfo::from_element(info)?),
            None => None,
        };
        let order_data = cursor.required_text("OrderData")?;
        cursor.finish()?;
        Ok(ResponseDataTransfer {
            data_encryption_info,
            order_data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbicsResponse {
    pub transaction_id: Option<String>,
    pub num_segments: Option<u32>,
    pub phase: TransactionPhase,
    pub segment_number: Option<SegmentNumber>,
    pub order_id: Option<String>,
    pub technical_return_code: EbicsReturnCode,
    pub report_text: String,
    pub data_transfer: Option<ResponseDataTransfer>,
    pub bank_return_code: EbicsReturnCode,
    pub timestamp_bank_parameter: Option<DateTime<Utc>>,
}

impl EbicsResponse {
    fn new(phase: TransactionPhase, technical: EbicsReturnCode) -> Self {
        EbicsResponse {
            transaction_id: None,
            num_segments: None,
            phase,
            segment_number: None,
            order_id: None,
            technical_return_code: technical,
            report_text: technical.report_text(),
            data_transfer: None,
            bank_return_code: EbicsReturnCode::Ok,
            timestamp_bank_parameter: None,
        }
    }

    /// First segment of a download, with the key needed to decrypt all of them.
    pub fn download_initialisation(
        transaction_id: &str,
        num_segments: u32,
        encryption_info: DataEncryptionInfo,
        first_segment: String,
    ) -> Self {
        EbicsResponse {
            transaction_id: Some(transaction_id.to_string()),
            num_segments: Some(num_segments),
            segment_number: Some(SegmentNumber::new(1, num_segments)),
            data_transfer: Some(ResponseDataTransfer {
                data_encryption_info: Some(encryption_info),
                order_data: first_segment,
            }),
            ..Self::new(TransactionPhase::Initialisation, EbicsReturnCode::Ok)
        }
    }

    pub fn download_transfer(transaction_id: &str, segment: u32, num_segments: u32, order_data: String) -> Self {
        EbicsResponse {
            transaction_id: Some(transaction_id.to_string()),
            segment_number: Some(SegmentNumber::new(segment, num_segments)),
            data_transfer: Some(ResponseDataTransfer {
                data_encryption_info: None,
                order_data,
            }),
            ..Self::new(TransactionPhase::Transfer, EbicsReturnCode::Ok)
        }
    }

    /// Answer to a download receipt, `DownloadPostprocessDone` or `DownloadPostprocessSkipped`.
    pub fn receipt(transaction_id: &str, code: EbicsReturnCode) -> Self {
        EbicsResponse {
            transaction_id: Some(transaction_id.to_string()),
            ..Self::new(TransactionPhase::Receipt, code)
        }
    }

    pub fn upload_initialisation(transaction_id: &str, order_id: &str) -> Self {
        EbicsResponse {
            transaction_id: Some(transaction_id.to_string()),
            order_id: Some(order_id.to_string()),
            ..Self::new(TransactionPhase::Initialisation, EbicsReturnCode::Ok)
        }
    }

    pub fn upload_transfer(transaction_id: &str, segment: u32, num_segments: u32, order_id: Option<&str>) -> Self {
        EbicsResponse {
            transaction_id: Some(transaction_id.to_string()),
            segment_number: Some(SegmentNumber::new(segment, num_segments)),
            order_id: order_id.map(str::to_string),
            ..Self::new(TransactionPhase::Transfer, EbicsReturnCode::Ok)
        }
    }

    /// Technical error for the given phase, without order data.
    pub fn technical_error(
        phase: TransactionPhase,
        transaction_id: Option<&str>,
        code: EbicsReturnCode,
        report_text: String,
    ) -> Self {
        EbicsResponse {
            transaction_id: transaction_id.map(str::to_string),
            report_text,
            ..Self::new(phase, code)
        }
    }

    /// Technically fine, but the bank declined the order.
    pub fn bank_error(phase: TransactionPhase, transaction_id: Option<&str>, code: EbicsReturnCode) -> Self {
        EbicsResponse {
            transaction_id: transaction_id.map(str::to_string),
            bank_return_code: code,
            ..Self::new(phase, EbicsReturnCode::Ok)
        }
    }
}

impl XmlMessage for EbicsResponse {
    fn to_document(&self) -> Document {
        let static_header = Element::new("static")
            .with_opt_child(text_opt("TransactionID", self.transaction_id.as_deref()))
            .with_opt_child(
                self.num_segments
                    .map(|n| Element::text_element("NumSegments", n.to_string())),
            );
        let mutable = Element::new("mutable")
            .with_child(Element::text_element("TransactionPhase", self.phase.as_str()))
            .with_opt_child(self.segment_number.map(SegmentNumber::to_element))
            .with_opt_child(text_opt("OrderID", self.order_id.as_deref()))
            .with_child(Element::text_element("ReturnCode", self.technical_return_code.code()))
            .with_child(Element::text_element("ReportText", self.report_text.as_str()));

        let body = Element::new("body")
            .with_opt_child(self.data_transfer.as_ref().map(ResponseDataTransfer::to_element))
            .with_child(authenticated("ReturnCode").with_text(self.bank_return_code.code()))
            .with_opt_child(
                self.timestamp_bank_parameter
                    .map(|t| authenticated("TimestampBankParameter").with_text(format_timestamp(t))),
            );

        Document::new(
            envelope("ebicsResponse")
                .with_child(authenticated("header").with_child(static_header).with_child(mutable))
                .with_child(Element::new("AuthSignature"))
                .with_child(body),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = check_envelope(document, "ebicsResponse")?;
        let mut cursor = root.cursor();
        let header = check_authenticated(cursor.required("header")?)?;
        cursor.required("AuthSignature")?;
        let body = cursor.required("body")?;
        cursor.finish()?;

        let mut header_cursor = header.cursor();
        let static_header = header_cursor.required("static")?;
        let mutable = header_cursor.required("mutable")?;
        header_cursor.finish()?;

        let mut static_cursor = static_header.cursor();
        let transaction_id = static_cursor.optional_text("TransactionID");
        let num_segments = match static_cursor.optional_text("NumSegments") {
            Some(n) => Some(parse_number(&n, "NumSegments")?),
            None => None,
        };
        static_cursor.finish()?;

        let mut mutable_cursor = mutable.cursor();
        let phase = TransactionPhase::parse(&mutable_cursor.required_text("TransactionPhase")?)?;
        let segment_number = match mutable_cursor.optional("SegmentNumber") {
            Some(segment) => Some(SegmentNumber::from_element(segment)?),
            None => None,
        };
        let order_id = mutable_cursor.optional_text("OrderID");
        let technical_return_code = EbicsReturnCode::lookup(&mutable_cursor.required_text("ReturnCode")?)?;
        let report_text = mutable_cursor.required_text("ReportText")?;
        mutable_cursor.finish()?;

        let mut body_cursor = body.cursor();
        let data_transfer = match body_cursor.optional("DataTransfer") {
            Some(transfer) => Some(ResponseDataTransfer::from_element(transfer)?),
            None => None,
        };
        let bank_return_code =
            EbicsReturnCode::lookup(&check_authenticated(body_cursor.required("ReturnCode")?)?.trimmed_text())?;
        let timestamp_bank_parameter = match body_cursor.optional("TimestampBankParameter") {
            Some(t) => Some(parse_timestamp(&check_authenticated(t)?.trimmed_text())?),
            None => None,
        };
        body_cursor.finish()?;

        Ok(EbicsResponse {
            transaction_id,
            num_segments,
            phase,
            segment_number,
            order_id,
            technical_return_code,
            report_text,
            data_transfer,
            bank_return_code,
            timestamp_bank_parameter,
        })
    }
}
