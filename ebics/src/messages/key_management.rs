use chrono::{DateTime, Utc};

use super::{
    authenticated, check_authenticated, check_envelope, envelope, format_timestamp, invalid, now, parse_timestamp, text_opt,
    HiaRequestOrderData, OrderDetails, Product, ResponseDataTransfer, SignaturePubKeyOrderData, XmlMessage,
    ORDER_ATTRIBUTE_DOWNLOAD, ORDER_ATTRIBUTE_UNSECURED, SECURITY_MEDIUM_UNSPECIFIED,
};
use crate::codec::{base64_decode, base64_encode, compress, decompress, generate_nonce};
use crate::error::{EbicsError, Result};
use crate::return_code::EbicsReturnCode;
use crate::subscriber::SubscriberId;
use crate::xml::{Document, Element};

/// INI or HIA: order data in the clear (compressed only), no signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbicsUnsecuredRequest {
    pub host_id: String,
    pub partner_id: String,
    pub user_id: String,
    pub system_id: Option<String>,
    pub product: Option<Product>,
    pub order_details: OrderDetails,
    pub security_medium: String,
    /// base64 of the compressed order data document.
    pub order_data: String,
}

impl EbicsUnsecuredRequest {
    fn new(subscriber: &SubscriberId, product: Option<Product>, order_type: &str, document: &Document) -> Result<Self> {
        Ok(EbicsUnsecuredRequest {
            host_id: subscriber.host_id.clone(),
            partner_id: subscriber.partner_id.clone(),
            user_id: subscriber.user_id.clone(),
            system_id: subscriber.system_id.clone(),
            product,
            order_details: OrderDetails::new(order_type, ORDER_ATTRIBUTE_UNSECURED, None),
            security_medium: SECURITY_MEDIUM_UNSPECIFIED.to_string(),
            order_data: base64_encode(&compress(document.to_xml().as_bytes())?),
        })
    }

    pub fn ini(subscriber: &SubscriberId, product: Option<Product>, order_data: &SignaturePubKeyOrderData) -> Result<Self> {
        Self::new(subscriber, product, "INI", &order_data.to_document())
    }

    pub fn hia(subscriber: &SubscriberId, product: Option<Product>, order_data: &HiaRequestOrderData) -> Result<Self> {
        Self::new(subscriber, product, "HIA", &order_data.to_document())
    }

    pub fn order_type(&self) -> &str {
        &self.order_details.order_type
    }

    /// Decompresses and parses the carried order data as `T`.
    pub fn decode_order_data<T: XmlMessage>(&self) -> Result<T> {
        parse_order_data(&decompress(&base64_decode(&self.order_data)?)?)
    }
}

impl XmlMessage for EbicsUnsecuredRequest {
    fn to_document(&self) -> Document {
        let static_header = Element::new("static")
            .with_child(Element::text_element("HostID", self.host_id.as_str()))
            .with_child(Element::text_element("PartnerID", self.partner_id.as_str()))
            .with_child(Element::text_element("UserID", self.user_id.as_str()))
            .with_opt_child(text_opt("SystemID", self.system_id.as_deref()))
            .with_opt_child(self.product.as_ref().map(Product::to_element))
            .with_child(self.order_details.to_element())
            .with_child(Element::text_element("SecurityMedium", self.security_medium.as_str()));

        Document::new(
            envelope("ebicsUnsecuredRequest")
                .with_child(
                    authenticated("header")
                        .with_child(static_header)
                        .with_child(Element::new("mutable")),
                )
                .with_child(
                    Element::new("body").with_child(
                        Element::new("DataTransfer")
                            .with_child(Element::text_element("OrderData", self.order_data.as_str())),
                    ),
                ),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = check_envelope(document, "ebicsUnsecuredRequest")?;
        let mut cursor = root.cursor();
        let header = check_authenticated(cursor.required("header")?)?;
        let body = cursor.required("body")?;
        cursor.finish()?;

        let mut header_cursor = header.cursor();
        let static_header = header_cursor.required("static")?;
        header_cursor.required("mutable")?;
        header_cursor.finish()?;

        let mut static_cursor = static_header.cursor();
        let host_id = static_cursor.required_text("HostID")?;
        let partner_id = static_cursor.required_text("PartnerID")?;
        let user_id = static_cursor.required_text("UserID")?;
        let system_id = static_cursor.optional_text("SystemID");
        let product = static_cursor.optional("Product").map(Product::from_element);
        let order_details = OrderDetails::from_element(static_cursor.required("OrderDetails")?)?;
        let security_medium = static_cursor.required_text("SecurityMedium")?;
        static_cursor.finish()?;

        let mut body_cursor = body.cursor();
        let mut transfer_cursor = body_cursor.required("DataTransfer")?.cursor();
        let order_data = transfer_cursor.required_text("OrderData")?;
        transfer_cursor.finish()?;
        body_cursor.finish()?;

        Ok(EbicsUnsecuredRequest {
            host_id,
            partner_id,
            user_id,
            system_id,
            product,
            order_details,
            security_medium,
            order_data,
        })
    }
}

/// HPB: signed with the subscriber's X002 key, but sent before the bank keys are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbicsNoPubKeyDigestsRequest {
    pub host_id: String,
    pub nonce: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub partner_id: String,
    pub user_id: String,
    pub system_id: Option<String>,
    pub product: Option<Product>,
    pub order_details: OrderDetails,
    pub security_medium: String,
}

impl EbicsNoPubKeyDigestsRequest {
    pub fn hpb(subscriber: &SubscriberId, product: Option<Product>) -> Self {
        EbicsNoPubKeyDigestsRequest {
            host_id: subscriber.host_id.clone(),
            nonce: generate_nonce().to_vec(),
            timestamp: now(),
            partner_id: subscriber.partner_id.clone(),
            user_id: subscriber.user_id.clone(),
            system_id: subscriber.system_id.clone(),
            product,
            order_details: OrderDetails::new("HPB", ORDER_ATTRIBUTE_DOWNLOAD, None),
            security_medium: SECURITY_MEDIUM_UNSPECIFIED.to_string(),
        }
    }
}

impl XmlMessage for EbicsNoPubKeyDigestsRequest {
    fn to_document(&self) -> Document {
        let static_header = Element::new("static")
            .with_child(Element::text_element("HostID", self.host_id.as_str()))
            .with_child(Element::text_element("Nonce", hex::encode_upper(&self.nonce)))
            .with_child(Element::text_element("Timestamp", format_timestamp(self.timestamp)))
            .with_child(Element::text_element("PartnerID", self.partner_id.as_str()))
            .with_child(Element::text_element("UserID", self.user_id.as_str()))
            .with_opt_child(text_opt("SystemID", self.system_id.as_deref()))
            .with_opt_child(self.product.as_ref().map(Product::to_element))
            .with_child(self.order_details.to_element())
            .with_child(Element::text_element("SecurityMedium", self.security_medium.as_str()));

        Document::new(
            envelope("ebicsNoPubKeyDigestsRequest")
                .with_child(
                    authenticated("header")
                        .with_child(static_header)
                        .with_child(Element::new("mutable")),
                )
                .with_child(Element::new("AuthSignature"))
                .with_child(Element::new("body")),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = check_envelope(document, "ebicsNoPubKeyDigestsRequest")?;
        let mut cursor = root.cursor();
        let header = check_authenticated(cursor.required("header")?)?;
        cursor.required("AuthSignature")?;
        let body = cursor.required("body")?;
        cursor.finish()?;
        body.cursor().finish()?;

        let mut header_cursor = header.cursor();
        let static_header = header_cursor.required("static")?;
        header_cursor.required("mutable")?;
        header_cursor.finish()?;

        let mut static_cursor = static_header.cursor();
        let host_id = static_cursor.required_text("HostID")?;
        let nonce = hex::decode(static_cursor.required_text("Nonce")?).map_err(|e| invalid(format!("Nonce: {e}")))?;
        let timestamp = parse_timestamp(&static_cursor.required_text("Timestamp")?)?;
        let partner_id = static_cursor.required_text("PartnerID")?;
        let user_id = static_cursor.required_text("UserID")?;
        let system_id = static_cursor.optional_text("SystemID");
        let product = static_cursor.optional("Product").map(Product::from_element);
        let order_details = OrderDetails::from_element(static_cursor.required("OrderDetails")?)?;
        let security_medium = static_cursor.required_text("SecurityMedium")?;
        static_cursor.finish()?;

        Ok(EbicsNoPubKeyDigestsRequest {
            host_id,
            nonce,
            timestamp,
            partner_id,
            user_id,
            system_id,
            product,
            order_details,
            security_medium,
        })
    }
}

/// Answer to INI, HIA and HPB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbicsKeyManagementResponse {
    pub order_id: Option<String>,
    pub technical_return_code: EbicsReturnCode,
    pub report_text: String,
    pub data_transfer: Option<ResponseDataTransfer>,
    pub bank_return_code: EbicsReturnCode,
    pub timestamp_bank_parameter: Option<DateTime<Utc>>,
}

impl EbicsKeyManagementResponse {
    pub fn new(technical: EbicsReturnCode, report_text: String) -> Self {
        EbicsKeyManagementResponse {
            order_id: None,
            technical_return_code: technical,
            report_text,
            data_transfer: None,
            bank_return_code: EbicsReturnCode::Ok,
            timestamp_bank_parameter: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(EbicsReturnCode::Ok, EbicsReturnCode::Ok.report_text())
    }

    pub fn with_data(data_transfer: ResponseDataTransfer) -> Self {
        EbicsKeyManagementResponse {
            data_transfer: Some(data_transfer),
            ..Self::ok()
        }
    }
}

impl XmlMessage for EbicsKeyManagementResponse {
    fn to_document(&self) -> Document {
        let mutable = Element::new("mutable")
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
            envelope("ebicsKeyManagementResponse")
                .with_child(
                    authenticated("header")
                        .with_child(Element::new("static"))
                        .with_child(mutable),
                )
                .with_child(body),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = check_envelope(document, "ebicsKeyManagementResponse")?;
        let mut cursor = root.cursor();
        let header = check_authenticated(cursor.required("header")?)?;
        let body = cursor.required("body")?;
        cursor.finish()?;

        let mut header_cursor = header.cursor();
        header_cursor.required("static")?;
        let mutable = header_cursor.required("mutable")?;
        header_cursor.finish()?;

        let mut mutable_cursor = mutable.cursor();
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

        Ok(EbicsKeyManagementResponse {
            order_id,
            technical_return_code,
            report_text,
            data_transfer,
            bank_return_code,
            timestamp_bank_parameter,
        })
    }
}

/// Parses decompressed order data bytes as `T`.
pub fn parse_order_data<T: XmlMessage>(plain: &[u8]) -> Result<T> {
    let xml = std::str::from_utf8(plain).map_err(|e| EbicsError::Codec(format!("order data is not UTF-8: {e}")))?;
    T::from_xml(xml)
}
