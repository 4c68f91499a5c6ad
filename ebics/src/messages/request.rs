use chrono::{DateTime, Utc};

use super::{
    authenticated, check_authenticated, check_envelope, envelope, format_timestamp, invalid, now, parse_number, parse_timestamp,
    text_opt, BankPubKeyDigests, DataEncryptionInfo, OrderDetails, Product, SegmentNumber, TransactionPhase,
    XmlMessage, ORDER_ATTRIBUTE_DOWNLOAD, ORDER_ATTRIBUTE_UPLOAD, SECURITY_MEDIUM_UNSPECIFIED,
};
use crate::codec::{base64_decode, base64_encode, generate_nonce};
use crate::error::Result;
use crate::subscriber::SubscriberId;
use crate::xml::{Document, Element};

/// `header/static` of an `ebicsRequest`.
///
/// Initialisation requests fill everything but `transaction_id`; transfer and receipt
/// requests carry only `host_id` and `transaction_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestStaticHeader {
    pub host_id: String,
    pub nonce: Option<Vec<u8>>,
    pub timestamp: Option<DateTime<Utc>>,
    pub partner_id: Option<String>,
    pub user_id: Option<String>,
    pub system_id: Option<String>,
    pub product: Option<Product>,
    pub order_details: Option<OrderDetails>,
    pub bank_pub_key_digests: Option<BankPubKeyDigests>,
    pub security_medium: Option<String>,
    pub num_segments: Option<u32>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMutableHeader {
    pub phase: TransactionPhase,
    pub segment_number: Option<SegmentNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestDataTransfer {
    pub data_encryption_info: Option<DataEncryptionInfo>,
    /// Encrypted `UserSignatureData`, upload initialisation only.
    pub signature_data: Option<Vec<u8>>,
    /// One base64 segment of the encrypted order data.
    pub order_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestBody {
    pub data_transfer: Option<RequestDataTransfer>,
    /// `TransferReceipt/ReceiptCode`: 0 acknowledges a download, 1 rejects it.
    pub receipt_code: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbicsRequest {
    pub header: RequestStaticHeader,
    pub mutable: RequestMutableHeader,
    pub body: RequestBody,
}

impl EbicsRequest {
    fn initialisation(
        subscriber: &SubscriberId,
        product: Option<Product>,
        order_details: OrderDetails,
        bank_digests: BankPubKeyDigests,
        num_segments: Option<u32>,
    ) -> RequestStaticHeader {
        RequestStaticHeader {
            host_id: subscriber.host_id.clone(),
            nonce: Some(generate_nonce().to_vec()),
            timestamp: Some(now()),
            partner_id: Some(subscriber.partner_id.clone()),
            user_id: Some(subscriber.user_id.clone()),
            system_id: subscriber.system_id.clone(),
            product,
            order_details: Some(order_details),
            bank_pub_key_digests: Some(bank_digests),
            security_medium: Some(SECURITY_MEDIUM_UNSPECIFIED.to_string()),
            num_segments,
            transaction_id: None,
        }
    }

    fn follow_up(host_id: &str, transaction_id: &str) -> RequestStaticHeader {
        RequestStaticHeader {
            host_id: host_id.to_string(),
            transaction_id: Some(transaction_id.to_string()),
            ..Default::default()
        }
    }

    /// Starts a download of `order_type`; the bank answers with the first segment.
    pub fn download_initialisation(
        subscriber: &SubscriberId,
        product: Option<Product>,
        mut order_details: OrderDetails,
        bank_digests: BankPubKeyDigests,
    ) -> Self {
        order_details.order_attribute = ORDER_ATTRIBUTE_DOWNLOAD.to_string();
        EbicsRequest {
            header: Self::initialisation(subscriber, product, order_details, bank_digests, None),
            mutable: RequestMutableHeader {
                phase: TransactionPhase::Initialisation,
                segment_number: None,
            },
            body: RequestBody::default(),
        }
    }

    pub fn download_transfer(host_id: &str, transaction_id: &str, segment: u32, num_segments: u32) -> Self {
        EbicsRequest {
            header: Self::follow_up(host_id, transaction_id),
            mutable: RequestMutableHeader {
                phase: TransactionPhase::Transfer,
                segment_number: Some(SegmentNumber::new(segment, num_segments)),
            },
            body: RequestBody::default(),
        }
    }

    pub fn download_receipt(host_id: &str, transaction_id: &str, receipt_code: u32) -> Self {
        EbicsRequest {
            header: Self::follow_up(host_id, transaction_id),
            mutable: RequestMutableHeader {
                phase: TransactionPhase::Receipt,
                segment_number: None,
            },
            body: RequestBody {
                data_transfer: None,
                receipt_code: Some(receipt_code),
            },
        }
    }

    /// Announces an upload of `num_segments` segments together with the encrypted order signatures.
    pub fn upload_initialisation(
        subscriber: &SubscriberId,
        product: Option<Product>,
        mut order_details: OrderDetails,
        bank_digests: BankPubKeyDigests,
        num_segments: u32,
        encryption_info: DataEncryptionInfo,
        signature_data: Vec<u8>,
    ) -> Self {
        order_details.order_attribute = ORDER_ATTRIBUTE_UPLOAD.to_string();
        EbicsRequest {
            header: Self::initialisation(subscriber, product, order_details, bank_digests, Some(num_segments)),
            mutable: RequestMutableHeader {
                phase: TransactionPhase::Initialisation,
                segment_number: None,
            },
            body: RequestBody {
                data_transfer: Some(RequestDataTransfer {
                    data_encryption_info: Some(encryption_info),
                    signature_data: Some(signature_data),
                    order_data: None,
                }),
                receipt_code: None,
            },
        }
    }

    pub fn upload_transfer(
        host_id: &str,
        transaction_id: &str,
        segment: u32,
        num_segments: u32,
        order_data: String,
    ) -> Self {
        EbicsRequest {
            header: Self::follow_up(host_id, transaction_id),
            mutable: RequestMutableHeader {
                phase: TransactionPhase::Transfer,
                segment_number: Some(SegmentNumber::new(segment, num_segments)),
            },
            body: RequestBody {
                data_transfer: Some(RequestDataTransfer {
                    data_encryption_info: None,
                    signature_data: None,
                    order_data: Some(order_data),
                }),
                receipt_code: None,
            },
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.header.transaction_id.as_deref()
    }

    pub fn order_type(&self) -> Option<&str> {
        self.header.order_details.as_ref().map(|d| d.order_type.as_str())
    }
}

impl RequestStaticHeader {
    fn to_element(&self) -> Element {
        Element::new("static")
            .with_child(Element::text_element("HostID", self.host_id.as_str()))
            .with_opt_child(
                self.nonce
                    .as_ref()
                    .map(|nonce| Element::text_element("Nonce", hex::encode_upper(nonce))),
            )
            .with_opt_child(
                self.timestamp
                    .map(|t| Element::text_element("Timestamp", format_timestamp(t))),
            )
            .with_opt_child(text_opt("PartnerID", self.partner_id.as_deref()))
            .with_opt_child(text_opt("UserID", self.user_id.as_deref()))
            .with_opt_child(text_opt("SystemID", self.system_id.as_deref()))
            .with_opt_child(self.product.as_ref().map(Product::to_element))
            .with_opt_child(self.order_details.as_ref().map(OrderDetails::to_element))
            .with_opt_child(self.bank_pub_key_digests.as_ref().map(BankPubKeyDigests::to_element))
            .with_opt_child(text_opt("SecurityMedium", self.security_medium.as_deref()))
            .with_opt_child(
                self.num_segments
                    .map(|n| Element::text_element("NumSegments", n.to_string())),
            )
            .with_opt_child(text_opt("TransactionID", self.transaction_id.as_deref()))
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let host_id = cursor.required_text("HostID")?;
        let nonce = match cursor.optional_text("Nonce") {
            Some(nonce) => Some(hex::decode(&nonce).map_err(|e| invalid(format!("Nonce: {e}")))?),
            None => None,
        };
        let timestamp = match cursor.optional_text("Timestamp") {
            Some(t) => Some(parse_timestamp(&t)?),
            None => None,
        };
        let partner_id = cursor.optional_text("PartnerID");
        let user_id = cursor.optional_text("UserID");
        let system_id = cursor.optional_text("SystemID");
        let product = cursor.optional("Product").map(Product::from_element);
        let order_details = match cursor.optional("OrderDetails") {
            Some(details) => Some(OrderDetails::from_element(details)?),
            None => None,
        };
        let bank_pub_key_digests = match cursor.optional("BankPubKeyDigests") {
            Some(digests) => Some(BankPubKeyDigests::from_element(digests)?),
            None => None,
        };
        let security_medium = cursor.optional_text("SecurityMedium");
        let num_segments = match cursor.optional_text("NumSegments") {
            Some(n) => Some(parse_number(&n, "NumSegments")?),
            None => None,
        };
        let transaction_id = cursor.optional_text("TransactionID");
        cursor.finish()?;

        Ok(RequestStaticHeader {
            host_id,
            nonce,
            timestamp,
            partner_id,
            user_id,
            system_id,
            product,
            order_details,
            bank_pub_key_digests,
            security_medium,
            num_segments,
            transaction_id,
        })
    }
}

impl RequestDataTransfer {
    fn to_element(&self) -> Element {
        Element::new("DataTransfer")
            .with_opt_child(self.data_encryption_info.as_ref().map(DataEncryptionInfo::to_element))
            .with_opt_child(
                self.signature_data
                    .as_ref()
                    .map(|data| authenticated("SignatureData").with_text(base64_encode(data))),
            )
            .with_opt_child(text_opt("OrderData", self.order_data.as_deref()))
    }

    fn from_element(element: &Element) -> Result<Self> {
        let mut cursor = element.cursor();
        let data_encryption_info = match cursor.optional("DataEncryptionInfo") {
            Some(info) => Some(DataEncryptionInfo::from_element(info)?),
            None => None,
        };
        let signature_data = match cursor.optional("SignatureData") {
            Some(data) => Some(base64_decode(&check_authenticated(data)?.trimmed_text())?),
            None => None,
        };
        let order_data = cursor.optional_text("OrderData");
        cursor.finish()?;
        Ok(RequestDataTransfer {
            data_encryption_info,
            signature_data,
            order_data,
        })
    }
}

impl XmlMessage for EbicsRequest {
    fn to_document(&self) -> Document {
        let mutable = Element::new("mutable")
            .with_child(Element::text_element("TransactionPhase", self.mutable.phase.as_str()))
            .with_opt_child(self.mutable.segment_number.map(SegmentNumber::to_element));

        let body = Element::new("body")
            .with_opt_child(self.body.data_transfer.as_ref().map(RequestDataTransfer::to_element))
            .with_opt_child(self.body.receipt_code.map(|code| {
                authenticated("TransferReceipt").with_child(Element::text_element("ReceiptCode", code.to_string()))
            }));

        Document::new(
            envelope("ebicsRequest")
                .with_child(
                    authenticated("header")
                        .with_child(self.header.to_element())
                        .with_child(mutable),
                )
                .with_child(Element::new("AuthSignature"))
                .with_child(body),
        )
    }

    fn from_document(document: &Document) -> Result<Self> {
        let root = check_envelope(document, "ebicsRequest")?;
        let mut cursor = root.cursor();
        let header = check_authenticated(cursor.required("header")?)?;
        cursor.required("AuthSignature")?;
        let body = cursor.required("body")?;
        cursor.finish()?;

        let mut header_cursor = header.cursor();
        let static_header = RequestStaticHeader::from_element(header_cursor.required("static")?)?;
        let mutable = header_cursor.required("mutable")?;
        header_cursor.finish()?;

        let mut mutable_cursor = mutable.cursor();
        let phase = TransactionPhase::parse(&mutable_cursor.required_text("TransactionPhase")?)?;
        let segment_number = match mutable_cursor.optional("SegmentNumber") {
            Some(segment) => Some(SegmentNumber::from_element(segment)?),
            None => None,
        };
        mutable_cursor.finish()?;

        let mut body_cursor = body.cursor();
        let data_transfer = match body_cursor.optional("DataTransfer") {
            Some(transfer) => Some(RequestDataTransfer::from_element(transfer)?),
            None => None,
        };
        let receipt_code = match body_cursor.optional("TransferReceipt") {
            Some(receipt) => {
                let mut receipt_cursor = check_authenticated(receipt)?.cursor();
                let code = parse_number(&receipt_cursor.required_text("ReceiptCode")?, "ReceiptCode")?;
                receipt_cursor.finish()?;
                Some(code)
            }
            None => None,
        };
        body_cursor.finish()?;

        Ok(EbicsRequest {
            header: static_header,
            mutable: RequestMutableHeader { phase, segment_number },
            body: RequestBody {
                data_transfer,
                receipt_code,
            },
        })
    }
}
