//! The subscriber side ("nexus"): key management and the download/upload transactions,
//! spoken over any [`Transport`].
//!
//! Nothing here mutates the [`ClientSubscriber`] snapshot it is given. Operations return
//! what was learned (bank keys, order IDs) and the caller persists it.

use log::{debug, info, warn};

use crate::codec::{base64_decode, base64_encode, chunk, compress, decompress, reassemble};
use crate::config::ClientConfig;
use crate::crypto::{
    decrypt_e002, encrypt_e002, encrypt_e002_with_transaction_key, select_decryption_key, sign_a006,
};
use crate::error::{EbicsError, Result};
use crate::messages::{
    now, parse_order_data, DataEncryptionInfo, EbicsKeyManagementResponse, EbicsNoPubKeyDigestsRequest,
    EbicsRequest, EbicsResponse, EbicsUnsecuredRequest, HevRequest, HevResponse, HiaRequestOrderData,
    HpbResponseOrderData, OrderDetails, OrderParams, OrderSignatureData, PubKeyValue, ResponseDataTransfer,
    SignaturePubKeyOrderData, UserSignatureData, VersionSpec, XmlMessage, ORDER_ATTRIBUTE_DOWNLOAD,
    ORDER_ATTRIBUTE_UPLOAD, SIGNATURE_VERSION_A006,
};
use crate::return_code::EbicsReturnCode;
use crate::signature;
use crate::subscriber::{BankKeys, ClientSubscriber};
use crate::xml::Document;

/// Posts one XML document to the bank and returns the answer body.
pub trait Transport {
    fn post(&self, body: &str) -> Result<String>;
}

impl<F> Transport for F
where
    F: Fn(&str) -> Result<String>,
{
    fn post(&self, body: &str) -> Result<String> {
        self(body)
    }
}

/// Outcome of a download that was technically fine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    /// Decrypted and decompressed order data, acknowledged with a positive receipt.
    Success(Vec<u8>),
    /// The bank declined, e.g. `EBICS_NO_DOWNLOAD_DATA_AVAILABLE`. No receipt was sent.
    BankError(EbicsReturnCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Success { order_id: String },
    BankError(EbicsReturnCode),
}

pub struct EbicsClient<T> {
    config: ClientConfig,
    transport: T,
}

impl<T: Transport> EbicsClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        EbicsClient { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Protocol versions supported by `host_id`.
    pub fn hev(&self, host_id: &str) -> Result<Vec<VersionSpec>> {
        let request = HevRequest {
            host_id: host_id.to_string(),
        };
        let response = HevResponse::from_xml(&self.transport.post(&request.to_xml())?)?;
        if !response.return_code.is_ok() {
            return Err(EbicsError::rejected(response.return_code, response.report_text));
        }
        Ok(response.versions)
    }

    /// Sends the A006 public key.
    pub fn ini(&self, subscriber: &ClientSubscriber) -> Result<()> {
        let id = &subscriber.id;
        let order_data = SignaturePubKeyOrderData {
            signature_pub_key: PubKeyValue::from_public_key(&subscriber.keys.signature.to_public_key(), Some(now())),
            partner_id: id.partner_id.clone(),
            user_id: id.user_id.clone(),
        };
        let request = EbicsUnsecuredRequest::ini(id, self.config.product(), &order_data)?;
        self.key_management(&request.to_xml())?;
        info!("INI accepted for {id}");
        Ok(())
    }

    /// Sends the X002 and E002 public keys.
    pub fn hia(&self, subscriber: &ClientSubscriber) -> Result<()> {
        let id = &subscriber.id;
        let order_data = HiaRequestOrderData {
            authentication_pub_key: PubKeyValue::from_public_key(
                &subscriber.keys.authentication.to_public_key(),
                Some(now()),
            ),
            encryption_pub_key: PubKeyValue::from_public_key(&subscriber.keys.encryption.to_public_key(), Some(now())),
            partner_id: id.partner_id.clone(),
            user_id: id.user_id.clone(),
        };
        let request = EbicsUnsecuredRequest::hia(id, self.config.product(), &order_data)?;
        self.key_management(&request.to_xml())?;
        info!("HIA accepted for {id}");
        Ok(())
    }

    /// Fetches the bank's public keys. They must be checked against the bank's letter
    /// before being trusted.
    pub fn hpb(&self, subscriber: &ClientSubscriber) -> Result<BankKeys> {
        let mut request = EbicsNoPubKeyDigestsRequest::hpb(&subscriber.id, self.config.product()).to_document();
        signature::sign(&mut request, &subscriber.keys.authentication)?;

        let response = self.key_management(&request.to_xml())?;
        let transfer = response
            .data_transfer
            .ok_or_else(|| EbicsError::ProtocolViolation("HPB response carries no order data".into()))?;
        let plain = self.decrypt(subscriber, &transfer, &[transfer.order_data.as_str()])?;
        let order_data: HpbResponseOrderData = parse_order_data(&plain)?;
        if order_data.host_id != subscriber.id.host_id {
            return Err(EbicsError::ProtocolViolation(format!(
                "HPB answered for host {}",
                order_data.host_id
            )));
        }
        info!("received bank keys of {}", order_data.host_id);
        Ok(BankKeys {
            authentication: order_data.authentication_pub_key.to_public_key()?,
            encryption: order_data.encryption_pub_key.to_public_key()?,
        })
    }

    fn key_management(&self, body: &str) -> Result<EbicsKeyManagementResponse> {
        let response = EbicsKeyManagementResponse::from_xml(&self.transport.post(body)?)?;
        if !response.technical_return_code.is_ok() {
            return Err(EbicsError::rejected(response.technical_return_code, response.report_text));
        }
        if !response.bank_return_code.is_ok() {
            return Err(EbicsError::rejected(response.bank_return_code, response.report_text));
        }
        Ok(response)
    }

    /// Runs a complete download: initialisation, the remaining segments and a positive
    /// receipt.
    pub fn download(
        &self,
        subscriber: &ClientSubscriber,
        order_type: &str,
        params: Option<OrderParams>,
    ) -> Result<DownloadResult> {
        let bank_keys = subscriber.bank_keys()?;
        let id = &subscriber.id;
        let request = EbicsRequest::download_initialisation(
            id,
            self.config.product(),
            OrderDetails::new(order_type, ORDER_ATTRIBUTE_DOWNLOAD, params),
            bank_keys.digests(),
        );
        let response = self.exchange(subscriber, &request)?;
        if !response.bank_return_code.is_ok() {
            info!("bank declined {order_type} download: {}", response.bank_return_code);
            return Ok(DownloadResult::BankError(response.bank_return_code));
        }

        let transaction_id = required_transaction_id(&response)?;
        let num_segments = response
            .num_segments
            .ok_or_else(|| EbicsError::ProtocolViolation("NumSegments missing".into()))?;
        let transfer = response
            .data_transfer
            .ok_or_else(|| EbicsError::ProtocolViolation("first segment missing".into()))?;
        debug!("download {transaction_id}: {num_segments} segment(s)");

        let mut segments = vec![transfer.order_data.clone()];
        for number in 2..=num_segments {
            let request = EbicsRequest::download_transfer(&id.host_id, &transaction_id, number, num_segments);
            let response = self.exchange(subscriber, &request)?;
            let segment = response
                .data_transfer
                .ok_or_else(|| EbicsError::ProtocolViolation(format!("segment {number} missing")))?;
            segments.push(segment.order_data);
        }

        let encoded = reassemble(&segments);
        let payload = match self.decrypt(subscriber, &transfer, &[encoded.as_str()]) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("download {transaction_id} unreadable, sending negative receipt: {e}");
                let request = EbicsRequest::download_receipt(&id.host_id, &transaction_id, 1);
                if let Err(receipt_error) = self.exchange(subscriber, &request) {
                    warn!("negative receipt failed: {receipt_error}");
                }
                return Err(e);
            }
        };

        let request = EbicsRequest::download_receipt(&id.host_id, &transaction_id, 0);
        let receipt = self.exchange_any(subscriber, &request)?;
        if receipt.technical_return_code != EbicsReturnCode::DownloadPostprocessDone {
            return Err(EbicsError::ProtocolViolation(format!(
                "receipt answered with {}",
                receipt.technical_return_code
            )));
        }
        info!("downloaded {order_type}, {} bytes", payload.len());
        Ok(DownloadResult::Success(payload))
    }

    /// Signs `payload` with A006, then uploads it encrypted in as many segments as the
    /// configured segment size requires.
    pub fn upload(&self, subscriber: &ClientSubscriber, order_type: &str, payload: &[u8]) -> Result<UploadResult> {
        let bank_keys = subscriber.bank_keys()?;
        let id = &subscriber.id;

        let signatures = UserSignatureData {
            signatures: vec![OrderSignatureData {
                signature_version: SIGNATURE_VERSION_A006.to_string(),
                signature_value: sign_a006(payload, &subscriber.keys.signature)?,
                partner_id: id.partner_id.clone(),
                user_id: id.user_id.clone(),
            }],
        };
        let encrypted_signatures = encrypt_e002(&compress(signatures.to_xml().as_bytes())?, &bank_keys.encryption)?;
        // order data must decrypt with the transaction key announced for the signatures
        let encrypted_payload = encrypt_e002_with_transaction_key(
            &compress(payload)?,
            &bank_keys.encryption,
            &encrypted_signatures.plain_transaction_key,
        )?;
        let segments = chunk(
            &base64_encode(&encrypted_payload.encrypted_data),
            self.config.segment_size,
        )?;
        let num_segments = segments.len() as u32;

        let request = EbicsRequest::upload_initialisation(
            id,
            self.config.product(),
            OrderDetails::new(order_type, ORDER_ATTRIBUTE_UPLOAD, None),
            bank_keys.digests(),
            num_segments,
            DataEncryptionInfo::new(
                &encrypted_signatures.pub_key_digest,
                &encrypted_signatures.encrypted_transaction_key,
            ),
            encrypted_signatures.encrypted_data,
        );
        let response = self.exchange(subscriber, &request)?;
        if !response.bank_return_code.is_ok() {
            info!("bank declined {order_type} upload: {}", response.bank_return_code);
            return Ok(UploadResult::BankError(response.bank_return_code));
        }
        let transaction_id = required_transaction_id(&response)?;
        let order_id = response
            .order_id
            .ok_or_else(|| EbicsError::ProtocolViolation("OrderID missing".into()))?;
        debug!("upload {transaction_id} as order {order_id}: {num_segments} segment(s)");

        for (number, segment) in (1..).zip(segments) {
            let request = EbicsRequest::upload_transfer(&id.host_id, &transaction_id, number, num_segments, segment);
            let response = self.exchange(subscriber, &request)?;
            if !response.bank_return_code.is_ok() {
                info!("bank declined segment {number} of order {order_id}: {}", response.bank_return_code);
                return Ok(UploadResult::BankError(response.bank_return_code));
            }
        }
        info!("uploaded {order_type} order {order_id}, {} bytes", payload.len());
        Ok(UploadResult::Success { order_id })
    }

    /// Like [`Self::exchange_any`], but only `EBICS_OK` is an acceptable technical code.
    fn exchange(&self, subscriber: &ClientSubscriber, request: &EbicsRequest) -> Result<EbicsResponse> {
        let response = self.exchange_any(subscriber, request)?;
        if !response.technical_return_code.is_ok() {
            return Err(EbicsError::rejected(response.technical_return_code, response.report_text));
        }
        Ok(response)
    }

    /// Signs and posts `request` and verifies the bank's signature on the answer.
    fn exchange_any(&self, subscriber: &ClientSubscriber, request: &EbicsRequest) -> Result<EbicsResponse> {
        let bank_keys = subscriber.bank_keys()?;
        let mut document = request.to_document();
        signature::sign(&mut document, &subscriber.keys.authentication)?;
        debug!("{} {} request", request.mutable.phase.as_str(), request.order_type().unwrap_or(""));

        let answer = Document::parse(&self.transport.post(&document.to_xml())?)?;
        let response = EbicsResponse::from_document(&answer)?;

        let unsigned = answer
            .root
            .child("AuthSignature")
            .map_or(true, |s| s.elements().next().is_none());
        if unsigned {
            // banks do not sign errors for requests they could not attribute to a host
            if !response.technical_return_code.is_ok() {
                return Err(EbicsError::rejected(response.technical_return_code, response.report_text));
            }
            return Err(EbicsError::ProtocolViolation("response is not signed".into()));
        }
        if !signature::verify(&answer, &bank_keys.authentication)? {
            return Err(EbicsError::Crypto("bank signature on response does not verify".into()));
        }
        Ok(response)
    }

    fn decrypt(&self, subscriber: &ClientSubscriber, transfer: &ResponseDataTransfer, segments: &[&str]) -> Result<Vec<u8>> {
        let info = transfer
            .data_encryption_info
            .as_ref()
            .ok_or_else(|| EbicsError::ProtocolViolation("DataEncryptionInfo missing".into()))?;
        let key = select_decryption_key(&info.encryption_pub_key_digest, &[&subscriber.keys.encryption])?;
        let encrypted = base64_decode(&reassemble(segments))?;
        decompress(&decrypt_e002(&info.transaction_key, &encrypted, key)?)
    }
}

fn required_transaction_id(response: &EbicsResponse) -> Result<String> {
    response
        .transaction_id
        .clone()
        .ok_or_else(|| EbicsError::ProtocolViolation("TransactionID missing".into()))
}
