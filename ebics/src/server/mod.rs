//! The bank side ("sandbox"): answers HEV, INI, HIA, HPB and the download/upload
//! transactions of `ebicsRequest`.
//!
//! [`EbicsHost::handle`] takes one POSTed XML body and returns the XML to answer with.
//! Persistence and the business side are behind [`BankStore`] and [`OrderHandler`].
//!
//! https://www.cfonb.org/fichiers/20130612170023_6_4_EBICS_Specification_2.5_final_2011_05_16_2012_07_01.pdf
//! chapter 5 (transaction phases) and 4.4 (key management)

mod orders;
mod store;

pub use orders::{MemoryOrderHandler, OrderHandler, UploadedOrder, TRANSFER_TYPE_DOWNLOAD, TRANSFER_TYPE_UPLOAD};
pub use store::{
    BankStore, DownloadTransaction, HostRecord, MemoryStore, OrderSignature, PartnerRecord, SubscriberPublicKeys,
    SubscriberRecord, TransactionRecord, UploadTransaction,
};

use log::{debug, info, warn};
use rsa::RsaPublicKey;

use crate::codec::{
    base64_decode, base64_encode, check_order_id_overflow, chunk, compress, compute_order_id, decompress,
    generate_transaction_id, reassemble,
};
use crate::config::HostConfig;
use crate::crypto::{
    decrypt_e002, decrypt_transaction_key, decrypt_with_transaction_key, encrypt_e002, public_key_hash,
    select_decryption_key, verify_a006,
};
use crate::error::{EbicsError, Result};
use crate::messages::{
    parse_order_data, BankPubKeyDigests, DataEncryptionInfo, EbicsKeyManagementResponse,
    EbicsNoPubKeyDigestsRequest, EbicsRequest, EbicsResponse, EbicsUnsecuredRequest, HevRequest, HevResponse,
    HiaRequestOrderData, HkdResponseOrderData, HpbResponseOrderData, HtdResponseOrderData, PartnerInfo, Permission,
    PubKeyValue, ResponseDataTransfer, SignaturePubKeyOrderData, TransactionPhase, UserInfo, UserSignatureData,
    XmlMessage, SIGNATURE_VERSION_A006,
};
use crate::return_code::EbicsReturnCode;
use crate::signature;
use crate::subscriber::{SubscriberId, SubscriberState};
use crate::xml::Document;

pub struct EbicsHost<S, H> {
    config: HostConfig,
    store: S,
    orders: H,
}

/// What the last segment of an upload hands over for verification.
struct CompletedUpload {
    order_id: String,
    order_type: String,
    subscriber: SubscriberId,
    encrypted_transaction_key: Vec<u8>,
    signatures: Vec<OrderSignature>,
    encoded_payload: String,
}

impl<S: BankStore, H: OrderHandler> EbicsHost<S, H> {
    pub fn new(config: HostConfig, store: S, orders: H) -> Self {
        EbicsHost { config, store, orders }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn orders(&self) -> &H {
        &self.orders
    }

    /// Answers one request document.
    ///
    /// Protocol failures come back as EBICS envelopes carrying the matching return code.
    /// Only a body that is no XML at all or has an unknown root element is an `Err`.
    pub fn handle(&self, body: &str) -> Result<String> {
        let document = Document::parse(body)?;
        info!("processing {}", document.root.name);
        debug!("request: {body}");

        match document.root.name.as_str() {
            "ebicsHEVRequest" => Ok(self.serve_hev(&document).to_xml()),
            "ebicsUnsecuredRequest" => Ok(self.key_management_reply(self.serve_unsecured(&document))),
            "ebicsNoPubKeyDigestsRequest" => Ok(self.key_management_reply(self.serve_hpb(&document))),
            "ebicsRequest" => self.serve_request(&document),
            other => Err(EbicsError::NotImplemented(format!("unknown message <{other}>"))),
        }
    }

    /// INI/HIA confirmation letter received: the subscriber may now transact.
    pub fn confirm_subscriber(&self, id: &SubscriberId) -> Result<SubscriberState> {
        self.store.update_subscriber(id, |subscriber| {
            subscriber.state = subscriber.state.confirm()?;
            Ok(subscriber.state)
        })
    }

    fn host(&self, host_id: &str) -> Result<HostRecord> {
        self.store.host(host_id)?.ok_or_else(|| {
            warn!("client requested unknown HostID {host_id}");
            EbicsError::rejected(EbicsReturnCode::InvalidHostId, format!("unknown host {host_id}"))
        })
    }

    fn serve_hev(&self, document: &Document) -> HevResponse {
        match HevRequest::from_document(document).and_then(|request| self.host(&request.host_id)) {
            Ok(_) => HevResponse::new(self.config.versions.clone()),
            Err(e) => {
                warn!("HEV failed: {e}");
                HevResponse::error(e.return_code())
            }
        }
    }

    fn key_management_reply(&self, outcome: Result<EbicsKeyManagementResponse>) -> String {
        let response = outcome.unwrap_or_else(|e| {
            warn!("key management request failed: {e}");
            let code = e.return_code();
            EbicsKeyManagementResponse::new(code, code.report_text_with(&e.to_string()))
        });
        response.to_xml()
    }

    fn serve_unsecured(&self, document: &Document) -> Result<EbicsKeyManagementResponse> {
        let request = EbicsUnsecuredRequest::from_document(document)?;
        self.host(&request.host_id)?;
        let id = SubscriberId {
            host_id: request.host_id.clone(),
            partner_id: request.partner_id.clone(),
            user_id: request.user_id.clone(),
            system_id: request.system_id.clone(),
        };
        info!("serving {} for {id}", request.order_type());

        match request.order_type() {
            "INI" => {
                let order_data: SignaturePubKeyOrderData = request.decode_order_data()?;
                check_identity(&id, &order_data.partner_id, &order_data.user_id)?;
                let key = order_data.signature_pub_key.to_public_key()?;
                let state = self.store.update_subscriber(&id, |subscriber| {
                    subscriber.keys.signature = Some(key);
                    subscriber.state = subscriber.state.after_ini();
                    Ok(subscriber.state)
                })?;
                info!("signature key of {id} stored, state now {state:?}");
            }
            "HIA" => {
                let order_data: HiaRequestOrderData = request.decode_order_data()?;
                check_identity(&id, &order_data.partner_id, &order_data.user_id)?;
                let authentication = order_data.authentication_pub_key.to_public_key()?;
                let encryption = order_data.encryption_pub_key.to_public_key()?;
                let state = self.store.update_subscriber(&id, |subscriber| {
                    subscriber.keys.authentication = Some(authentication);
                    subscriber.keys.encryption = Some(encryption);
                    subscriber.state = subscriber.state.after_hia();
                    Ok(subscriber.state)
                })?;
                info!("authentication and encryption keys of {id} stored, state now {state:?}");
            }
            other => {
                return Err(EbicsError::rejected(
                    EbicsReturnCode::InvalidOrderType,
                    format!("{other} is no unsecured order type"),
                ))
            }
        }
        Ok(EbicsKeyManagementResponse::ok())
    }

    fn serve_hpb(&self, document: &Document) -> Result<EbicsKeyManagementResponse> {
        let request = EbicsNoPubKeyDigestsRequest::from_document(document)?;
        let host = self.host(&request.host_id)?;
        if request.order_details.order_type != "HPB" {
            return Err(EbicsError::rejected(
                EbicsReturnCode::InvalidOrderType,
                format!("{} is no key download", request.order_details.order_type),
            ));
        }
        let id = SubscriberId {
            host_id: request.host_id.clone(),
            partner_id: request.partner_id.clone(),
            user_id: request.user_id.clone(),
            system_id: request.system_id.clone(),
        };
        let subscriber = self.authenticated_subscriber(&id, document)?;
        let encryption_key = required_key(&subscriber.keys.encryption, "encryption")?;

        let order_data = HpbResponseOrderData {
            authentication_pub_key: PubKeyValue::from_public_key(&host.authentication_public(), None),
            encryption_pub_key: PubKeyValue::from_public_key(&host.encryption_public(), None),
            host_id: host.host_id.clone(),
        };
        let compressed = compress(order_data.to_xml().as_bytes())?;
        let encrypted = encrypt_e002(&compressed, encryption_key)?;
        info!("sending bank keys of {} to {id}", host.host_id);

        Ok(EbicsKeyManagementResponse::with_data(ResponseDataTransfer {
            data_encryption_info: Some(DataEncryptionInfo::new(
                &encrypted.pub_key_digest,
                &encrypted.encrypted_transaction_key,
            )),
            order_data: base64_encode(&encrypted.encrypted_data),
        }))
    }

    /// Looks up the subscriber, checks it finished key exchange and verifies the
    /// request's `AuthSignature` with its X002 key.
    fn authenticated_subscriber(&self, id: &SubscriberId, document: &Document) -> Result<SubscriberRecord> {
        let subscriber = self
            .store
            .subscriber(id)?
            .ok_or_else(|| EbicsError::rejected(EbicsReturnCode::UserUnknown, format!("subscriber {id} unknown")))?;
        if !subscriber.state.is_initialized() {
            return Err(EbicsError::InvalidSubscriberState(format!(
                "{id} is {:?}, INI and HIA are required",
                subscriber.state
            )));
        }
        let key = required_key(&subscriber.keys.authentication, "authentication")?;
        if !signature::verify(document, key)? {
            warn!("authentication signature of {id} does not verify");
            return Err(EbicsError::rejected(
                EbicsReturnCode::AuthenticationFailed,
                "authentication signature does not verify",
            ));
        }
        Ok(subscriber)
    }

    fn serve_request(&self, document: &Document) -> Result<String> {
        let request = EbicsRequest::from_document(document);

        // whatever we answer is signed with the host key, if we know the host
        let host_id = match &request {
            Ok(request) => Some(request.header.host_id.clone()),
            Err(_) => document
                .root
                .child("header")
                .and_then(|header| header.child("static"))
                .and_then(|s| s.child("HostID"))
                .map(|host_id| host_id.trimmed_text()),
        };
        let host = host_id.and_then(|host_id| self.store.host(&host_id).ok().flatten());

        let phase = request
            .as_ref()
            .map(|r| r.mutable.phase)
            .unwrap_or(TransactionPhase::Initialisation);
        let transaction_id = request
            .as_ref()
            .ok()
            .and_then(|r| r.transaction_id().map(str::to_string));

        let response = request
            .and_then(|request| match &host {
                Some(host) => self.process_request(host, &request, document),
                None => Err(EbicsError::rejected(EbicsReturnCode::InvalidHostId, "unknown host")),
            })
            .unwrap_or_else(|e| {
                warn!("{} request failed: {e}", phase.as_str());
                let code = e.return_code();
                EbicsResponse::technical_error(
                    phase,
                    transaction_id.as_deref(),
                    code,
                    code.report_text_with(&e.to_string()),
                )
            });

        let mut response = response.to_document();
        if let Some(host) = &host {
            signature::sign(&mut response, &host.authentication_key)?;
        }
        Ok(response.to_xml())
    }

    fn process_request(&self, host: &HostRecord, request: &EbicsRequest, document: &Document) -> Result<EbicsResponse> {
        match request.mutable.phase {
            TransactionPhase::Initialisation => {
                let header = &request.header;
                let id = SubscriberId {
                    host_id: header.host_id.clone(),
                    partner_id: header
                        .partner_id
                        .clone()
                        .ok_or_else(|| EbicsError::InvalidRequest("PartnerID missing".into()))?,
                    user_id: header
                        .user_id
                        .clone()
                        .ok_or_else(|| EbicsError::InvalidRequest("UserID missing".into()))?,
                    system_id: header.system_id.clone(),
                };
                let subscriber = self.authenticated_subscriber(&id, document)?;
                check_bank_digests(host, header.bank_pub_key_digests.as_ref())?;

                if header.num_segments.is_some() {
                    self.upload_initialisation(host, &subscriber, request)
                } else {
                    self.download_initialisation(host, &subscriber, request)
                }
            }
            phase => {
                let transaction_id = request
                    .transaction_id()
                    .ok_or_else(|| EbicsError::InvalidRequest("TransactionID missing".into()))?;
                let transaction = self
                    .store
                    .transaction(transaction_id)?
                    .filter(|t| !t.is_finished() && t.subscriber().host_id == host.host_id)
                    .ok_or_else(|| {
                        EbicsError::rejected(
                            EbicsReturnCode::TxUnknownTxid,
                            format!("transaction {transaction_id} unknown"),
                        )
                    })?;
                self.authenticated_subscriber(transaction.subscriber(), document)?;

                match (phase, transaction) {
                    (TransactionPhase::Transfer, TransactionRecord::Download(download)) => {
                        self.download_transfer(&download, request)
                    }
                    (TransactionPhase::Transfer, TransactionRecord::Upload(_)) => {
                        self.upload_transfer(host, transaction_id, request)
                    }
                    (TransactionPhase::Receipt, TransactionRecord::Download(download)) => {
                        self.download_receipt(&download, request)
                    }
                    (_, _) => Err(EbicsError::InvalidRequest(format!(
                        "{} phase does not apply to transaction {transaction_id}",
                        phase.as_str()
                    ))),
                }
            }
        }
    }

    fn download_initialisation(
        &self,
        host: &HostRecord,
        subscriber: &SubscriberRecord,
        request: &EbicsRequest,
    ) -> Result<EbicsResponse> {
        let details = request
            .header
            .order_details
            .as_ref()
            .ok_or_else(|| EbicsError::InvalidRequest("OrderDetails missing".into()))?;
        let order_type = details.order_type.as_str();
        let id = &subscriber.id;

        let payload = match order_type {
            "HTD" => Some(self.htd(subscriber)?.to_xml().into_bytes()),
            "HKD" => Some(self.hkd(subscriber)?.to_xml().into_bytes()),
            _ => self.orders.download(id, order_type, details.params.as_ref())?,
        };
        let Some(payload) = payload else {
            info!("no {order_type} data for {id}");
            return Ok(EbicsResponse::bank_error(
                TransactionPhase::Initialisation,
                None,
                EbicsReturnCode::NoDownloadDataAvailable,
            ));
        };

        let encryption_key = required_key(&subscriber.keys.encryption, "encryption")?;
        let encrypted = encrypt_e002(&compress(&payload)?, encryption_key)?;
        let encoded = base64_encode(&encrypted.encrypted_data);
        let segments = chunk(&encoded, self.config.segment_size)?;
        let num_segments = segments.len() as u32;

        let transaction_id = generate_transaction_id();
        self.store.create_transaction(TransactionRecord::Download(DownloadTransaction {
            transaction_id: transaction_id.clone(),
            subscriber: id.clone(),
            order_type: order_type.to_string(),
            encoded_payload: encoded,
            segment_size: self.config.segment_size,
            num_segments,
            encrypted_transaction_key: encrypted.encrypted_transaction_key.clone(),
            receipt: None,
        }))?;
        info!(
            "download {transaction_id} of {order_type} for {id} on {}: {} bytes in {num_segments} segment(s)",
            host.host_id,
            payload.len()
        );

        let first_segment = segments.into_iter().next().unwrap_or_default();
        Ok(EbicsResponse::download_initialisation(
            &transaction_id,
            num_segments,
            DataEncryptionInfo::new(&encrypted.pub_key_digest, &encrypted.encrypted_transaction_key),
            first_segment,
        ))
    }

    fn download_transfer(&self, download: &DownloadTransaction, request: &EbicsRequest) -> Result<EbicsResponse> {
        let number = request
            .mutable
            .segment_number
            .map(|segment| segment.number)
            .ok_or_else(|| EbicsError::InvalidRequest("SegmentNumber missing".into()))?;
        let segment = download.segment(number).ok_or_else(|| {
            EbicsError::rejected(
                EbicsReturnCode::TxSegmentNumberExceeded,
                format!("segment {number} of {}", download.num_segments),
            )
        })?;
        debug!("download {} segment {number}/{}", download.transaction_id, download.num_segments);
        Ok(EbicsResponse::download_transfer(
            &download.transaction_id,
            number,
            download.num_segments,
            segment.to_string(),
        ))
    }

    fn download_receipt(&self, download: &DownloadTransaction, request: &EbicsRequest) -> Result<EbicsResponse> {
        let receipt_code = request
            .body
            .receipt_code
            .ok_or_else(|| EbicsError::InvalidRequest("TransferReceipt missing".into()))?;
        let positive = receipt_code == 0;

        self.store.update_transaction(&download.transaction_id, |transaction| match transaction {
            TransactionRecord::Download(download) if download.receipt.is_none() => {
                download.receipt = Some(positive);
                Ok(())
            }
            _ => Err(EbicsError::rejected(
                EbicsReturnCode::TxUnknownTxid,
                "receipt already received",
            )),
        })?;
        self.orders
            .download_receipt(&download.subscriber, &download.order_type, positive)?;
        info!(
            "download {} acknowledged {}",
            download.transaction_id,
            if positive { "positively" } else { "negatively" }
        );

        let code = if positive {
            EbicsReturnCode::DownloadPostprocessDone
        } else {
            EbicsReturnCode::DownloadPostprocessSkipped
        };
        Ok(EbicsResponse::receipt(&download.transaction_id, code))
    }

    fn upload_initialisation(
        &self,
        host: &HostRecord,
        subscriber: &SubscriberRecord,
        request: &EbicsRequest,
    ) -> Result<EbicsResponse> {
        let id = &subscriber.id;
        let details = request
            .header
            .order_details
            .as_ref()
            .ok_or_else(|| EbicsError::InvalidRequest("OrderDetails missing".into()))?;
        let order_type = details.order_type.clone();
        let accepted = self
            .orders
            .supported_orders()
            .iter()
            .any(|order| order.order_type == order_type && order.transfer_type == TRANSFER_TYPE_UPLOAD);
        if !accepted {
            return Err(EbicsError::NotImplemented(format!("upload order type {order_type}")));
        }

        let num_segments = match request.header.num_segments {
            Some(n) if n > 0 => n,
            _ => return Err(EbicsError::InvalidRequest("NumSegments must be positive".into())),
        };
        let transfer = request
            .body
            .data_transfer
            .as_ref()
            .ok_or_else(|| EbicsError::InvalidRequest("DataTransfer missing".into()))?;
        let encryption_info = transfer
            .data_encryption_info
            .as_ref()
            .ok_or_else(|| EbicsError::InvalidRequest("DataEncryptionInfo missing".into()))?;
        let signature_data = transfer
            .signature_data
            .as_ref()
            .ok_or_else(|| EbicsError::InvalidRequest("SignatureData missing".into()))?;

        // order signatures travel encrypted with the same transaction key as the order data
        let decryption_key = select_decryption_key(&encryption_info.encryption_pub_key_digest, &[&host.encryption_key])?;
        let transaction_key = decrypt_transaction_key(&encryption_info.transaction_key, decryption_key)?;
        let signature_plain = decompress(&decrypt_with_transaction_key(signature_data, &transaction_key)?)?;
        let signatures: UserSignatureData = parse_order_data(&signature_plain)?;

        let order_id = self.store.update_subscriber(id, |subscriber| {
            let number = subscriber.next_order_id;
            if check_order_id_overflow(number)? {
                return Err(EbicsError::OrderIdOverflow(number));
            }
            subscriber.next_order_id += 1;
            compute_order_id(number)
        })?;

        // the signatures live and die with the transaction, they are archived on completion
        let transaction_id = generate_transaction_id();
        self.store.create_transaction(TransactionRecord::Upload(UploadTransaction {
            transaction_id: transaction_id.clone(),
            subscriber: id.clone(),
            order_type: order_type.clone(),
            order_id: order_id.clone(),
            num_segments,
            encrypted_transaction_key: encryption_info.transaction_key.clone(),
            signatures: signatures
                .signatures
                .into_iter()
                .map(|signature| OrderSignature {
                    subscriber: id.clone(),
                    order_id: order_id.clone(),
                    order_type: order_type.clone(),
                    partner_id: signature.partner_id,
                    user_id: signature.user_id,
                    signature_algorithm: signature.signature_version,
                    signature_value: signature.signature_value,
                })
                .collect(),
            segments: Vec::new(),
            finished: false,
        }))?;
        info!("upload {transaction_id} of {order_type} order {order_id} for {id}, {num_segments} segment(s)");

        Ok(EbicsResponse::upload_initialisation(&transaction_id, &order_id))
    }

    fn upload_transfer(&self, host: &HostRecord, transaction_id: &str, request: &EbicsRequest) -> Result<EbicsResponse> {
        let segment = request
            .mutable
            .segment_number
            .ok_or_else(|| EbicsError::InvalidRequest("SegmentNumber missing".into()))?;
        let order_data = request
            .body
            .data_transfer
            .as_ref()
            .and_then(|transfer| transfer.order_data.clone())
            .ok_or_else(|| EbicsError::InvalidRequest("OrderData missing".into()))?;

        let (num_segments, order_id, completed) =
            self.store.update_transaction(transaction_id, |transaction| {
                let TransactionRecord::Upload(upload) = transaction else {
                    return Err(EbicsError::InvalidRequest("not an upload".into()));
                };
                accept_segment(upload, segment.number, segment.last_segment, order_data)?;
                let completed = upload.finished.then(|| CompletedUpload {
                    order_id: upload.order_id.clone(),
                    order_type: upload.order_type.clone(),
                    subscriber: upload.subscriber.clone(),
                    encrypted_transaction_key: upload.encrypted_transaction_key.clone(),
                    signatures: upload.signatures.clone(),
                    encoded_payload: reassemble(&upload.segments),
                });
                Ok((upload.num_segments, upload.order_id.clone(), completed))
            })?;

        if let Some(upload) = completed {
            self.complete_upload(host, upload)?;
        }
        Ok(EbicsResponse::upload_transfer(
            transaction_id,
            segment.number,
            num_segments,
            Some(&order_id),
        ))
    }

    /// Decrypts the reassembled order data and checks it against every signature of the upload.
    fn complete_upload(&self, host: &HostRecord, upload: CompletedUpload) -> Result<()> {
        let encrypted = base64_decode(&upload.encoded_payload)?;
        let payload = decompress(&decrypt_e002(
            &upload.encrypted_transaction_key,
            &encrypted,
            &host.encryption_key,
        )?)?;

        let signatures = upload.signatures;
        if signatures.is_empty() {
            return Err(EbicsError::InvalidRequest(format!(
                "no signatures for order {}",
                upload.order_id
            )));
        }
        for signature in &signatures {
            if signature.signature_algorithm != SIGNATURE_VERSION_A006 {
                return Err(EbicsError::NotImplemented(format!(
                    "signature algorithm {}",
                    signature.signature_algorithm
                )));
            }
            let signer = SubscriberId {
                host_id: host.host_id.clone(),
                partner_id: signature.partner_id.clone(),
                user_id: signature.user_id.clone(),
                system_id: None,
            };
            let signer_key = self.signature_key(&signer, &upload.subscriber)?;
            if !verify_a006(&signature.signature_value, &payload, &signer_key) {
                warn!("A006 signature of {signer} on order {} does not verify", upload.order_id);
                return Err(EbicsError::InvalidRequest(format!(
                    "order signature of {}/{} does not verify",
                    signature.partner_id, signature.user_id
                )));
            }
        }
        info!(
            "order {} verified with {} signature(s)",
            upload.order_id,
            signatures.len()
        );
        self.orders
            .upload(&upload.subscriber, &upload.order_type, &upload.order_id, payload)?;
        self.store.add_order_signatures(signatures)
    }

    /// The signer is usually the uploading subscriber, whose record may carry a system ID.
    fn signature_key(&self, signer: &SubscriberId, uploader: &SubscriberId) -> Result<RsaPublicKey> {
        let record = if signer.partner_id == uploader.partner_id && signer.user_id == uploader.user_id {
            self.store.subscriber(uploader)?
        } else {
            self.store.subscriber(signer)?
        };
        record
            .and_then(|record| record.keys.signature)
            .ok_or_else(|| EbicsError::rejected(EbicsReturnCode::SignerUnknown, format!("signer {signer} unknown")))
    }

    fn partner_info(&self, subscriber: &SubscriberRecord) -> Result<PartnerInfo> {
        let id = &subscriber.id;
        let partner = self.store.partner(&id.host_id, &id.partner_id)?;
        Ok(PartnerInfo {
            address: partner.as_ref().map(|p| p.address.clone()).unwrap_or_default(),
            host_id: id.host_id.clone(),
            accounts: partner.map(|p| p.accounts).unwrap_or_default(),
            orders: self.orders.supported_orders(),
        })
    }

    fn user_info(&self, subscriber: &SubscriberRecord) -> UserInfo {
        UserInfo {
            user_id: subscriber.id.user_id.clone(),
            status: subscriber.state.ebics_status(),
            name: subscriber.name.clone(),
            permissions: vec![Permission {
                authorisation_level: None,
                order_types: self
                    .orders
                    .supported_orders()
                    .into_iter()
                    .map(|order| order.order_type)
                    .collect(),
            }],
        }
    }

    fn htd(&self, subscriber: &SubscriberRecord) -> Result<HtdResponseOrderData> {
        Ok(HtdResponseOrderData {
            partner: self.partner_info(subscriber)?,
            user: self.user_info(subscriber),
        })
    }

    fn hkd(&self, subscriber: &SubscriberRecord) -> Result<HkdResponseOrderData> {
        let users = self
            .store
            .partner_subscribers(&subscriber.id.host_id, &subscriber.id.partner_id)?;
        Ok(HkdResponseOrderData {
            partner: self.partner_info(subscriber)?,
            users: users.iter().map(|user| self.user_info(user)).collect(),
        })
    }
}

/// Books segment `number` into `upload`, marking it finished with the last one.
fn accept_segment(upload: &mut UploadTransaction, number: u32, last_segment: bool, order_data: String) -> Result<()> {
    let expected = upload.last_seen_segment() + 1;
    if number == 0 || number > upload.num_segments {
        return Err(EbicsError::rejected(
            EbicsReturnCode::TxSegmentNumberExceeded,
            format!("segment {number} of {}", upload.num_segments),
        ));
    }
    if number < expected {
        return Err(EbicsError::rejected(
            EbicsReturnCode::TxMessageReplay,
            format!("segment {number} was already received"),
        ));
    }
    if number > expected {
        return Err(EbicsError::InvalidRequest(format!(
            "segment {expected} expected, got {number}"
        )));
    }
    if last_segment && number < upload.num_segments {
        return Err(EbicsError::rejected(
            EbicsReturnCode::TxSegmentNumberUnderrun,
            format!("last segment {number}, but {} announced", upload.num_segments),
        ));
    }
    upload.segments.push(order_data);
    upload.finished = number == upload.num_segments;
    Ok(())
}

fn check_identity(id: &SubscriberId, partner_id: &str, user_id: &str) -> Result<()> {
    if id.partner_id != partner_id || id.user_id != user_id {
        return Err(EbicsError::rejected(
            EbicsReturnCode::PartnerIdMismatch,
            format!("order data names {partner_id}/{user_id}, header {id}"),
        ));
    }
    Ok(())
}

fn check_bank_digests(host: &HostRecord, digests: Option<&BankPubKeyDigests>) -> Result<()> {
    let digests = digests.ok_or_else(|| EbicsError::InvalidRequest("BankPubKeyDigests missing".into()))?;
    let current = BankPubKeyDigests::new(
        public_key_hash(&host.authentication_public()),
        public_key_hash(&host.encryption_public()),
    );
    if *digests != current {
        return Err(EbicsError::rejected(
            EbicsReturnCode::BankPubkeyUpdateRequired,
            "bank keys changed, run HPB",
        ));
    }
    Ok(())
}

fn required_key<'a>(key: &'a Option<RsaPublicKey>, role: &str) -> Result<&'a RsaPublicKey> {
    key.as_ref()
        .ok_or_else(|| EbicsError::InvalidSubscriberState(format!("no {role} key on file")))
}

#[cfg(test)]
mod test_server;
