use super::*;
use crate::crypto::load_private_key_pem;
use crate::messages::{now, OrderDetails, ORDER_ATTRIBUTE_DOWNLOAD};
use rsa::RsaPrivateKey;

const BANK_X002_PEM: &str = include_str!("../../data/test/bank_x002.pem");
const BANK_E002_PEM: &str = include_str!("../../data/test/bank_e002.pem");
const USER_A006_PEM: &str = include_str!("../../data/test/user_a006.pem");
const USER_X002_PEM: &str = include_str!("../../data/test/user_x002.pem");
const USER_E002_PEM: &str = include_str!("../../data/test/user_e002.pem");
const STRANGER_PEM: &str = include_str!("../../data/test/stranger.pem");

fn key(pem: &str) -> RsaPrivateKey {
    load_private_key_pem(pem).unwrap()
}

fn subscriber_id() -> SubscriberId {
    SubscriberId::new("EBIXHOST", "PARTNER1", "USER1")
}

fn sandbox() -> EbicsHost<MemoryStore, MemoryOrderHandler> {
    let store = MemoryStore::new();
    store
        .add_host(HostRecord {
            host_id: "EBIXHOST".to_string(),
            authentication_key: key(BANK_X002_PEM),
            encryption_key: key(BANK_E002_PEM),
        })
        .unwrap();
    store.add_subscriber(SubscriberRecord::new(subscriber_id())).unwrap();
    EbicsHost::new(HostConfig::default(), store, MemoryOrderHandler::default())
}

/// A sandbox whose subscriber went through INI and HIA already.
fn initialized_sandbox() -> EbicsHost<MemoryStore, MemoryOrderHandler> {
    let host = sandbox();
    host.store()
        .update_subscriber(&subscriber_id(), |s| {
            s.state = SubscriberState::Initialized;
            s.keys = SubscriberPublicKeys {
                signature: Some(key(USER_A006_PEM).to_public_key()),
                authentication: Some(key(USER_X002_PEM).to_public_key()),
                encryption: Some(key(USER_E002_PEM).to_public_key()),
            };
            s.name = Some("Erika Mustermann".to_string());
            Ok(())
        })
        .unwrap();
    host
}

fn bank_digests() -> BankPubKeyDigests {
    BankPubKeyDigests::new(
        public_key_hash(&key(BANK_X002_PEM).to_public_key()),
        public_key_hash(&key(BANK_E002_PEM).to_public_key()),
    )
}

fn signed(message: &impl XmlMessage, signer: &RsaPrivateKey) -> String {
    let mut document = message.to_document();
    signature::sign(&mut document, signer).unwrap();
    document.to_xml()
}

fn post_request(host: &EbicsHost<MemoryStore, MemoryOrderHandler>, request: &EbicsRequest) -> EbicsResponse {
    let answer = host.handle(&signed(request, &key(USER_X002_PEM))).unwrap();
    let document = Document::parse(&answer).unwrap();
    assert!(signature::verify(&document, &key(BANK_X002_PEM).to_public_key()).unwrap());
    EbicsResponse::from_document(&document).unwrap()
}

fn decrypt_order_data(transfer: &ResponseDataTransfer, segments: &[String]) -> Vec<u8> {
    let info = transfer.data_encryption_info.as_ref().unwrap();
    let encrypted = base64_decode(&reassemble(segments)).unwrap();
    decompress(&decrypt_e002(&info.transaction_key, &encrypted, &key(USER_E002_PEM)).unwrap()).unwrap()
}

fn ini_request() -> EbicsUnsecuredRequest {
    let id = subscriber_id();
    EbicsUnsecuredRequest::ini(
        &id,
        None,
        &SignaturePubKeyOrderData {
            signature_pub_key: PubKeyValue::from_public_key(&key(USER_A006_PEM).to_public_key(), Some(now())),
            partner_id: id.partner_id.clone(),
            user_id: id.user_id.clone(),
        },
    )
    .unwrap()
}

fn hia_request() -> EbicsUnsecuredRequest {
    let id = subscriber_id();
    EbicsUnsecuredRequest::hia(
        &id,
        None,
        &HiaRequestOrderData {
            authentication_pub_key: PubKeyValue::from_public_key(&key(USER_X002_PEM).to_public_key(), None),
            encryption_pub_key: PubKeyValue::from_public_key(&key(USER_E002_PEM).to_public_key(), None),
            partner_id: id.partner_id.clone(),
            user_id: id.user_id.clone(),
        },
    )
    .unwrap()
}

fn key_management(host: &EbicsHost<MemoryStore, MemoryOrderHandler>, xml: &str) -> EbicsKeyManagementResponse {
    EbicsKeyManagementResponse::from_xml(&host.handle(xml).unwrap()).unwrap()
}

fn state(host: &EbicsHost<MemoryStore, MemoryOrderHandler>) -> SubscriberState {
    host.store().subscriber(&subscriber_id()).unwrap().unwrap().state
}

#[test]
fn test_hev_lists_versions() {
    let host = sandbox();
    let answer = host
        .handle(&HevRequest { host_id: "EBIXHOST".into() }.to_xml())
        .unwrap();
    let response = HevResponse::from_xml(&answer).unwrap();
    assert_eq!(response.return_code, EbicsReturnCode::Ok);
    assert_eq!(response.versions, host.config().versions);

    let answer = host
        .handle(&HevRequest { host_id: "NOBANK".into() }.to_xml())
        .unwrap();
    let response = HevResponse::from_xml(&answer).unwrap();
    assert_eq!(response.return_code, EbicsReturnCode::InvalidHostId);
    assert!(response.versions.is_empty());
}

#[test]
fn test_unknown_message_is_not_implemented() {
    let host = sandbox();
    assert!(matches!(
        host.handle(r#"<ebicsFooRequest xmlns="urn:org:ebics:H004"/>"#),
        Err(EbicsError::NotImplemented(_))
    ));
    assert!(host.handle("not xml at all").is_err());
}

#[test]
fn test_ini_then_hia_initializes() {
    let host = sandbox();

    let response = key_management(&host, &ini_request().to_xml());
    assert_eq!(response.technical_return_code, EbicsReturnCode::Ok);
    assert_eq!(state(&host), SubscriberState::PartiallyInitializedIni);

    // a repeated INI keeps the state
    key_management(&host, &ini_request().to_xml());
    assert_eq!(state(&host), SubscriberState::PartiallyInitializedIni);

    let response = key_management(&host, &hia_request().to_xml());
    assert_eq!(response.technical_return_code, EbicsReturnCode::Ok);
    assert_eq!(state(&host), SubscriberState::Initialized);

    let record = host.store().subscriber(&subscriber_id()).unwrap().unwrap();
    assert_eq!(record.keys.signature, Some(key(USER_A006_PEM).to_public_key()));
    assert_eq!(record.keys.encryption, Some(key(USER_E002_PEM).to_public_key()));

    assert_eq!(host.confirm_subscriber(&subscriber_id()).unwrap(), SubscriberState::Ready);
}

#[test]
fn test_key_management_rejections() {
    let host = sandbox();
    let mut request = ini_request();
    request.user_id = "NOBODY".to_string();
    let response = key_management(&host, &request.to_xml());
    // the order data still names USER1
    assert_eq!(response.technical_return_code, EbicsReturnCode::PartnerIdMismatch);

    let mut request = hia_request();
    request.host_id = "NOBANK".to_string();
    let response = key_management(&host, &request.to_xml());
    assert_eq!(response.technical_return_code, EbicsReturnCode::InvalidHostId);
}

#[test]
fn test_hpb_requires_initialized_subscriber() {
    let host = sandbox();
    key_management(&host, &ini_request().to_xml());

    let hpb = EbicsNoPubKeyDigestsRequest::hpb(&subscriber_id(), None);
    let response = key_management(&host, &signed(&hpb, &key(USER_X002_PEM)));
    assert_eq!(response.technical_return_code, EbicsReturnCode::InvalidUserOrUserState);
    assert!(response.data_transfer.is_none());
}

#[test]
fn test_hpb_returns_encrypted_bank_keys() {
    let host = initialized_sandbox();
    let hpb = EbicsNoPubKeyDigestsRequest::hpb(&subscriber_id(), None);
    let response = key_management(&host, &signed(&hpb, &key(USER_X002_PEM)));
    assert_eq!(response.technical_return_code, EbicsReturnCode::Ok);

    let transfer = response.data_transfer.unwrap();
    let plain = decrypt_order_data(&transfer, &[transfer.order_data.clone()]);
    let keys: HpbResponseOrderData = parse_order_data(&plain).unwrap();
    assert_eq!(keys.host_id, "EBIXHOST");
    assert_eq!(
        keys.authentication_pub_key.to_public_key().unwrap(),
        key(BANK_X002_PEM).to_public_key()
    );
    assert_eq!(
        keys.encryption_pub_key.to_public_key().unwrap(),
        key(BANK_E002_PEM).to_public_key()
    );
}

#[test]
fn test_hpb_with_wrong_authentication_key() {
    let host = initialized_sandbox();
    let hpb = EbicsNoPubKeyDigestsRequest::hpb(&subscriber_id(), None);
    let response = key_management(&host, &signed(&hpb, &key(STRANGER_PEM)));
    assert_eq!(response.technical_return_code, EbicsReturnCode::AuthenticationFailed);
}

#[test]
fn test_htd_download_is_generated() {
    let host = initialized_sandbox();
    let request = EbicsRequest::download_initialisation(
        &subscriber_id(),
        None,
        OrderDetails::new("HTD", ORDER_ATTRIBUTE_DOWNLOAD, None),
        bank_digests(),
    );
    let response = post_request(&host, &request);
    assert_eq!(response.technical_return_code, EbicsReturnCode::Ok);
    assert_eq!(response.num_segments, Some(1));

    let transfer = response.data_transfer.unwrap();
    let plain = decrypt_order_data(&transfer, &[transfer.order_data.clone()]);
    let htd: HtdResponseOrderData = parse_order_data(&plain).unwrap();
    assert_eq!(htd.partner.host_id, "EBIXHOST");
    assert_eq!(htd.user.user_id, "USER1");
    assert_eq!(htd.user.name.as_deref(), Some("Erika Mustermann"));
    assert_eq!(htd.user.status, SubscriberState::Initialized.ebics_status());
    assert!(htd
        .partner
        .orders
        .iter()
        .any(|o| o.order_type == "CCT" && o.transfer_type == TRANSFER_TYPE_UPLOAD));
}

#[test]
fn test_hkd_lists_partner_accounts_and_users() {
    use crate::messages::{AccountInfo, AddressInfo};

    let host = initialized_sandbox();
    host.store()
        .add_partner(PartnerRecord {
            host_id: "EBIXHOST".to_string(),
            partner_id: "PARTNER1".to_string(),
            address: AddressInfo {
                name: Some("Mustermann GmbH".to_string()),
                city: Some("Berlin".to_string()),
                ..AddressInfo::default()
            },
            accounts: vec![AccountInfo {
                id: "acc1".to_string(),
                currency: "EUR".to_string(),
                description: None,
                iban: "DE89370400440532013000".to_string(),
                bic: "COBADEFFXXX".to_string(),
                account_holder: Some("Mustermann GmbH".to_string()),
            }],
        })
        .unwrap();
    host.store()
        .add_subscriber(SubscriberRecord::new(SubscriberId::new("EBIXHOST", "PARTNER1", "USER2")))
        .unwrap();
    host.store()
        .add_subscriber(SubscriberRecord::new(SubscriberId::new("EBIXHOST", "OTHER", "USER3")))
        .unwrap();

    let request = EbicsRequest::download_initialisation(
        &subscriber_id(),
        None,
        OrderDetails::new("HKD", ORDER_ATTRIBUTE_DOWNLOAD, None),
        bank_digests(),
    );
    let response = post_request(&host, &request);
    assert_eq!(response.technical_return_code, EbicsReturnCode::Ok);

    let transfer = response.data_transfer.unwrap();
    let plain = decrypt_order_data(&transfer, &[transfer.order_data.clone()]);
    let hkd: HkdResponseOrderData = parse_order_data(&plain).unwrap();
    assert_eq!(hkd.partner.address.name.as_deref(), Some("Mustermann GmbH"));
    assert_eq!(hkd.partner.accounts.len(), 1);
    assert_eq!(hkd.partner.accounts[0].iban, "DE89370400440532013000");
    let users: Vec<_> = hkd.users.iter().map(|u| u.user_id.as_str()).collect();
    assert_eq!(users, ["USER1", "USER2"]);
    assert_eq!(hkd.users[1].status, SubscriberState::New.ebics_status());
}

#[test]
fn test_download_without_data_is_a_bank_error() {
    let host = initialized_sandbox();
    host.orders().offer_download("C53").unwrap();
    let request = EbicsRequest::download_initialisation(
        &subscriber_id(),
        None,
        OrderDetails::new("C53", ORDER_ATTRIBUTE_DOWNLOAD, None),
        bank_digests(),
    );
    let response = post_request(&host, &request);
    assert_eq!(response.technical_return_code, EbicsReturnCode::Ok);
    assert_eq!(response.bank_return_code, EbicsReturnCode::NoDownloadDataAvailable);
    assert!(response.transaction_id.is_none());

    let request = EbicsRequest::download_initialisation(
        &subscriber_id(),
        None,
        OrderDetails::new("Z01", ORDER_ATTRIBUTE_DOWNLOAD, None),
        bank_digests(),
    );
    let response = post_request(&host, &request);
    assert_eq!(response.technical_return_code, EbicsReturnCode::UnsupportedOrderType);
}

#[test]
fn test_download_segments_and_receipt() {
    let host = EbicsHost::new(
        HostConfig {
            segment_size: 512,
            ..HostConfig::default()
        },
        initialized_sandbox().store,
        MemoryOrderHandler::default(),
    );
    // key bytes do not compress, so the payload spans several segments
    let statement = crate::crypto::encode_private_key(&key(STRANGER_PEM)).unwrap();
    host.orders().add_download("C53", statement.clone()).unwrap();

    let request = EbicsRequest::download_initialisation(
        &subscriber_id(),
        None,
        OrderDetails::new("C53", ORDER_ATTRIBUTE_DOWNLOAD, None),
        bank_digests(),
    );
    let first = post_request(&host, &request);
    let num_segments = first.num_segments.unwrap();
    assert!(num_segments > 1);
    let transaction_id = first.transaction_id.clone().unwrap();
    let transfer = first.data_transfer.unwrap();

    let mut segments = vec![transfer.order_data.clone()];
    for n in 2..=num_segments {
        let response = post_request(
            &host,
            &EbicsRequest::download_transfer("EBIXHOST", &transaction_id, n, num_segments),
        );
        assert_eq!(response.segment_number.unwrap().last_segment, n == num_segments);
        segments.push(response.data_transfer.unwrap().order_data);
    }
    assert_eq!(decrypt_order_data(&transfer, &segments), statement);

    let exceeded = post_request(
        &host,
        &EbicsRequest::download_transfer("EBIXHOST", &transaction_id, num_segments + 1, num_segments),
    );
    assert_eq!(exceeded.technical_return_code, EbicsReturnCode::TxSegmentNumberExceeded);

    let receipt = post_request(&host, &EbicsRequest::download_receipt("EBIXHOST", &transaction_id, 0));
    assert_eq!(receipt.technical_return_code, EbicsReturnCode::DownloadPostprocessDone);

    // the transaction is over, and the statement was consumed
    let again = post_request(&host, &EbicsRequest::download_receipt("EBIXHOST", &transaction_id, 0));
    assert_eq!(again.technical_return_code, EbicsReturnCode::TxUnknownTxid);
    let request = EbicsRequest::download_initialisation(
        &subscriber_id(),
        None,
        OrderDetails::new("C53", ORDER_ATTRIBUTE_DOWNLOAD, None),
        bank_digests(),
    );
    assert_eq!(
        post_request(&host, &request).bank_return_code,
        EbicsReturnCode::NoDownloadDataAvailable
    );
}

#[test]
fn test_outdated_bank_digests() {
    let host = initialized_sandbox();
    let stranger = public_key_hash(&key(STRANGER_PEM).to_public_key());
    let request = EbicsRequest::download_initialisation(
        &subscriber_id(),
        None,
        OrderDetails::new("HTD", ORDER_ATTRIBUTE_DOWNLOAD, None),
        BankPubKeyDigests::new(stranger, stranger),
    );
    let response = post_request(&host, &request);
    assert_eq!(response.technical_return_code, EbicsReturnCode::BankPubkeyUpdateRequired);
}

#[test]
fn test_unknown_transaction() {
    let host = initialized_sandbox();
    let response = post_request(
        &host,
        &EbicsRequest::download_transfer("EBIXHOST", "00112233445566778899AABBCCDDEEFF", 2, 3),
    );
    assert_eq!(response.technical_return_code, EbicsReturnCode::TxUnknownTxid);
    assert_eq!(response.phase, TransactionPhase::Transfer);
}

#[test]
fn test_invalid_request_gets_signed_error() {
    let host = initialized_sandbox();
    let request = EbicsRequest::download_receipt("EBIXHOST", "00112233445566778899AABBCCDDEEFF", 0);
    let mut document = request.to_document();
    // <body> before <AuthSignature>
    document.root.children.swap(1, 2);
    let answer = host.handle(&document.to_xml()).unwrap();
    let answer = Document::parse(&answer).unwrap();
    assert!(signature::verify(&answer, &key(BANK_X002_PEM).to_public_key()).unwrap());
    let response = EbicsResponse::from_document(&answer).unwrap();
    assert_eq!(response.technical_return_code, EbicsReturnCode::InvalidXml);
}

fn upload(num_segments: u32) -> UploadTransaction {
    UploadTransaction {
        transaction_id: "T1".to_string(),
        subscriber: subscriber_id(),
        order_type: "CCT".to_string(),
        order_id: "OR01".to_string(),
        num_segments,
        encrypted_transaction_key: Vec::new(),
        signatures: Vec::new(),
        segments: Vec::new(),
        finished: false,
    }
}

fn rejected_with(result: Result<()>) -> EbicsReturnCode {
    result.unwrap_err().return_code()
}

#[test]
fn test_upload_segment_order() {
    let mut tx = upload(3);
    assert_eq!(
        rejected_with(accept_segment(&mut tx, 0, false, "a".into())),
        EbicsReturnCode::TxSegmentNumberExceeded
    );
    assert_eq!(
        rejected_with(accept_segment(&mut tx, 4, true, "a".into())),
        EbicsReturnCode::TxSegmentNumberExceeded
    );
    assert_eq!(
        rejected_with(accept_segment(&mut tx, 2, false, "b".into())),
        EbicsReturnCode::InvalidRequest
    );

    accept_segment(&mut tx, 1, false, "a".into()).unwrap();
    assert_eq!(
        rejected_with(accept_segment(&mut tx, 1, false, "a".into())),
        EbicsReturnCode::TxMessageReplay
    );
    assert_eq!(
        rejected_with(accept_segment(&mut tx, 2, true, "b".into())),
        EbicsReturnCode::TxSegmentNumberUnderrun
    );

    accept_segment(&mut tx, 2, false, "b".into()).unwrap();
    assert!(!tx.finished);
    accept_segment(&mut tx, 3, true, "c".into()).unwrap();
    assert!(tx.finished);
    assert_eq!(reassemble(&tx.segments), "abc");
}
