use super::*;
use crate::crypto::load_private_key_pem;
use crate::return_code::EbicsReturnCode;
use crate::subscriber::SubscriberId;

const USER_A006_PEM: &str = include_str!("../../data/test/user_a006.pem");
const USER_X002_PEM: &str = include_str!("../../data/test/user_x002.pem");

fn subscriber() -> SubscriberId {
    SubscriberId::new("EBIXHOST", "PARTNER1", "USER1").with_system_id("SYS1")
}

fn product() -> Option<Product> {
    Some(Product {
        language: "de".to_string(),
        name: "Test Client".to_string(),
    })
}

fn digests() -> BankPubKeyDigests {
    BankPubKeyDigests::new([0xAB; 32], [0x01; 32])
}

#[test]
fn test_download_initialisation_round_trip() {
    let params = OrderParams::Standard {
        date_range: Some(DateRange {
            start: parse_date("2023-11-01").unwrap(),
            end: parse_date("2023-11-30").unwrap(),
        }),
    };
    let request = EbicsRequest::download_initialisation(
        &subscriber(),
        product(),
        OrderDetails::new("C53", ORDER_ATTRIBUTE_UPLOAD, Some(params)),
        digests(),
    );
    // the builder fixes the attribute for downloads
    assert_eq!(
        request.header.order_details.as_ref().unwrap().order_attribute,
        ORDER_ATTRIBUTE_DOWNLOAD
    );

    let xml = request.to_xml();
    assert!(xml.contains("<TransactionPhase>Initialisation</TransactionPhase>"));
    assert!(xml.contains("<SystemID>SYS1</SystemID>"));
    let decoded = EbicsRequest::from_xml(&xml).unwrap();
    assert_eq!(decoded, request);
    assert_eq!(decoded.order_type(), Some("C53"));
    assert_eq!(decoded.transaction_id(), None);
}

#[test]
fn test_upload_requests_round_trip() {
    let init = EbicsRequest::upload_initialisation(
        &subscriber(),
        None,
        OrderDetails::new("CCT", ORDER_ATTRIBUTE_DOWNLOAD, Some(OrderParams::Generic(vec![(
            "Format".to_string(),
            "pain.001.001.03".to_string(),
        )]))),
        digests(),
        3,
        DataEncryptionInfo::new(&[7u8; 32], &[1, 2, 3, 4]),
        vec![9, 8, 7],
    );
    let decoded = EbicsRequest::from_xml(&init.to_xml()).unwrap();
    assert_eq!(decoded, init);
    assert_eq!(decoded.header.num_segments, Some(3));
    assert_eq!(
        decoded.header.order_details.unwrap().order_attribute,
        ORDER_ATTRIBUTE_UPLOAD
    );

    let transfer = EbicsRequest::upload_transfer("EBIXHOST", "0123456789ABCDEF0123456789ABCDEF", 3, 3, "QUJD".into());
    let decoded = EbicsRequest::from_xml(&transfer.to_xml()).unwrap();
    assert_eq!(decoded, transfer);
    assert!(decoded.mutable.segment_number.unwrap().last_segment);

    let receipt = EbicsRequest::download_receipt("EBIXHOST", "0123456789ABCDEF0123456789ABCDEF", 1);
    assert_eq!(EbicsRequest::from_xml(&receipt.to_xml()).unwrap().body.receipt_code, Some(1));
}

#[test]
fn test_authenticated_elements() {
    let request = EbicsRequest::download_receipt("EBIXHOST", "0123456789ABCDEF0123456789ABCDEF", 0);
    let document = request.to_document();
    let authenticated: Vec<_> = document
        .root
        .descendants()
        .into_iter()
        .filter(|e| e.attr("authenticate") == Some("true"))
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(authenticated, vec!["header", "TransferReceipt"]);
}

#[test]
fn test_element_order_is_enforced() {
    let request = EbicsRequest::download_transfer("EBIXHOST", "0123456789ABCDEF0123456789ABCDEF", 2, 4);
    let mut document = request.to_document();
    let header = document.root.child_mut("header").unwrap();
    header.children.swap(0, 1);
    assert!(matches!(
        EbicsRequest::from_document(&document),
        Err(EbicsError::InvalidXml(_))
    ));

    let mut document = request.to_document();
    document.root.child_mut("body").unwrap().children.push(crate::xml::Node::Element(Element::new("Extra")));
    assert!(matches!(
        EbicsRequest::from_document(&document),
        Err(EbicsError::InvalidXml(_))
    ));
}

#[test]
fn test_wrong_namespace_or_version() {
    let xml = EbicsRequest::download_receipt("EBIXHOST", "00", 0).to_xml();
    let foreign = xml.replace("urn:org:ebics:H004", "urn:org:ebics:H005");
    assert!(matches!(EbicsRequest::from_xml(&foreign), Err(EbicsError::InvalidXml(_))));

    let old = xml.replace("Version=\"H004\"", "Version=\"H003\"");
    assert!(matches!(EbicsRequest::from_xml(&old), Err(EbicsError::InvalidXml(_))));

    // children are namespace qualified too
    let prefixed = xml
        .replace("<header ", "<x:header xmlns:x=\"urn:evil\" ")
        .replace("</header>", "</x:header>");
    assert!(matches!(EbicsRequest::from_xml(&prefixed), Err(EbicsError::InvalidXml(_))));
    let redeclared = xml.replace("<header ", "<header xmlns=\"urn:evil\" ");
    assert!(matches!(EbicsRequest::from_xml(&redeclared), Err(EbicsError::InvalidXml(_))));
    // an explicit prefix for the right namespace is fine
    let aliased = xml
        .replace("<header ", "<h:header xmlns:h=\"urn:org:ebics:H004\" ")
        .replace("</header>", "</h:header>");
    assert!(EbicsRequest::from_xml(&aliased).is_ok());

    let key = load_private_key_pem(USER_X002_PEM).unwrap().to_public_key();
    let hia = HiaRequestOrderData {
        authentication_pub_key: PubKeyValue::from_public_key(&key, None),
        encryption_pub_key: PubKeyValue::from_public_key(&key, None),
        partner_id: "PARTNER1".to_string(),
        user_id: "USER1".to_string(),
    }
    .to_xml();
    let unqualified = hia.replace("ds:RSAKeyValue", "RSAKeyValue");
    assert!(matches!(
        HiaRequestOrderData::from_xml(&unqualified),
        Err(EbicsError::InvalidXml(_))
    ));
}

#[test]
fn test_authenticate_markers_are_required() {
    let receipt = EbicsRequest::download_receipt("EBIXHOST", "0123456789ABCDEF0123456789ABCDEF", 0).to_xml();
    let unmarked = receipt.replace("<header authenticate=\"true\">", "<header>");
    assert!(matches!(EbicsRequest::from_xml(&unmarked), Err(EbicsError::InvalidXml(_))));
    let unmarked = receipt.replace("<TransferReceipt authenticate=\"true\">", "<TransferReceipt>");
    assert!(matches!(EbicsRequest::from_xml(&unmarked), Err(EbicsError::InvalidXml(_))));
    let falsified = receipt.replace("<TransferReceipt authenticate=\"true\">", "<TransferReceipt authenticate=\"false\">");
    assert!(matches!(EbicsRequest::from_xml(&falsified), Err(EbicsError::InvalidXml(_))));

    let init = EbicsRequest::upload_initialisation(
        &subscriber(),
        None,
        OrderDetails::new("CCT", ORDER_ATTRIBUTE_UPLOAD, None),
        digests(),
        1,
        DataEncryptionInfo::new(&[7u8; 32], &[1, 2, 3, 4]),
        vec![9, 8, 7],
    )
    .to_xml();
    for name in ["DataEncryptionInfo", "SignatureData"] {
        let unmarked = init.replace(&format!("<{name} authenticate=\"true\">"), &format!("<{name}>"));
        assert_ne!(unmarked, init);
        assert!(matches!(EbicsRequest::from_xml(&unmarked), Err(EbicsError::InvalidXml(_))));
    }

    let response = EbicsResponse::bank_error(TransactionPhase::Initialisation, None, EbicsReturnCode::NoDownloadDataAvailable)
        .to_xml();
    let unmarked = response.replace("<ReturnCode authenticate=\"true\">", "<ReturnCode>");
    assert_ne!(unmarked, response);
    assert!(matches!(EbicsResponse::from_xml(&unmarked), Err(EbicsError::InvalidXml(_))));
}

#[test]
fn test_responses_round_trip() {
    let download = EbicsResponse::download_initialisation(
        "0123456789ABCDEF0123456789ABCDEF",
        2,
        DataEncryptionInfo::new(&[3u8; 32], &[4u8; 8]),
        "c2VnbWVudA==".to_string(),
    );
    let decoded = EbicsResponse::from_xml(&download.to_xml()).unwrap();
    assert_eq!(decoded, download);
    assert!(!decoded.segment_number.unwrap().last_segment);

    let error = EbicsResponse::technical_error(
        TransactionPhase::Transfer,
        Some("0123456789ABCDEF0123456789ABCDEF"),
        EbicsReturnCode::TxSegmentNumberExceeded,
        EbicsReturnCode::TxSegmentNumberExceeded.report_text(),
    );
    let decoded = EbicsResponse::from_xml(&error.to_xml()).unwrap();
    assert_eq!(decoded.technical_return_code, EbicsReturnCode::TxSegmentNumberExceeded);
    assert_eq!(decoded.bank_return_code, EbicsReturnCode::Ok);
    assert_eq!(decoded.report_text, "[EBICS_TX_SEGMENT_NUMBER_EXCEEDED] Request failed");

    let declined = EbicsResponse::bank_error(
        TransactionPhase::Initialisation,
        None,
        EbicsReturnCode::NoDownloadDataAvailable,
    );
    let decoded = EbicsResponse::from_xml(&declined.to_xml()).unwrap();
    assert!(decoded.technical_return_code.is_ok());
    assert_eq!(decoded.bank_return_code, EbicsReturnCode::NoDownloadDataAvailable);
}

#[test]
fn test_unknown_return_code_fails() {
    let xml = EbicsResponse::receipt("0123456789ABCDEF0123456789ABCDEF", EbicsReturnCode::DownloadPostprocessDone)
        .to_xml()
        .replace(">011000<", ">011999<");
    assert!(matches!(
        EbicsResponse::from_xml(&xml),
        Err(EbicsError::UnknownReturnCode(code)) if code == "011999"
    ));
}

#[test]
fn test_ini_carries_signature_key() {
    let key = load_private_key_pem(USER_A006_PEM).unwrap().to_public_key();
    let order_data = SignaturePubKeyOrderData {
        signature_pub_key: PubKeyValue::from_public_key(&key, Some(now())),
        partner_id: "PARTNER1".to_string(),
        user_id: "USER1".to_string(),
    };
    let request = EbicsUnsecuredRequest::ini(&subscriber(), product(), &order_data).unwrap();
    assert_eq!(request.order_details.order_attribute, ORDER_ATTRIBUTE_UNSECURED);

    let decoded = EbicsUnsecuredRequest::from_xml(&request.to_xml()).unwrap();
    assert_eq!(decoded.order_type(), "INI");
    let carried: SignaturePubKeyOrderData = decoded.decode_order_data().unwrap();
    assert_eq!(carried, order_data);
    assert_eq!(carried.signature_pub_key.to_public_key().unwrap(), key);

    // HIA order data is not INI order data
    assert!(decoded.decode_order_data::<HiaRequestOrderData>().is_err());
}

#[test]
fn test_hpb_request_round_trip() {
    let request = EbicsNoPubKeyDigestsRequest::hpb(&subscriber(), None);
    assert_eq!(request.nonce.len(), 16);
    let decoded = EbicsNoPubKeyDigestsRequest::from_xml(&request.to_xml()).unwrap();
    assert_eq!(decoded, request);
    assert_eq!(decoded.order_details.order_type, "HPB");
}

#[test]
fn test_key_management_response() {
    let response = EbicsKeyManagementResponse::with_data(ResponseDataTransfer {
        data_encryption_info: Some(DataEncryptionInfo::new(&[5u8; 32], &[6u8; 16])),
        order_data: "b3JkZXI=".to_string(),
    });
    let xml = response.to_xml();
    assert!(!xml.contains("AuthSignature"));
    assert_eq!(EbicsKeyManagementResponse::from_xml(&xml).unwrap(), response);
}

#[test]
fn test_hev_round_trip() {
    let response = HevResponse::new(vec![
        VersionSpec {
            protocol: "H003".to_string(),
            version: "02.40".to_string(),
        },
        VersionSpec {
            protocol: "H004".to_string(),
            version: "02.50".to_string(),
        },
    ]);
    let xml = response.to_xml();
    assert!(xml.contains(r#"<VersionNumber ProtocolVersion="H004">02.50</VersionNumber>"#));
    assert_eq!(HevResponse::from_xml(&xml).unwrap(), response);

    let request = HevRequest {
        host_id: "EBIXHOST".to_string(),
    };
    assert_eq!(HevRequest::from_xml(&request.to_xml()).unwrap(), request);
}

#[test]
fn test_user_signature_data() {
    let signatures = UserSignatureData {
        signatures: vec![OrderSignatureData {
            signature_version: SIGNATURE_VERSION_A006.to_string(),
            signature_value: vec![1, 2, 3],
            partner_id: "PARTNER1".to_string(),
            user_id: "USER1".to_string(),
        }],
    };
    let parsed: UserSignatureData = parse_order_data(signatures.to_xml().as_bytes()).unwrap();
    assert_eq!(parsed, signatures);

    let empty = UserSignatureData { signatures: vec![] }.to_xml();
    assert!(matches!(UserSignatureData::from_xml(&empty), Err(EbicsError::InvalidXml(_))));
}

#[test]
fn test_hia_and_hpb_order_data() {
    let key = load_private_key_pem(USER_X002_PEM).unwrap().to_public_key();
    let hia = HiaRequestOrderData {
        authentication_pub_key: PubKeyValue::from_public_key(&key, None),
        encryption_pub_key: PubKeyValue::from_public_key(&key, Some(now())),
        partner_id: "PARTNER1".to_string(),
        user_id: "USER1".to_string(),
    };
    let xml = hia.to_xml();
    assert!(xml.contains("<AuthenticationVersion>X002</AuthenticationVersion>"));
    assert!(xml.contains("<EncryptionVersion>E002</EncryptionVersion>"));
    assert_eq!(HiaRequestOrderData::from_xml(&xml).unwrap(), hia);

    let hpb = HpbResponseOrderData {
        authentication_pub_key: PubKeyValue::from_public_key(&key, None),
        encryption_pub_key: PubKeyValue::from_public_key(&key, None),
        host_id: "EBIXHOST".to_string(),
    };
    assert_eq!(HpbResponseOrderData::from_xml(&hpb.to_xml()).unwrap(), hpb);
}

#[test]
fn test_htd_order_data() {
    let htd = HtdResponseOrderData {
        partner: PartnerInfo {
            address: AddressInfo {
                name: Some("Foo Bar Corp".to_string()),
                city: Some("Zürich".to_string()),
                country: Some("CH".to_string()),
                ..AddressInfo::default()
            },
            host_id: "EBIXHOST".to_string(),
            accounts: vec![AccountInfo {
                id: "acc1".to_string(),
                currency: "CHF".to_string(),
                description: Some("Main account".to_string()),
                iban: "CH9300762011623852957".to_string(),
                bic: "POFICHBEXXX".to_string(),
                account_holder: Some("Foo Bar Corp".to_string()),
            }],
            orders: vec![OrderInfo {
                order_type: "C53".to_string(),
                transfer_type: "Download".to_string(),
                description: Some("camt.053 statements".to_string()),
            }],
        },
        user: UserInfo {
            user_id: "USER1".to_string(),
            status: 1,
            name: None,
            permissions: vec![Permission {
                authorisation_level: Some("E".to_string()),
                order_types: vec!["C53".to_string(), "CCT".to_string()],
            }],
        },
    };
    let xml = htd.to_xml();
    assert!(xml.contains("<OrderTypes>C53 CCT</OrderTypes>"));
    assert_eq!(HtdResponseOrderData::from_xml(&xml).unwrap(), htd);
}

#[test]
fn test_timestamps() {
    let t = parse_timestamp("2023-11-30T10:15:00.123Z").unwrap();
    assert_eq!(format_timestamp(t), "2023-11-30T10:15:00.123Z");
    // without a zone the value is UTC
    assert_eq!(parse_timestamp("2023-11-30T10:15:00.123").unwrap(), t);
    assert_eq!(
        format_timestamp(parse_timestamp("2023-11-30T11:15:00+01:00").unwrap()),
        "2023-11-30T10:15:00.000Z"
    );
    assert!(parse_timestamp("yesterday").is_err());
    assert_eq!(format_date(parse_date("2023-02-28").unwrap()), "2023-02-28");
}
