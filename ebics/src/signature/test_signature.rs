use super::*;
use crate::crypto::load_private_key_pem;

const USER_X002_PEM: &str = include_str!("../../data/test/user_x002.pem");
const STRANGER_PEM: &str = include_str!("../../data/test/stranger.pem");

const UNSIGNED_REQUEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ebicsRequest xmlns="urn:org:ebics:H004" Version="H004" Revision="1">
  <header authenticate="true">
    <static><HostID>EBIXHOST</HostID><TransactionID>4F2B44A6B3D1A0F7AA2F3E1B9E1D2C3B</TransactionID></static>
    <mutable><TransactionPhase>Transfer</TransactionPhase><SegmentNumber lastSegment="true">1</SegmentNumber></mutable>
  </header>
  <AuthSignature/>
  <body><DataTransfer><OrderData>AAAA</OrderData></DataTransfer></body>
</ebicsRequest>"#;

fn signed() -> Document {
    let key = load_private_key_pem(USER_X002_PEM).unwrap();
    let mut document = Document::parse(UNSIGNED_REQUEST).unwrap();
    sign(&mut document, &key).unwrap();
    // what goes over the wire
    Document::parse(&document.to_xml()).unwrap()
}

fn public_key() -> RsaPublicKey {
    load_private_key_pem(USER_X002_PEM).unwrap().to_public_key()
}

fn element_mut<'a>(element: &'a mut Element, path: &[&str]) -> &'a mut Element {
    path.iter()
        .fold(element, |current, name| current.child_mut(name).unwrap())
}

#[test]
fn test_sign_splices_signature_into_auth_signature() {
    let document = signed();
    let auth_signature = document.root.child("AuthSignature").unwrap();
    let names: Vec<String> = auth_signature.elements().map(Element::qualified_name).collect();
    assert_eq!(names, ["ds:SignedInfo", "ds:SignatureValue"]);

    let reference = auth_signature.child("SignedInfo").unwrap().child("Reference").unwrap();
    assert_eq!(reference.attr("URI"), Some("#xpointer(//*[@authenticate='true'])"));
    // the ds prefix got declared on the root
    assert!(document.root.namespaces.iter().any(|ns| ns.uri == DSIG_NS));
}

#[test]
fn test_verify_signed_document() {
    assert!(verify(&signed(), &public_key()).unwrap());
}

#[test]
fn test_verify_with_other_key_is_false() {
    let stranger = load_private_key_pem(STRANGER_PEM).unwrap().to_public_key();
    assert!(!verify(&signed(), &stranger).unwrap());
}

#[test]
fn test_changes_outside_authenticated_elements_keep_signature() {
    let mut document = signed();
    let order_data = element_mut(&mut document.root, &["body", "DataTransfer", "OrderData"]);
    order_data.children = vec![Node::Text("BBBB".into())];
    assert!(verify(&document, &public_key()).unwrap());
}

#[test]
fn test_changes_inside_authenticated_elements_break_signature() {
    let mut document = signed();
    let host_id = element_mut(&mut document.root, &["header", "static", "HostID"]);
    host_id.children = vec![Node::Text("OTHERHOST".into())];
    assert!(!verify(&document, &public_key()).unwrap());

    let mut document = signed();
    element_mut(&mut document.root, &["header", "mutable", "SegmentNumber"])
        .set_attr("lastSegment", "false");
    assert!(!verify(&document, &public_key()).unwrap());
}

#[test]
fn test_tampered_signature_value_is_false() {
    let mut document = signed();
    let value = element_mut(&mut document.root, &["AuthSignature", "SignatureValue"]);
    let mut bytes = general_purpose::STANDARD.decode(value.text()).unwrap();
    bytes[10] ^= 0x01;
    value.children = vec![Node::Text(general_purpose::STANDARD.encode(bytes))];
    assert!(!verify(&document, &public_key()).unwrap());
}

#[test]
fn test_structural_problems_are_errors() {
    let key = load_private_key_pem(USER_X002_PEM).unwrap();

    let mut no_auth = Document::parse("<ebicsRequest xmlns=\"urn:org:ebics:H004\"><header authenticate=\"true\"/></ebicsRequest>").unwrap();
    assert!(sign(&mut no_auth, &key).is_err());
    assert!(verify(&no_auth, &public_key()).is_err());

    let mut twice = Document::parse("<ebicsRequest xmlns=\"urn:org:ebics:H004\"><header authenticate=\"true\"/><AuthSignature/><AuthSignature/></ebicsRequest>").unwrap();
    assert!(sign(&mut twice, &key).is_err());

    let mut nothing_to_sign = Document::parse("<ebicsRequest xmlns=\"urn:org:ebics:H004\"><header/><AuthSignature/></ebicsRequest>").unwrap();
    assert!(sign(&mut nothing_to_sign, &key).is_err());

    // unsigned AuthSignature
    let unsigned = Document::parse(UNSIGNED_REQUEST).unwrap();
    assert!(verify(&unsigned, &public_key()).is_err());

    let mut wrong_method = signed();
    element_mut(&mut wrong_method.root, &["AuthSignature", "SignedInfo", "SignatureMethod"])
        .set_attr("Algorithm", "http://www.w3.org/2000/09/xmldsig#rsa-sha1");
    assert!(verify(&wrong_method, &public_key()).is_err());
}
