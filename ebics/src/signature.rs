//! X002 authentication signatures of EBICS messages.
//!
//! EBICS uses an enveloped XML-DSig signature whose single reference points to
//! `#xpointer(//*[@authenticate='true'])`: the digest covers every element marked with
//! `authenticate="true"` (with all descendants), canonicalized and concatenated in
//! document order. The children of `ds:Signature` (`ds:SignedInfo`, `ds:SignatureValue`)
//! are embedded directly in `AuthSignature`; the `ds:Signature` element itself never
//! appears on the wire.
//!
//! https://datatracker.ietf.org/doc/html/rfc3275#section-3.1.2
//! EBICS Specification 2.5, chapter 5.5.1.2.1 and 11.1

use std::ptr;

use base64::{engine::general_purpose, Engine as _};
use log::{debug, warn};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::crypto::{sign_x002, verify_x002};
use crate::error::{EbicsError, Result};
use crate::xml::{canonicalize_subsets, Document, Element, Node, Scope, DSIG_NS};

pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const RSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const AUTHENTICATED_REFERENCE: &str = "#xpointer(//*[@authenticate='true'])";

const AUTH_SIGNATURE: &str = "AuthSignature";

fn is_authenticated(element: &Element) -> bool {
    element.attr("authenticate") == Some("true")
}

/// Canonical form of the node-set the signature reference resolves to.
pub fn authenticated_c14n(document: &Document) -> Result<String> {
    if !document.root.descendants().into_iter().any(is_authenticated) {
        return Err(EbicsError::InvalidXml(
            "no element with authenticate=\"true\" to sign".into(),
        ));
    }
    canonicalize_subsets(&document.root, is_authenticated)
}

/// SHA-256 over [`authenticated_c14n`].
pub fn authenticated_digest(document: &Document) -> Result<[u8; 32]> {
    Ok(Sha256::digest(authenticated_c14n(document)?.as_bytes()).into())
}

fn auth_signature_index(document: &Document) -> Result<usize> {
    let mut found = document
        .root
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| matches!(node, Node::Element(e) if e.name == AUTH_SIGNATURE));
    match (found.next(), found.next()) {
        (Some((index, _)), None) => Ok(index),
        (None, _) => Err(EbicsError::InvalidXml(format!(
            "<{}> has no {AUTH_SIGNATURE}",
            document.root.name
        ))),
        (Some(_), Some(_)) => Err(EbicsError::InvalidXml(format!(
            "<{}> has more than one {AUTH_SIGNATURE}",
            document.root.name
        ))),
    }
}

fn auth_signature_mut(document: &mut Document, index: usize) -> Result<&mut Element> {
    match document.root.children.get_mut(index) {
        Some(Node::Element(e)) => Ok(e),
        _ => Err(EbicsError::InvalidXml(format!("no {AUTH_SIGNATURE} at position {index}"))),
    }
}

fn ds(name: &str) -> Element {
    Element::prefixed("ds", name)
}

fn algorithm(name: &str, uri: &str) -> Element {
    ds(name).with_attr("Algorithm", uri)
}

fn signed_info(digest: &[u8]) -> Element {
    ds("SignedInfo")
        .with_child(algorithm("CanonicalizationMethod", C14N_ALGORITHM))
        .with_child(algorithm("SignatureMethod", RSA_SHA256_ALGORITHM))
        .with_child(
            ds("Reference")
                .with_attr("URI", AUTHENTICATED_REFERENCE)
                .with_child(ds("Transforms").with_child(algorithm("Transform", C14N_ALGORITHM)))
                .with_child(algorithm("DigestMethod", SHA256_ALGORITHM))
                .with_child(ds("DigestValue").with_text(general_purpose::STANDARD.encode(digest))),
        )
}

/// Signs `document` with the X002 key, filling its top-level `AuthSignature`.
pub fn sign(document: &mut Document, key: &RsaPrivateKey) -> Result<()> {
    let index = auth_signature_index(document)?;

    let mut scope = Scope::default();
    scope.enter(&document.root);
    if !scope.has_prefix("ds") {
        document.root = std::mem::take(&mut document.root).with_namespace(Some("ds"), DSIG_NS);
    }

    let digest = authenticated_digest(document)?;
    auth_signature_mut(document, index)?.children =
        vec![Node::Element(ds("Signature").with_child(signed_info(&digest)))];

    let signed_info_c14n = {
        let signed_info = signature_children(document, index)?.0;
        canonicalize_subsets(&document.root, |e| ptr::eq(e, signed_info))?
    };
    let value = sign_x002(signed_info_c14n.as_bytes(), key)?;

    // splice the ds:Signature children into AuthSignature
    let auth_signature = auth_signature_mut(document, index)?;
    let mut children = match auth_signature.children.pop() {
        Some(Node::Element(signature)) => signature.children,
        _ => Vec::new(),
    };
    children.push(Node::Element(
        ds("SignatureValue").with_text(general_purpose::STANDARD.encode(value)),
    ));
    auth_signature.children = children;
    Ok(())
}

/// Returns `SignedInfo` and the `ds:Signature` wrapper below `AuthSignature`.
fn signature_children(document: &Document, index: usize) -> Result<(&Element, &Element)> {
    let Some(Node::Element(auth_signature)) = document.root.children.get(index) else {
        return Err(EbicsError::InvalidXml("AuthSignature is not an element".into()));
    };
    let signature = auth_signature
        .child("Signature")
        .ok_or_else(|| EbicsError::InvalidXml("missing ds:Signature".into()))?;
    let signed_info = signature
        .child("SignedInfo")
        .ok_or_else(|| EbicsError::InvalidXml("missing ds:SignedInfo".into()))?;
    Ok((signed_info, signature))
}

fn expect_algorithm(element: &Element, expected: &str) -> Result<()> {
    match element.attr("Algorithm") {
        Some(found) if found == expected => Ok(()),
        found => Err(EbicsError::InvalidXml(format!(
            "ds:{} must use {expected}, found {}",
            element.name,
            found.unwrap_or("nothing")
        ))),
    }
}

/// Checks the structure of `SignedInfo`; returns the transmitted digest value.
fn check_signed_info(signed_info: &Element) -> Result<Vec<u8>> {
    let mut cursor = signed_info.cursor();
    expect_algorithm(cursor.required("CanonicalizationMethod")?, C14N_ALGORITHM)?;
    expect_algorithm(cursor.required("SignatureMethod")?, RSA_SHA256_ALGORITHM)?;
    let reference = cursor.required("Reference")?;
    cursor.finish()?;

    if reference.attr("URI") != Some(AUTHENTICATED_REFERENCE) {
        return Err(EbicsError::InvalidXml(format!(
            "unsupported reference URI {:?}",
            reference.attr("URI")
        )));
    }
    let mut cursor = reference.cursor();
    if let Some(transforms) = cursor.optional("Transforms") {
        let mut transform_cursor = transforms.cursor();
        for transform in transform_cursor.repeated("Transform") {
            expect_algorithm(transform, C14N_ALGORITHM)?;
        }
        transform_cursor.finish()?;
    }
    expect_algorithm(cursor.required("DigestMethod")?, SHA256_ALGORITHM)?;
    let digest_value = cursor.required_text("DigestValue")?;
    cursor.finish()?;

    Ok(general_purpose::STANDARD.decode(digest_value)?)
}

/// Verifies the `AuthSignature` of `document` against the X002 public key.
///
/// A wrong digest or signature value is `Ok(false)`; a document without a usable
/// `AuthSignature` is an error.
pub fn verify(document: &Document, key: &RsaPublicKey) -> Result<bool> {
    let index = auth_signature_index(document)?;

    // wrap the embedded children back into ds:Signature
    let mut document = document.clone();
    let mut scope = Scope::default();
    scope.enter(&document.root);
    let needs_prefix = !scope.has_prefix("ds");
    let auth_signature = auth_signature_mut(&mut document, index)?;
    let mut signature = ds("Signature");
    if needs_prefix {
        signature = signature.with_namespace(Some("ds"), DSIG_NS);
    }
    signature.children = std::mem::take(&mut auth_signature.children);
    auth_signature.children = vec![Node::Element(signature)];

    let (signed_info, signature) = signature_children(&document, index)?;
    let signature_value = signature
        .child("SignatureValue")
        .ok_or_else(|| EbicsError::InvalidXml("missing ds:SignatureValue".into()))?
        .trimmed_text();
    let signature_value = crate::codec::base64_decode(&signature_value)?;
    let digest_value = check_signed_info(signed_info)?;

    if digest_value != authenticated_digest(&document)? {
        warn!("digest of the authenticated elements does not match the signed digest");
        return Ok(false);
    }

    let signed_info_c14n = canonicalize_subsets(&document.root, |e| ptr::eq(e, signed_info))?;
    let valid = verify_x002(&signature_value, signed_info_c14n.as_bytes(), key);
    if !valid {
        warn!("signature value over SignedInfo does not verify");
    } else {
        debug!("authentication signature verified");
    }
    Ok(valid)
}

#[cfg(test)]
mod test_signature;
