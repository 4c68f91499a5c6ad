//! Passphrase protected key backups.
//!
//! `PBEWithSHA1AndDESede` as defined by PKCS#12 (RFC 7292, appendix B and C): key and IV are
//! derived from the passphrase with the PKCS#12 KDF over SHA-1, the data is encrypted with
//! three-key DES-EDE in CBC mode with PKCS#7 padding. The result is wrapped into a DER
//! `EncryptedPrivateKeyInfo`, so other PKCS#8 tooling can read the backups.

use cbc::{Decryptor as CbcDec, Encryptor as CbcEnc};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence};
use des::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;
use rand::{rngs::OsRng, RngCore};
use rsa::RsaPrivateKey;
use sha1::{Digest, Sha1};

use crate::error::{EbicsError, Result};

/// pbeWithSHAAnd3-KeyTripleDES-CBC
const PBE_SHA1_DESEDE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.1.3");
const HASH_ITERATIONS: u32 = 30;
/// Upper bound accepted when reading a backup.
const MAX_HASH_ITERATIONS: u32 = 10_000;
const SALT_LEN: usize = 8;

const KEY_MATERIAL: u8 = 1;
const IV_MATERIAL: u8 = 2;

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub(super) struct PbeParameter {
    salt: OctetString,
    pub(super) iterations: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub(super) struct PbeAlgorithm {
    algorithm: ObjectIdentifier,
    pub(super) parameters: PbeParameter,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub(super) struct EncryptedPrivateKeyInfo {
    pub(super) encryption_algorithm: PbeAlgorithm,
    encrypted_data: OctetString,
}

fn der_error(e: der::Error) -> EbicsError {
    EbicsError::KeyFormat(format!("encrypted key envelope: {e}"))
}

/// Encrypts `data` (usually a PKCS#8 private key) under `passphrase`.
pub fn encrypt_passphrase(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    seal(data, passphrase, HASH_ITERATIONS)
}

pub(super) fn seal(data: &[u8], passphrase: &str, iterations: u32) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let key = pkcs12_kdf(passphrase, &salt, iterations, KEY_MATERIAL, 24);
    let iv = pkcs12_kdf(passphrase, &salt, iterations, IV_MATERIAL, 8);
    let cipher_text = CbcEnc::<TdesEde3>::new_from_slices(&key, &iv)
        .map_err(|e| EbicsError::Crypto(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(data);

    let info = EncryptedPrivateKeyInfo {
        encryption_algorithm: PbeAlgorithm {
            algorithm: PBE_SHA1_DESEDE,
            parameters: PbeParameter {
                salt: OctetString::new(salt.to_vec()).map_err(der_error)?,
                iterations,
            },
        },
        encrypted_data: OctetString::new(cipher_text).map_err(der_error)?,
    };
    info.to_der().map_err(der_error)
}

/// Inverse of [`encrypt_passphrase`]. A wrong passphrase almost always shows up as a
/// padding error here; [`decrypt_private_key`] additionally parses the result.
pub fn decrypt_passphrase(envelope: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let info = EncryptedPrivateKeyInfo::from_der(envelope).map_err(der_error)?;
    let algorithm = &info.encryption_algorithm;
    if algorithm.algorithm != PBE_SHA1_DESEDE {
        return Err(EbicsError::KeyFormat(format!(
            "unsupported key encryption algorithm {}",
            algorithm.algorithm
        )));
    }
    let salt = algorithm.parameters.salt.as_bytes();
    let iterations = algorithm.parameters.iterations;
    if iterations == 0 || iterations > MAX_HASH_ITERATIONS {
        return Err(EbicsError::KeyFormat(format!(
            "key backup asks for {iterations} hash iterations, at most {MAX_HASH_ITERATIONS} are accepted"
        )));
    }

    let key = pkcs12_kdf(passphrase, salt, iterations, KEY_MATERIAL, 24);
    let iv = pkcs12_kdf(passphrase, salt, iterations, IV_MATERIAL, 8);
    CbcDec::<TdesEde3>::new_from_slices(&key, &iv)
        .map_err(|e| EbicsError::Crypto(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(info.encrypted_data.as_bytes())
        .map_err(|_| EbicsError::Crypto("wrong passphrase or corrupted key backup".into()))
}

pub fn encrypt_private_key(key: &RsaPrivateKey, passphrase: &str) -> Result<Vec<u8>> {
    encrypt_passphrase(&super::encode_private_key(key)?, passphrase)
}

pub fn decrypt_private_key(envelope: &[u8], passphrase: &str) -> Result<RsaPrivateKey> {
    let plain = decrypt_passphrase(envelope, passphrase)?;
    super::load_private_key(&plain)
}

/// PKCS#12 key derivation (RFC 7292, appendix B.2) with SHA-1, u = 20 and v = 64.
fn pkcs12_kdf(passphrase: &str, salt: &[u8], iterations: u32, id: u8, len: usize) -> Vec<u8> {
    const U: usize = 20;
    const V: usize = 64;

    // BMPString, big endian, with two trailing zero bytes (none for the empty password)
    let mut password: Vec<u8> = passphrase
        .encode_utf16()
        .flat_map(|c| c.to_be_bytes())
        .collect();
    if !password.is_empty() {
        password.extend_from_slice(&[0, 0]);
    }

    let stretch = |src: &[u8]| -> Vec<u8> {
        let n = V * src.len().div_ceil(V);
        src.iter().cycle().take(n).copied().collect()
    };
    let mut input = stretch(salt);
    input.extend(stretch(&password));

    let diversifier = [id; V];
    let mut out = Vec::with_capacity(len);
    loop {
        let mut a = Sha1::new()
            .chain_update(diversifier)
            .chain_update(&input)
            .finalize();
        for _ in 1..iterations {
            a = Sha1::digest(a);
        }
        let take = (len - out.len()).min(U);
        out.extend_from_slice(&a[..take]);
        if out.len() == len {
            return out;
        }

        // I_j = (I_j + B + 1) mod 2^(8v)
        let b: Vec<u8> = a.iter().cycle().take(V).copied().collect();
        for block in input.chunks_mut(V) {
            let mut carry = 1u16;
            for k in (0..V).rev() {
                let sum = block[k] as u16 + b[k] as u16 + carry;
                block[k] = sum as u8;
                carry = sum >> 8;
            }
        }
    }
}
