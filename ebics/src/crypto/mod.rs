//! RSA key handling and the EBICS crypto profiles A006 (signing), X002 (authentication)
//! and E002 (encryption).
//!
//! See <https://www.cfonb.org/fichiers/20130612170023_6_4_EBICS_Specification_2.5_final_2011_05_16_2012_07_01.pdf>
//! chapters 11 (cryptographic processes) and 14/15 (appendix on the algorithms).

mod passphrase;

#[cfg(test)]
mod test_crypto;

pub use passphrase::{decrypt_passphrase, decrypt_private_key, encrypt_passphrase, encrypt_private_key};

use aes::cipher::{
    block_padding::{AnsiX923, Iso10126},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use log::debug;
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{traits::PublicKeyParts, BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{EbicsError, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// E002 mandates ICV = 0 for every encryption.
const E002_IV: [u8; 16] = [0; 16];

pub const TRANSACTION_KEY_LEN: usize = 16;

pub fn generate_key_pair(bits: usize) -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| EbicsError::KeyGen(e.to_string()))
}

/// Loads a PKCS#8 DER encoded RSA private key.
pub fn load_private_key(der: &[u8]) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(der).map_err(|e| EbicsError::KeyFormat(e.to_string()))
}

/// Accepts `PRIVATE KEY` (PKCS#8) and `RSA PRIVATE KEY` (PKCS#1) PEM blocks.
pub fn load_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| EbicsError::KeyFormat(e.to_string()))
}

/// Loads a X.509 SubjectPublicKeyInfo DER encoded RSA public key.
pub fn load_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| EbicsError::KeyFormat(e.to_string()))
}

pub fn load_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| EbicsError::KeyFormat(e.to_string()))
}

/// Builds a public key from the big-endian `ds:RSAKeyValue` components.
pub fn public_key_from_components(modulus: &[u8], exponent: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from_bytes_be(exponent))
        .map_err(|e| EbicsError::KeyFormat(e.to_string()))
}

pub fn encode_private_key(key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let doc = key
        .to_pkcs8_der()
        .map_err(|e| EbicsError::KeyFormat(e.to_string()))?;
    Ok(doc.as_bytes().to_vec())
}

pub fn encode_private_key_pem(key: &RsaPrivateKey) -> Result<String> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| EbicsError::KeyFormat(e.to_string()))?;
    Ok(pem.to_string())
}

pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>> {
    let doc = key
        .to_public_key_der()
        .map_err(|e| EbicsError::KeyFormat(e.to_string()))?;
    Ok(doc.as_bytes().to_vec())
}

pub fn encode_public_key_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| EbicsError::KeyFormat(e.to_string()))
}

///
/// Returns the digest value of a given public key - needs to match with published hash
///
/// The SHA-256 hash values of the financial institution's public keys for X002 and E002 are
/// composed by concatenating the exponent with a blank character and the modulus in hexadecimal
/// representation (using lower case letters) without leading zero (as to the hexadecimal
/// representation). The resulting string has to be converted into a byte array based on US ASCII
/// code.
///
pub fn public_key_hash(key: &RsaPublicKey) -> [u8; 32] {
    let exponent_hex = hex::encode(key.e().to_bytes_be());
    let modulus_hex = hex::encode(key.n().to_bytes_be());

    let combined = format!(
        "{} {}",
        exponent_hex.trim_start_matches('0'),
        modulus_hex.trim_start_matches('0')
    );
    Sha256::digest(combined.as_bytes()).into()
}

/// Upper case hex rendering of [`public_key_hash`], as printed on the INI/HIA letters.
pub fn public_key_hash_hex(key: &RsaPublicKey) -> String {
    hex::encode_upper(public_key_hash(key))
}

/// SHA-256 over the order data with all CR, LF and Ctrl-Z (0x1A) bytes left out.
pub fn digest_ebics_order_a006(order_data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for chunk in order_data.split(|b| matches!(b, b'\r' | b'\n' | 0x1a)) {
        hasher.update(chunk);
    }
    hasher.finalize().into()
}

/// A006 electronic signature: RSASSA-PSS with SHA-256, MGF1-SHA-256 and 32 bytes of salt,
/// applied to the EBICS order digest of `order_data`. The order digest is the signed
/// message, so it gets hashed once more by the PSS encoding.
pub fn sign_a006(order_data: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let hashed = Sha256::digest(digest_ebics_order_a006(order_data));
    let signature = key.sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &hashed)?;
    Ok(signature)
}

/// Verification failures are a `false`, not an error.
pub fn verify_a006(signature: &[u8], order_data: &[u8], key: &RsaPublicKey) -> bool {
    let hashed = Sha256::digest(digest_ebics_order_a006(order_data));
    match key.verify(Pss::new::<Sha256>(), &hashed, signature) {
        Ok(()) => true,
        Err(e) => {
            debug!("A006 signature rejected: {e}");
            false
        }
    }
}

/// RSA-SHA256 (PKCS#1 v1.5) as used by `http://www.w3.org/2001/04/xmldsig-more#rsa-sha256`.
pub fn sign_x002(message: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let hashed = Sha256::digest(message);
    Ok(key.sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)?)
}

pub fn verify_x002(signature: &[u8], message: &[u8], key: &RsaPublicKey) -> bool {
    let hashed = Sha256::digest(message);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
        .is_ok()
}

/// Output of an E002 encryption.
#[derive(Clone)]
pub struct EncryptionResult {
    pub encrypted_transaction_key: Vec<u8>,
    pub pub_key_digest: [u8; 32],
    pub encrypted_data: Vec<u8>,
    /// Kept so further data of the same transaction can be encrypted with it.
    pub plain_transaction_key: [u8; TRANSACTION_KEY_LEN],
}

impl std::fmt::Debug for EncryptionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionResult")
            .field("pub_key_digest", &hex::encode(self.pub_key_digest))
            .field("encrypted_data_len", &self.encrypted_data.len())
            .finish_non_exhaustive()
    }
}

/// The order data and ES’s of an EBICS transaction are symmetrically encrypted. For each
/// EBICS transaction, a random symmetrical key (transaction key) is generated by the sender
/// of order data and/or ES’s that is used for encryption of both the order data and the ES’s.
/// The symmetrical key is transmitted to the recipient asymmetrically-encoded.
/// -AES-128 (key length 128 bit) in CBC mode
/// -ICV (Initial Chaining Value) = 0
/// -Padding process in accordance with ANSI X9.23 / ISO 10126-2.
pub fn encrypt_e002(data: &[u8], key: &RsaPublicKey) -> Result<EncryptionResult> {
    let mut transaction_key = [0u8; TRANSACTION_KEY_LEN];
    OsRng.fill_bytes(&mut transaction_key);
    encrypt_e002_with_transaction_key(data, key, &transaction_key)
}

/// Same as [`encrypt_e002`] but reuses the transaction key of an earlier encryption, so
/// signature data and order data of one upload decrypt with one `TransactionKey`.
pub fn encrypt_e002_with_transaction_key(
    data: &[u8],
    key: &RsaPublicKey,
    transaction_key: &[u8; TRANSACTION_KEY_LEN],
) -> Result<EncryptionResult> {
    let encrypted_data = Aes128CbcEnc::new_from_slices(transaction_key, &E002_IV)
        .map_err(|e| EbicsError::Crypto(e.to_string()))?
        .encrypt_padded_vec_mut::<AnsiX923>(data);
    let encrypted_transaction_key = key.encrypt(&mut OsRng, Pkcs1v15Encrypt, transaction_key)?;

    Ok(EncryptionResult {
        encrypted_transaction_key,
        pub_key_digest: public_key_hash(key),
        encrypted_data,
        plain_transaction_key: *transaction_key,
    })
}

/// Unwraps the transaction key with the private E002 key.
pub fn decrypt_transaction_key(
    encrypted_transaction_key: &[u8],
    key: &RsaPrivateKey,
) -> Result<[u8; TRANSACTION_KEY_LEN]> {
    let plain = key
        .decrypt(Pkcs1v15Encrypt, encrypted_transaction_key)
        .map_err(|e| EbicsError::Crypto(format!("transaction key could not be decrypted: {e}")))?;
    plain
        .as_slice()
        .try_into()
        .map_err(|_| EbicsError::Crypto(format!("transaction key has {} bytes", plain.len())))
}

/// Symmetric half of E002. The last byte of the final block tells the padding length; the
/// filler bytes are not checked, so ISO 10126 (random filler) input is accepted as well.
pub fn decrypt_with_transaction_key(
    encrypted_data: &[u8],
    transaction_key: &[u8; TRANSACTION_KEY_LEN],
) -> Result<Vec<u8>> {
    Aes128CbcDec::new_from_slices(transaction_key, &E002_IV)
        .map_err(|e| EbicsError::Crypto(e.to_string()))?
        .decrypt_padded_vec_mut::<Iso10126>(encrypted_data)
        .map_err(|_| EbicsError::Crypto("order data could not be decrypted (bad padding)".into()))
}

pub fn decrypt_e002(
    encrypted_transaction_key: &[u8],
    encrypted_data: &[u8],
    key: &RsaPrivateKey,
) -> Result<Vec<u8>> {
    let transaction_key = decrypt_transaction_key(encrypted_transaction_key, key)?;
    decrypt_with_transaction_key(encrypted_data, &transaction_key)
}

/// Picks the private key whose public key hash matches `pub_key_digest`.
pub fn select_decryption_key<'a>(
    pub_key_digest: &[u8],
    candidates: &[&'a RsaPrivateKey],
) -> Result<&'a RsaPrivateKey> {
    candidates
        .iter()
        .copied()
        .find(|key| public_key_hash(&key.to_public_key())[..] == *pub_key_digest)
        .ok_or_else(|| {
            EbicsError::Crypto(format!(
                "no private key matches public key digest {}",
                hex::encode_upper(pub_key_digest)
            ))
        })
}
