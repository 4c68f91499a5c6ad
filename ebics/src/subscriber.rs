//! Subscriber identities, their key-exchange state and the client side key material.

use std::fmt;

use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::codec::{base64_decode, base64_encode};
use crate::crypto::{
    decrypt_private_key, encrypt_private_key, encode_public_key, generate_key_pair, load_public_key,
    public_key_hash,
};
use crate::error::{EbicsError, Result};
use crate::messages::BankPubKeyDigests;

/// `(hostID, partnerID, userID, systemID?)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId {
    pub host_id: String,
    pub partner_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
}

impl SubscriberId {
    pub fn new(host_id: &str, partner_id: &str, user_id: &str) -> Self {
        SubscriberId {
            host_id: host_id.to_string(),
            partner_id: partner_id.to_string(),
            user_id: user_id.to_string(),
            system_id: None,
        }
    }

    pub fn with_system_id(mut self, system_id: &str) -> Self {
        self.system_id = Some(system_id.to_string());
        self
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host_id, self.partner_id, self.user_id)?;
        if let Some(system_id) = &self.system_id {
            write!(f, "/{system_id}")?;
        }
        Ok(())
    }
}

/// Server side key-exchange state. The order of the variants is the order of progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriberState {
    New,
    PartiallyInitializedIni,
    PartiallyInitializedHia,
    Initialized,
    Ready,
}

impl SubscriberState {
    /// State after a successful INI. Re-sending INI replaces the key but never regresses.
    pub fn after_ini(self) -> Self {
        match self {
            SubscriberState::New => SubscriberState::PartiallyInitializedIni,
            SubscriberState::PartiallyInitializedHia => SubscriberState::Initialized,
            other => other,
        }
    }

    pub fn after_hia(self) -> Self {
        match self {
            SubscriberState::New => SubscriberState::PartiallyInitializedHia,
            SubscriberState::PartiallyInitializedIni => SubscriberState::Initialized,
            other => other,
        }
    }

    /// Out of band confirmation of the INI letter; not reachable through the protocol.
    pub fn confirm(self) -> Result<Self> {
        match self {
            SubscriberState::Initialized | SubscriberState::Ready => Ok(SubscriberState::Ready),
            other => Err(EbicsError::InvalidSubscriberState(format!(
                "cannot confirm a subscriber in state {other:?}"
            ))),
        }
    }

    /// HPB and all transactions need both INI and HIA done.
    pub fn is_initialized(self) -> bool {
        self >= SubscriberState::Initialized
    }

    /// User status as reported in `UserInfo/UserID/@Status`.
    pub fn ebics_status(self) -> u32 {
        match self {
            SubscriberState::Ready => 1,
            SubscriberState::New => 2,
            SubscriberState::PartiallyInitializedIni => 3,
            SubscriberState::PartiallyInitializedHia => 4,
            SubscriberState::Initialized => 5,
        }
    }
}

/// Client side view of INI/HIA: whether the keys were submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeySubmission {
    #[default]
    NotSent,
    Sent,
    /// The request went out but no usable answer came back.
    Unknown,
}

/// The subscriber's three private keys, one per role.
#[derive(Clone)]
pub struct SubscriberKeyMaterial {
    /// A006, order signatures only.
    pub signature: RsaPrivateKey,
    /// X002, `AuthSignature` only.
    pub authentication: RsaPrivateKey,
    /// E002, decrypting order data only.
    pub encryption: RsaPrivateKey,
}

impl SubscriberKeyMaterial {
    pub fn generate(bits: usize) -> Result<Self> {
        Ok(SubscriberKeyMaterial {
            signature: generate_key_pair(bits)?,
            authentication: generate_key_pair(bits)?,
            encryption: generate_key_pair(bits)?,
        })
    }
}

impl fmt::Debug for SubscriberKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberKeyMaterial").finish_non_exhaustive()
    }
}

/// The bank's public keys as learned through HPB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankKeys {
    pub authentication: RsaPublicKey,
    pub encryption: RsaPublicKey,
}

impl BankKeys {
    pub fn digests(&self) -> BankPubKeyDigests {
        BankPubKeyDigests::new(public_key_hash(&self.authentication), public_key_hash(&self.encryption))
    }
}

/// Immutable snapshot of everything the client needs for one request.
///
/// Client operations never mutate it; they return what changed (e.g. [`BankKeys`]) and
/// the caller stores the updated snapshot.
#[derive(Debug, Clone)]
pub struct ClientSubscriber {
    pub id: SubscriberId,
    pub keys: SubscriberKeyMaterial,
    pub bank_keys: Option<BankKeys>,
    pub ini: KeySubmission,
    pub hia: KeySubmission,
}

impl ClientSubscriber {
    pub fn new(id: SubscriberId, keys: SubscriberKeyMaterial) -> Self {
        ClientSubscriber {
            id,
            keys,
            bank_keys: None,
            ini: KeySubmission::NotSent,
            hia: KeySubmission::NotSent,
        }
    }

    pub fn with_bank_keys(self, bank_keys: BankKeys) -> Self {
        ClientSubscriber {
            bank_keys: Some(bank_keys),
            ..self
        }
    }

    pub fn bank_keys(&self) -> Result<&BankKeys> {
        self.bank_keys
            .as_ref()
            .ok_or_else(|| EbicsError::InvalidSubscriberState("bank keys unknown, send HPB first".into()))
    }
}

/// Passphrase protected export of a [`ClientSubscriber`].
///
/// Private keys are stored as base64 `EncryptedPrivateKeyInfo` (PBEWithSHA1AndDESede),
/// bank keys as base64 SubjectPublicKeyInfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBackup {
    #[serde(flatten)]
    pub id: SubscriberId,
    pub signature_key: String,
    pub authentication_key: String,
    pub encryption_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_authentication_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_encryption_key: Option<String>,
    #[serde(default)]
    pub ini: KeySubmission,
    #[serde(default)]
    pub hia: KeySubmission,
}

impl KeyBackup {
    pub fn create(subscriber: &ClientSubscriber, passphrase: &str) -> Result<Self> {
        let seal = |key: &RsaPrivateKey| -> Result<String> { Ok(base64_encode(&encrypt_private_key(key, passphrase)?)) };
        Ok(KeyBackup {
            id: subscriber.id.clone(),
            signature_key: seal(&subscriber.keys.signature)?,
            authentication_key: seal(&subscriber.keys.authentication)?,
            encryption_key: seal(&subscriber.keys.encryption)?,
            bank_authentication_key: encode_bank_key(subscriber.bank_keys.as_ref().map(|k| &k.authentication))?,
            bank_encryption_key: encode_bank_key(subscriber.bank_keys.as_ref().map(|k| &k.encryption))?,
            ini: subscriber.ini,
            hia: subscriber.hia,
        })
    }

    /// Fails with [`EbicsError::Crypto`] on a wrong passphrase.
    pub fn restore(&self, passphrase: &str) -> Result<ClientSubscriber> {
        let open = |sealed: &str| decrypt_private_key(&base64_decode(sealed)?, passphrase);
        let keys = SubscriberKeyMaterial {
            signature: open(&self.signature_key)?,
            authentication: open(&self.authentication_key)?,
            encryption: open(&self.encryption_key)?,
        };
        let bank_keys = match (&self.bank_authentication_key, &self.bank_encryption_key) {
            (Some(authentication), Some(encryption)) => Some(BankKeys {
                authentication: load_public_key(&base64_decode(authentication)?)?,
                encryption: load_public_key(&base64_decode(encryption)?)?,
            }),
            (None, None) => None,
            _ => {
                return Err(EbicsError::KeyFormat(
                    "backup holds only one of the two bank keys".into(),
                ))
            }
        };
        Ok(ClientSubscriber {
            id: self.id.clone(),
            keys,
            bank_keys,
            ini: self.ini,
            hia: self.hia,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EbicsError::Codec(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EbicsError::Codec(e.to_string()))
    }
}

fn encode_bank_key(key: Option<&RsaPublicKey>) -> Result<Option<String>> {
    key.map(|key| encode_public_key(key).map(|der| base64_encode(&der)))
        .transpose()
}
