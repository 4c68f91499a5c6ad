//! Persistence seen from the sandbox, plus an in-memory implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto::generate_key_pair;
use crate::error::{EbicsError, Result};
use crate::messages::{AccountInfo, AddressInfo};
use crate::return_code::EbicsReturnCode;
use crate::subscriber::{SubscriberId, SubscriberState};

/// A bank host and its private keys.
#[derive(Clone)]
pub struct HostRecord {
    pub host_id: String,
    pub authentication_key: RsaPrivateKey,
    pub encryption_key: RsaPrivateKey,
}

impl HostRecord {
    pub fn generate(host_id: &str, bits: usize) -> Result<Self> {
        Ok(HostRecord {
            host_id: host_id.to_string(),
            authentication_key: generate_key_pair(bits)?,
            encryption_key: generate_key_pair(bits)?,
        })
    }

    pub fn authentication_public(&self) -> RsaPublicKey {
        self.authentication_key.to_public_key()
    }

    pub fn encryption_public(&self) -> RsaPublicKey {
        self.encryption_key.to_public_key()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberPublicKeys {
    pub signature: Option<RsaPublicKey>,
    pub authentication: Option<RsaPublicKey>,
    pub encryption: Option<RsaPublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRecord {
    pub id: SubscriberId,
    pub state: SubscriberState,
    pub keys: SubscriberPublicKeys,
    /// Next order number to hand out; the first order is `OR01`.
    pub next_order_id: u32,
    pub name: Option<String>,
}

impl SubscriberRecord {
    pub fn new(id: SubscriberId) -> Self {
        SubscriberRecord {
            id,
            state: SubscriberState::New,
            keys: SubscriberPublicKeys::default(),
            next_order_id: 1,
            name: None,
        }
    }
}

/// Customer data reported by HTD and HKD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerRecord {
    pub host_id: String,
    pub partner_id: String,
    pub address: AddressInfo,
    pub accounts: Vec<AccountInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTransaction {
    pub transaction_id: String,
    pub subscriber: SubscriberId,
    pub order_type: String,
    /// The encrypted order data, base64.
    pub encoded_payload: String,
    pub segment_size: usize,
    pub num_segments: u32,
    /// RSA wrapped transaction key, as sent in `DataEncryptionInfo`.
    pub encrypted_transaction_key: Vec<u8>,
    /// `Some(true)` after a positive receipt.
    pub receipt: Option<bool>,
}

impl DownloadTransaction {
    /// Segment `number` (1-based) of the encoded payload.
    pub fn segment(&self, number: u32) -> Option<&str> {
        if number == 0 || number > self.num_segments {
            return None;
        }
        let start = (number as usize - 1) * self.segment_size;
        let end = (start + self.segment_size).min(self.encoded_payload.len());
        self.encoded_payload.get(start..end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTransaction {
    pub transaction_id: String,
    pub subscriber: SubscriberId,
    pub order_type: String,
    pub order_id: String,
    pub num_segments: u32,
    pub encrypted_transaction_key: Vec<u8>,
    /// Signatures from the initialisation, checked once the last segment arrived.
    pub signatures: Vec<OrderSignature>,
    pub segments: Vec<String>,
    pub finished: bool,
}

impl UploadTransaction {
    pub fn last_seen_segment(&self) -> u32 {
        self.segments.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRecord {
    Download(DownloadTransaction),
    Upload(UploadTransaction),
}

impl TransactionRecord {
    pub fn transaction_id(&self) -> &str {
        match self {
            TransactionRecord::Download(t) => &t.transaction_id,
            TransactionRecord::Upload(t) => &t.transaction_id,
        }
    }

    pub fn subscriber(&self) -> &SubscriberId {
        match self {
            TransactionRecord::Download(t) => &t.subscriber,
            TransactionRecord::Upload(t) => &t.subscriber,
        }
    }

    /// Terminal transactions are treated as unknown.
    pub fn is_finished(&self) -> bool {
        match self {
            TransactionRecord::Download(t) => t.receipt.is_some(),
            TransactionRecord::Upload(t) => t.finished,
        }
    }
}

/// One electronic signature received with an upload.
///
/// Order IDs are counted per subscriber, so a signature belongs to the uploading
/// `subscriber` and its `order_id`. `partner_id`/`user_id` name the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSignature {
    pub subscriber: SubscriberId,
    pub order_id: String,
    pub order_type: String,
    pub partner_id: String,
    pub user_id: String,
    pub signature_algorithm: String,
    pub signature_value: Vec<u8>,
}

/// Storage of hosts, subscribers, transactions and order signatures.
///
/// Every `update_*` is an atomic read-modify-write of one row: the closure runs while the
/// row is locked and its result is stored only if it returns `Ok`.
pub trait BankStore: Send + Sync {
    fn host(&self, host_id: &str) -> Result<Option<HostRecord>>;

    fn subscriber(&self, id: &SubscriberId) -> Result<Option<SubscriberRecord>>;

    fn update_subscriber<T, F>(&self, id: &SubscriberId, update: F) -> Result<T>
    where
        F: FnOnce(&mut SubscriberRecord) -> Result<T>;

    fn partner(&self, host_id: &str, partner_id: &str) -> Result<Option<PartnerRecord>>;

    fn partner_subscribers(&self, host_id: &str, partner_id: &str) -> Result<Vec<SubscriberRecord>>;

    /// Fails if the transaction ID was ever used before.
    fn create_transaction(&self, transaction: TransactionRecord) -> Result<()>;

    fn transaction(&self, transaction_id: &str) -> Result<Option<TransactionRecord>>;

    fn update_transaction<T, F>(&self, transaction_id: &str, update: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionRecord) -> Result<T>;

    /// Archives the signatures of an accepted upload.
    fn add_order_signatures(&self, signatures: Vec<OrderSignature>) -> Result<()>;

    fn order_signatures(&self, uploader: &SubscriberId, order_id: &str, order_type: &str)
        -> Result<Vec<OrderSignature>>;
}

#[derive(Default)]
struct Tables {
    hosts: HashMap<String, HostRecord>,
    subscribers: HashMap<SubscriberId, SubscriberRecord>,
    partners: HashMap<(String, String), PartnerRecord>,
    transactions: HashMap<String, TransactionRecord>,
    signatures: Vec<OrderSignature>,
}

/// [`BankStore`] in process memory, one lock for all tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| EbicsError::Storage("store lock poisoned".into()))
    }

    pub fn add_host(&self, host: HostRecord) -> Result<()> {
        self.lock()?.hosts.insert(host.host_id.clone(), host);
        Ok(())
    }

    pub fn add_subscriber(&self, subscriber: SubscriberRecord) -> Result<()> {
        self.lock()?.subscribers.insert(subscriber.id.clone(), subscriber);
        Ok(())
    }

    pub fn add_partner(&self, partner: PartnerRecord) -> Result<()> {
        self.lock()?
            .partners
            .insert((partner.host_id.clone(), partner.partner_id.clone()), partner);
        Ok(())
    }
}

impl BankStore for MemoryStore {
    fn host(&self, host_id: &str) -> Result<Option<HostRecord>> {
        Ok(self.lock()?.hosts.get(host_id).cloned())
    }

    fn subscriber(&self, id: &SubscriberId) -> Result<Option<SubscriberRecord>> {
        Ok(self.lock()?.subscribers.get(id).cloned())
    }

    fn update_subscriber<T, F>(&self, id: &SubscriberId, update: F) -> Result<T>
    where
        F: FnOnce(&mut SubscriberRecord) -> Result<T>,
    {
        let mut tables = self.lock()?;
        let row = tables
            .subscribers
            .get_mut(id)
            .ok_or_else(|| EbicsError::rejected(EbicsReturnCode::UserUnknown, format!("subscriber {id} unknown")))?;
        let mut updated = row.clone();
        let result = update(&mut updated)?;
        *row = updated;
        Ok(result)
    }

    fn partner(&self, host_id: &str, partner_id: &str) -> Result<Option<PartnerRecord>> {
        Ok(self
            .lock()?
            .partners
            .get(&(host_id.to_string(), partner_id.to_string()))
            .cloned())
    }

    fn partner_subscribers(&self, host_id: &str, partner_id: &str) -> Result<Vec<SubscriberRecord>> {
        let mut found: Vec<_> = self
            .lock()?
            .subscribers
            .values()
            .filter(|s| s.id.host_id == host_id && s.id.partner_id == partner_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.user_id.cmp(&b.id.user_id));
        Ok(found)
    }

    fn create_transaction(&self, transaction: TransactionRecord) -> Result<()> {
        let mut tables = self.lock()?;
        let id = transaction.transaction_id().to_string();
        if tables.transactions.contains_key(&id) {
            return Err(EbicsError::Storage(format!("transaction {id} exists already")));
        }
        tables.transactions.insert(id, transaction);
        Ok(())
    }

    fn transaction(&self, transaction_id: &str) -> Result<Option<TransactionRecord>> {
        Ok(self.lock()?.transactions.get(transaction_id).cloned())
    }

    fn update_transaction<T, F>(&self, transaction_id: &str, update: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionRecord) -> Result<T>,
    {
        let mut tables = self.lock()?;
        let row = tables.transactions.get_mut(transaction_id).ok_or_else(|| {
            EbicsError::rejected(
                EbicsReturnCode::TxUnknownTxid,
                format!("transaction {transaction_id} unknown"),
            )
        })?;
        let mut updated = row.clone();
        let result = update(&mut updated)?;
        *row = updated;
        Ok(result)
    }

    fn add_order_signatures(&self, signatures: Vec<OrderSignature>) -> Result<()> {
        self.lock()?.signatures.extend(signatures);
        Ok(())
    }

    fn order_signatures(
        &self,
        uploader: &SubscriberId,
        order_id: &str,
        order_type: &str,
    ) -> Result<Vec<OrderSignature>> {
        Ok(self
            .lock()?
            .signatures
            .iter()
            .filter(|s| &s.subscriber == uploader && s.order_id == order_id && s.order_type == order_type)
            .cloned()
            .collect())
    }
}
