//! The business side of the bank: what a download returns and where uploads go.
//!
//! Payloads are opaque bytes here; turning them into camt/pain documents is up to the
//! implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use log::info;

use crate::archive::zip_files;
use crate::error::{EbicsError, Result};
use crate::messages::{OrderInfo, OrderParams};
use crate::subscriber::SubscriberId;

pub const TRANSFER_TYPE_DOWNLOAD: &str = "Download";
pub const TRANSFER_TYPE_UPLOAD: &str = "Upload";

pub trait OrderHandler: Send + Sync {
    /// Order types offered to subscribers, reported by HTD and HKD.
    fn supported_orders(&self) -> Vec<OrderInfo>;

    /// Payload for a download, `None` when there is nothing to fetch.
    /// Unsupported order types are [`EbicsError::NotImplemented`].
    fn download(
        &self,
        subscriber: &SubscriberId,
        order_type: &str,
        params: Option<&OrderParams>,
    ) -> Result<Option<Vec<u8>>>;

    /// Called once the subscriber sent the receipt of a download.
    fn download_receipt(&self, _subscriber: &SubscriberId, _order_type: &str, _positive: bool) -> Result<()> {
        Ok(())
    }

    /// A completely received upload whose signatures all verified.
    fn upload(&self, subscriber: &SubscriberId, order_type: &str, order_id: &str, payload: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedOrder {
    pub subscriber: SubscriberId,
    pub order_type: String,
    pub order_id: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct Queues {
    downloads: HashMap<String, VecDeque<Vec<u8>>>,
    uploads: Vec<UploadedOrder>,
}

/// Serves queued download payloads, first one first, until a positive receipt consumes
/// it. Keeps every upload.
pub struct MemoryOrderHandler {
    upload_types: Vec<String>,
    queues: Mutex<Queues>,
}

impl MemoryOrderHandler {
    pub fn new(upload_types: &[&str]) -> Self {
        MemoryOrderHandler {
            upload_types: upload_types.iter().map(|t| t.to_string()).collect(),
            queues: Mutex::new(Queues::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Queues>> {
        self.queues
            .lock()
            .map_err(|_| EbicsError::Storage("order queue lock poisoned".into()))
    }

    /// Makes `order_type` downloadable, even while its queue is empty.
    pub fn offer_download(&self, order_type: &str) -> Result<()> {
        self.lock()?.downloads.entry(order_type.to_string()).or_default();
        Ok(())
    }

    pub fn add_download(&self, order_type: &str, payload: Vec<u8>) -> Result<()> {
        self.lock()?
            .downloads
            .entry(order_type.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    /// Queues several files as one zip archive, the way statements are delivered.
    pub fn add_download_files(&self, order_type: &str, files: &[(&str, Vec<u8>)]) -> Result<()> {
        self.add_download(order_type, zip_files(files)?)
    }

    pub fn uploads(&self) -> Result<Vec<UploadedOrder>> {
        Ok(self.lock()?.uploads.clone())
    }
}

impl Default for MemoryOrderHandler {
    fn default() -> Self {
        Self::new(&["CCT", "CCC", "CDD", "XE2"])
    }
}

impl OrderHandler for MemoryOrderHandler {
    fn supported_orders(&self) -> Vec<OrderInfo> {
        let mut orders: Vec<OrderInfo> = match self.lock() {
            Ok(queues) => queues
                .downloads
                .keys()
                .map(|order_type| OrderInfo {
                    order_type: order_type.clone(),
                    transfer_type: TRANSFER_TYPE_DOWNLOAD.to_string(),
                    description: None,
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        orders.sort_by(|a, b| a.order_type.cmp(&b.order_type));
        orders.extend(self.upload_types.iter().map(|order_type| OrderInfo {
            order_type: order_type.clone(),
            transfer_type: TRANSFER_TYPE_UPLOAD.to_string(),
            description: None,
        }));
        orders
    }

    fn download(
        &self,
        _subscriber: &SubscriberId,
        order_type: &str,
        _params: Option<&OrderParams>,
    ) -> Result<Option<Vec<u8>>> {
        match self.lock()?.downloads.get(order_type) {
            Some(queue) => Ok(queue.front().cloned()),
            None => Err(EbicsError::NotImplemented(format!("download order type {order_type}"))),
        }
    }

    fn download_receipt(&self, _subscriber: &SubscriberId, order_type: &str, positive: bool) -> Result<()> {
        if positive {
            if let Some(queue) = self.lock()?.downloads.get_mut(order_type) {
                queue.pop_front();
            }
        }
        Ok(())
    }

    fn upload(&self, subscriber: &SubscriberId, order_type: &str, order_id: &str, payload: Vec<u8>) -> Result<()> {
        if !self.upload_types.iter().any(|t| t == order_type) {
            return Err(EbicsError::NotImplemented(format!("upload order type {order_type}")));
        }
        info!("{subscriber} uploaded {order_type} order {order_id}, {} bytes", payload.len());
        self.lock()?.uploads.push(UploadedOrder {
            subscriber: subscriber.clone(),
            order_type: order_type.to_string(),
            order_id: order_id.to_string(),
            payload,
        });
        Ok(())
    }
}
