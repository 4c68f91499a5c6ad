//! EBICS H004 protocol engine.
//!
//! Both ends of the protocol live here: [`client`] drives key management and order
//! transactions for a subscriber, [`server`] answers them for a bank host. They share the
//! crypto profiles (A006, X002, E002), the XML signature over `authenticate="true"`
//! elements and the typed message model.

pub mod archive;
pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod return_code;
pub mod server;
pub mod signature;
pub mod subscriber;
pub mod xml;

pub use client::{DownloadResult, EbicsClient, Transport, UploadResult};
pub use config::{ClientConfig, HostConfig};
pub use error::{EbicsError, Result};
pub use return_code::EbicsReturnCode;
pub use server::EbicsHost;
pub use subscriber::{BankKeys, ClientSubscriber, SubscriberId, SubscriberKeyMaterial, SubscriberState};
