//! Settings of the two roles, loadable from JSON. Missing fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EbicsError, Result};
use crate::messages::{Product, VersionSpec};

/// Segment size in base64 characters used when nothing else is configured.
pub const DEFAULT_SEGMENT_SIZE: usize = 4096;
pub const DEFAULT_KEY_BITS: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host_id: String,
    /// Download segments are cut to this many base64 characters.
    pub segment_size: usize,
    /// Answered to HEV requests.
    pub versions: Vec<VersionSpec>,
    pub key_bits: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            host_id: "EBIXHOST".to_string(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            versions: vec![VersionSpec {
                protocol: "H004".to_string(),
                version: "02.50".to_string(),
            }],
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upload segment size in base64 characters.
    pub segment_size: usize,
    pub product_name: Option<String>,
    pub language: String,
    pub key_bits: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            segment_size: DEFAULT_SEGMENT_SIZE,
            product_name: Some(concat!("ebics-rs ", env!("CARGO_PKG_VERSION")).to_string()),
            language: "en".to_string(),
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

impl ClientConfig {
    pub fn product(&self) -> Option<Product> {
        self.product_name.as_ref().map(|name| Product {
            language: self.language.clone(),
            name: name.clone(),
        })
    }
}

fn check_segment_size(segment_size: usize) -> Result<()> {
    if segment_size == 0 {
        return Err(EbicsError::Config("segment_size must be positive".into()));
    }
    Ok(())
}

impl HostConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(json).map_err(|e| EbicsError::Config(e.to_string()))?;
        check_segment_size(config.segment_size)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&read(path.as_ref())?)
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json).map_err(|e| EbicsError::Config(e.to_string()))?;
        check_segment_size(config.segment_size)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&read(path.as_ref())?)
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| EbicsError::Config(format!("{}: {e}", path.display())))
}
