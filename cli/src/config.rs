//! Application configuration file.
//!
//! ```json
//! {
//!   "network": {
//!     "rpc_url": "https://rpc.gnosischain.com",
//!     "contract_address": "0xdb2F5E3DfD295df167AEfed2336D92364A7a7eCF",
//!     "start_block": 38000000
//!   },
//!   "database_path": "capsules.db",
//!   "indexer": { "batch_window": 1000, "sync_interval_ms": 10000 },
//!   "log": { "level": "info", "json": false }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use capsuleindex_core::config::IndexerConfig;
use capsuleindex_evm::IndexerBuilder;

use crate::logging::LogConfig;

/// Upstream chain settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub contract_address: String,
    /// Overrides `indexer.start_block` when set.
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_database_path() -> String {
    "capsules.db".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub network: NetworkConfig,
    /// SQLite file, or `:memory:` for an ephemeral database.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: AppConfig = serde_json::from_str(raw)?;
        if let Some(start) = config.network.start_block {
            config.indexer.start_block = start;
        }
        config.indexer.validate()?;
        Ok(config)
    }

    /// Builder seeded with this configuration.
    pub fn builder(&self) -> IndexerBuilder {
        IndexerBuilder::new()
            .with_config(self.indexer.clone())
            .rpc_url(&self.network.rpc_url)
            .contract(&self.network.contract_address)
            .request_timeout_ms(self.network.request_timeout_ms)
    }
}
