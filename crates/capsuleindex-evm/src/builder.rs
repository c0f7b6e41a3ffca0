//! Fluent builder API for wiring an EVM-backed sync service.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capsuleindex_evm::IndexerBuilder;
//! use capsuleindex_storage::InMemoryStorage;
//!
//! # async fn example() -> Result<(), capsuleindex_core::IndexerError> {
//! let service = IndexerBuilder::new()
//!     .rpc_url("https://rpc.gnosischain.com")
//!     .contract("0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0")
//!     .from_block(38_000_000)
//!     .batch_window(500)
//!     .build_service(Arc::new(InMemoryStorage::new()))?;
//! service.start().await;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;

use capsuleindex_core::config::IndexerConfig;
use capsuleindex_core::cursor::CursorStore;
use capsuleindex_core::error::IndexerError;
use capsuleindex_core::health::HealthReporter;
use capsuleindex_core::service::SyncService;
use capsuleindex_core::store::RecordStore;
use capsuleindex_core::sync::SyncController;

use crate::fetcher::EvmLogSource;
use crate::rpc::HttpRpcClient;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Fluent builder for an EVM-backed [`SyncService`].
pub struct IndexerBuilder {
    config: IndexerConfig,
    rpc_url: String,
    contract: String,
    request_timeout_ms: u64,
}

impl Default for IndexerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
            rpc_url: String::new(),
            contract: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    /// Start from an existing config (e.g. loaded from a file).
    pub fn with_config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the JSON-RPC endpoint.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = url.into();
        self
    }

    /// Set the capsule contract address.
    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.contract = address.into();
        self
    }

    /// Set the start block (usually the contract deployment block).
    pub fn from_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the number of blocks processed per pass.
    pub fn batch_window(mut self, blocks: u64) -> Self {
        self.config.batch_window = blocks;
        self
    }

    /// Set the hard cap on a single `eth_getLogs` range.
    pub fn max_log_window(mut self, blocks: u64) -> Self {
        self.config.max_log_window = blocks;
        self
    }

    /// Set the periodic pass interval in milliseconds.
    pub fn sync_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync_interval_ms = ms;
        self
    }

    /// Set the staleness threshold used by health reports.
    pub fn healthy_threshold_secs(mut self, secs: u64) -> Self {
        self.config.healthy_threshold_secs = secs;
        self
    }

    /// Set the per-request HTTP timeout.
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Build the [`IndexerConfig`].
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build the JSON-RPC log source.
    pub fn build_source(&self) -> Result<EvmLogSource<HttpRpcClient>, IndexerError> {
        if self.rpc_url.is_empty() {
            return Err(IndexerError::Config("rpc_url is required".into()));
        }
        let contract: Address = self
            .contract
            .parse()
            .map_err(|e| IndexerError::Config(format!("invalid contract address {:?}: {e}", self.contract)))?;

        let client = HttpRpcClient::new(&self.rpc_url, Duration::from_millis(self.request_timeout_ms))
            .map_err(|e| IndexerError::Config(e.to_string()))?;
        Ok(EvmLogSource::new(client, contract.to_checksum(None)))
    }

    /// Build a [`SyncService`] over `storage`, which serves as both the
    /// record store and the cursor store.
    pub fn build_service<S>(&self, storage: Arc<S>) -> Result<SyncService, IndexerError>
    where
        S: RecordStore + CursorStore + 'static,
    {
        let source = Arc::new(self.build_source()?);
        let controller =
            SyncController::new(self.config.clone(), source.clone(), storage.clone(), storage)?;
        tracing::info!(
            rpc_url = %self.rpc_url,
            contract = %source.contract(),
            start_block = self.config.start_block,
            "Built capsule indexer"
        );
        Ok(SyncService::new(controller, HealthReporter::new(Some(source))))
    }
}
