//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::IndexerError;

/// Configuration for a sync controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// First block to index (usually the contract deployment block).
    pub start_block: u64,
    /// Maximum number of blocks processed in one pass.
    pub batch_window: u64,
    /// Hard cap on the block span of a single log request.
    pub max_log_window: u64,
    /// Interval between periodic passes (milliseconds).
    pub sync_interval_ms: u64,
    /// A mirror synced within this many seconds is reported healthy.
    pub healthy_threshold_secs: u64,
    /// Number of error messages kept in the cursor's summary.
    pub max_recent_errors: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            batch_window: 1000,
            max_log_window: 1000,
            sync_interval_ms: 10_000,
            healthy_threshold_secs: 60,
            max_recent_errors: 5,
        }
    }
}

impl IndexerConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Reject configurations the sync controller cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.batch_window == 0 {
            return Err(IndexerError::Config("batch_window must be at least 1".into()));
        }
        if self.max_log_window == 0 {
            return Err(IndexerError::Config("max_log_window must be at least 1".into()));
        }
        if self.batch_window > self.max_log_window {
            return Err(IndexerError::Config(format!(
                "batch_window ({}) exceeds max_log_window ({})",
                self.batch_window, self.max_log_window
            )));
        }
        if self.sync_interval_ms == 0 {
            return Err(IndexerError::Config("sync_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Runtime state of the sync controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// No pass running.
    Idle,
    /// One pass in flight.
    Syncing,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
        }
    }
}
