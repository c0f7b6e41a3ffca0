//! Error types for the capsuleindex pipeline.

use thiserror::Error;

/// Errors that can occur while mirroring capsule events.
///
/// Variants fall into two classes. Per-event errors (`Mapping`,
/// `UnknownCapsule`) skip a single log entry and let the batch continue.
/// Everything else aborts the current pass without advancing the cursor.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Log fetch, chain head or contract call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Record or cursor write/read failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A log entry could not be turned into a record mutation.
    #[error("Mapping error{}: {reason}", .id.map(|i| format!(" for capsule #{i}")).unwrap_or_default())]
    Mapping { id: Option<u64>, reason: String },

    /// A `Revealed` event referenced a capsule the store has never seen.
    #[error("Capsule #{id} not found in store during reveal")]
    UnknownCapsule { id: u64 },

    /// The caller asked for a block range wider than the reader allows.
    #[error("Block range {from}..={to} exceeds maximum window of {max} blocks")]
    RangeTooLarge { from: u64, to: u64, max: u64 },

    /// A non-waiting trigger arrived while another pass was in flight.
    #[error("A sync pass is already in progress")]
    SyncInProgress,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IndexerError {
    /// Returns `true` if the error only affects a single event.
    pub fn is_per_event(&self) -> bool {
        matches!(self, Self::Mapping { .. } | Self::UnknownCapsule { .. })
    }

    /// Returns `true` if the next scheduled pass may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Storage(_) | Self::SyncInProgress)
    }
}
