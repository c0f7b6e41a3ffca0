//! Bounded, ordered access to the upstream capsule event log.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::IndexerError;
use crate::types::{sort_chain_order, EventKind, LogEntry};

/// Upstream source of capsule event logs.
///
/// Implementations fail the whole call on any upstream problem and never
/// retry internally; retry policy belongs to the sync controller.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current chain head height.
    async fn head_block(&self) -> Result<u64, IndexerError>;

    /// All logs of the given kinds in the closed range `[from, to]`.
    async fn fetch_logs(
        &self,
        kinds: &[EventKind],
        from: u64,
        to: u64,
    ) -> Result<Vec<LogEntry>, IndexerError>;
}

/// Source of the chain-authoritative capsule count, used for drift.
#[async_trait]
pub trait CountSource: Send + Sync {
    async fn authoritative_count(&self) -> Result<u64, IndexerError>;
}

/// Wraps a [`LogSource`] and enforces the reader contract: ranges are capped
/// at `max_window` blocks and results come back in chain order.
#[derive(Clone)]
pub struct ChainLogReader {
    source: Arc<dyn LogSource>,
    max_window: u64,
}

impl ChainLogReader {
    pub fn new(source: Arc<dyn LogSource>, max_window: u64) -> Self {
        Self { source, max_window }
    }

    /// Fetch the current chain head.
    pub async fn head_block(&self) -> Result<u64, IndexerError> {
        self.source.head_block().await
    }

    /// Fetch logs in `[from, to]`, sorted by `(block, tx index, log index)`.
    pub async fn fetch_logs(
        &self,
        kinds: &[EventKind],
        from: u64,
        to: u64,
    ) -> Result<Vec<LogEntry>, IndexerError> {
        if to < from || kinds.is_empty() {
            return Ok(vec![]);
        }
        if to - from >= self.max_window {
            return Err(IndexerError::RangeTooLarge {
                from,
                to,
                max: self.max_window,
            });
        }
        let mut logs = self.source.fetch_logs(kinds, from, to).await?;
        logs.retain(|l| kinds.contains(&l.kind));
        sort_chain_order(&mut logs);
        Ok(logs)
    }
}
