//! Sync cursor: the single persisted marker of indexing progress.
//!
//! The cursor records the last block whose events were fully applied to the
//! record store, plus summary counters. It is read at the start of a pass and
//! written only after the batch's writes succeed, so a crash mid-batch can at
//! worst cause a range to be replayed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::IndexerError;

/// The persisted singleton cursor row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Last block fully processed. `start_block - 1` before the first pass,
    /// which is why this is signed.
    pub last_synced_block: i64,
    /// Unix timestamp of the last cursor write.
    pub last_sync_time: i64,
    /// Record count observed after the last successful batch.
    pub total_records: u64,
    /// Bounded `"; "`-joined summary of recent errors.
    pub recent_errors: String,
}

impl SyncCursor {
    /// The cursor written at first boot.
    pub fn initial(start_block: u64, now: i64) -> Self {
        Self {
            last_synced_block: start_block as i64 - 1,
            last_sync_time: now,
            total_records: 0,
            recent_errors: String::new(),
        }
    }

    /// First block the next pass should fetch.
    pub fn next_block(&self, start_block: u64) -> u64 {
        let after_cursor = (self.last_synced_block + 1).max(0) as u64;
        after_cursor.max(start_block)
    }
}

/// Join the last `max` errors into a single bounded summary string.
pub fn summarize_errors(errors: &[String], max: usize) -> String {
    let skip = errors.len().saturating_sub(max);
    errors[skip..].join("; ")
}

/// Trait for loading and saving the cursor.
///
/// Implementations include [`MemoryCursorStore`], `InMemoryStorage` and
/// `SqliteStorage`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor, or `None` before first boot.
    async fn load(&self) -> Result<Option<SyncCursor>, IndexerError>;

    /// Save (upsert) the singleton cursor.
    async fn save(&self, cursor: &SyncCursor) -> Result<(), IndexerError>;
}

/// Manages cursor reads/writes for the sync controller.
pub struct CursorManager {
    store: Arc<dyn CursorStore>,
}

impl CursorManager {
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self { store }
    }

    /// Load the cursor, or `None` if none has been written yet.
    pub async fn load(&self) -> Result<Option<SyncCursor>, IndexerError> {
        self.store.load().await
    }

    /// Load the cursor, creating the first-boot row if it does not exist.
    pub async fn load_or_init(&self, start_block: u64) -> Result<SyncCursor, IndexerError> {
        if let Some(cursor) = self.store.load().await? {
            return Ok(cursor);
        }
        let cursor = SyncCursor::initial(start_block, chrono::Utc::now().timestamp());
        self.store.save(&cursor).await?;
        tracing::info!(last_synced_block = cursor.last_synced_block, "Created sync cursor");
        Ok(cursor)
    }

    /// Advance the cursor after a fully applied batch.
    pub async fn advance(
        &self,
        to_block: u64,
        total_records: u64,
        recent_errors: String,
    ) -> Result<SyncCursor, IndexerError> {
        let cursor = SyncCursor {
            last_synced_block: to_block as i64,
            last_sync_time: chrono::Utc::now().timestamp(),
            total_records,
            recent_errors,
        };
        self.store.save(&cursor).await?;
        Ok(cursor)
    }

    /// Refresh the sync time without moving the block (caught-up pass).
    pub async fn touch(&self, current: &SyncCursor) -> Result<(), IndexerError> {
        let cursor = SyncCursor {
            last_sync_time: chrono::Utc::now().timestamp(),
            ..current.clone()
        };
        self.store.save(&cursor).await
    }

    /// Record a pass-level failure. The block and sync time are left unchanged
    /// so health reporting still reflects the last good pass.
    pub async fn record_failure(&self, error: &str) -> Result<(), IndexerError> {
        let Some(current) = self.store.load().await? else {
            return Ok(());
        };
        let cursor = SyncCursor {
            recent_errors: error.to_string(),
            ..current
        };
        self.store.save(&cursor).await
    }

    /// Rewind the cursor so the next pass starts at `block`.
    pub async fn reset(&self, block: u64, total_records: u64) -> Result<SyncCursor, IndexerError> {
        let cursor = SyncCursor {
            last_synced_block: block as i64 - 1,
            last_sync_time: chrono::Utc::now().timestamp(),
            total_records,
            recent_errors: String::new(),
        };
        self.store.save(&cursor).await?;
        Ok(cursor)
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::sync::Mutex;

/// In-memory cursor store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCursorStore {
    data: Mutex<Option<SyncCursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<SyncCursor>, IndexerError> {
        let data = self
            .data
            .lock()
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(data.clone())
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<(), IndexerError> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        *data = Some(cursor.clone());
        Ok(())
    }
}
