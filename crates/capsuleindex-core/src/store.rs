//! The materialized record store, a keyed table of capsule records.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::IndexerError;
use crate::types::{CapsuleRecord, ListQuery};

/// Trait for storing and querying mirrored capsule records.
///
/// Every write is atomic per row; there is no cross-row transaction. Readers
/// may observe a batch partially applied but never a half-written row.
///
/// Implementations: `InMemoryStorage` and `SqliteStorage` in
/// `capsuleindex-storage`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record keyed by `record.id`.
    ///
    /// Last write wins per field. `created_at` is assigned on first insert and
    /// preserved afterwards; `updated_at` is refreshed on every call. The
    /// audit timestamps carried in `record` are ignored.
    async fn upsert(&self, record: &CapsuleRecord) -> Result<(), IndexerError>;

    /// Point lookup by capsule id.
    async fn get(&self, id: u64) -> Result<Option<CapsuleRecord>, IndexerError>;

    /// A page of records, newest id first.
    async fn list(&self, query: &ListQuery) -> Result<Vec<CapsuleRecord>, IndexerError>;

    /// Records whose title, tags or creator contain `query`
    /// (case-insensitive), newest id first.
    async fn search(&self, query: &str, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError>;

    /// Records created by `creator`, newest id first.
    async fn by_creator(&self, creator: &str, limit: u64)
        -> Result<Vec<CapsuleRecord>, IndexerError>;

    /// Records inserted locally within the last `since`, newest first.
    async fn recent(&self, since: Duration, limit: u64)
        -> Result<Vec<CapsuleRecord>, IndexerError>;

    async fn count(&self) -> Result<u64, IndexerError>;

    async fn count_revealed(&self) -> Result<u64, IndexerError>;

    async fn count_by_creator(&self, creator: &str) -> Result<u64, IndexerError>;

    /// Delete every record. Only the explicit destructive resync calls this.
    async fn clear(&self) -> Result<(), IndexerError>;
}
