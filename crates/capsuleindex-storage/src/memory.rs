//! In-memory storage backend.
//!
//! Holds capsule records and the sync cursor in RAM.
//! Useful for testing and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use capsuleindex_core::cursor::{CursorStore, SyncCursor};
use capsuleindex_core::error::IndexerError;
use capsuleindex_core::store::RecordStore;
use capsuleindex_core::types::{CapsuleRecord, ListQuery};

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    records: RwLock<BTreeMap<u64, CapsuleRecord>>,
    cursor: RwLock<Option<SyncCursor>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<u64, CapsuleRecord>>, IndexerError> {
        self.records
            .read()
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<u64, CapsuleRecord>>, IndexerError> {
        self.records
            .write()
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }

    /// Newest-id-first records passing `filter`, capped at `limit`.
    fn newest_first<F>(&self, limit: u64, filter: F) -> Result<Vec<CapsuleRecord>, IndexerError>
    where
        F: Fn(&CapsuleRecord) -> bool,
    {
        Ok(self
            .read()?
            .values()
            .rev()
            .filter(|r| filter(r))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordStore for InMemoryStorage {
    async fn upsert(&self, record: &CapsuleRecord) -> Result<(), IndexerError> {
        let now = chrono::Utc::now().timestamp();
        let mut records = self.write()?;
        let created_at = records.get(&record.id).map_or(now, |r| r.created_at);
        records.insert(
            record.id,
            CapsuleRecord {
                created_at,
                updated_at: now,
                ..record.clone()
            },
        );
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<CapsuleRecord>, IndexerError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<CapsuleRecord>, IndexerError> {
        Ok(self
            .read()?
            .values()
            .rev()
            .filter(|r| query.matches(r))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError> {
        self.newest_first(limit, |r| r.matches_search(query))
    }

    async fn by_creator(
        &self,
        creator: &str,
        limit: u64,
    ) -> Result<Vec<CapsuleRecord>, IndexerError> {
        self.newest_first(limit, |r| r.creator.eq_ignore_ascii_case(creator))
    }

    async fn recent(&self, since: Duration, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError> {
        let cutoff = chrono::Utc::now().timestamp() - since.as_secs() as i64;
        let mut rows: Vec<CapsuleRecord> = self
            .read()?
            .values()
            .filter(|r| r.created_at >= cutoff)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count(&self) -> Result<u64, IndexerError> {
        Ok(self.read()?.len() as u64)
    }

    async fn count_revealed(&self) -> Result<u64, IndexerError> {
        Ok(self.read()?.values().filter(|r| r.revealed).count() as u64)
    }

    async fn count_by_creator(&self, creator: &str) -> Result<u64, IndexerError> {
        Ok(self
            .read()?
            .values()
            .filter(|r| r.creator.eq_ignore_ascii_case(creator))
            .count() as u64)
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        let mut records = self.write()?;
        let n = records.len();
        records.clear();
        tracing::warn!(deleted = n, "Cleared all capsule records");
        Ok(())
    }
}

#[async_trait]
impl CursorStore for InMemoryStorage {
    async fn load(&self) -> Result<Option<SyncCursor>, IndexerError> {
        let cursor = self
            .cursor
            .read()
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(cursor.clone())
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<(), IndexerError> {
        let mut slot = self
            .cursor
            .write()
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        *slot = Some(cursor.clone());
        Ok(())
    }
}
