//! The sync controller. One pass is a bounded fetch, decode, apply, advance cycle.
//!
//! # Pass
//! 1. `from = max(cursor + 1, start_block)`
//! 2. `to = min(head, from + batch_window - 1)`; nothing to do if `from > head`
//! 3. Fetch `Created` and `Revealed` logs for `[from, to]`, merge in chain order
//! 4. Apply each through the [`EventMapper`], collecting per-event errors
//! 5. Advance the cursor to `to`
//!
//! Upstream and storage failures abort the pass before step 5, so the next
//! pass retries the same range. A single async mutex serializes passes and
//! administrative resets.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{IndexerConfig, SyncState};
use crate::cursor::{summarize_errors, CursorManager, CursorStore, SyncCursor};
use crate::error::IndexerError;
use crate::mapper::EventMapper;
use crate::source::{ChainLogReader, LogSource};
use crate::store::RecordStore;
use crate::types::{sort_chain_order, EventKind};

/// Result of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassResult {
    pub success: bool,
    pub from_block: u64,
    pub to_block: u64,
    pub events_processed: u64,
    pub created: u64,
    pub revealed: u64,
    pub errors: Vec<String>,
    /// Local record count after the pass.
    pub total_records: u64,
    pub duration_ms: u64,
}

impl PassResult {
    /// A pass that aborted with a pass-level error.
    pub fn failed(error: &IndexerError, duration_ms: u64) -> Self {
        Self {
            success: false,
            errors: vec![format!("Sync failed: {error}")],
            duration_ms,
            ..Default::default()
        }
    }
}

/// Marks the controller as syncing for as long as it is alive.
struct SyncingGuard<'a>(&'a AtomicBool);

impl<'a> SyncingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the sync pass and the cursor it advances.
pub struct SyncController {
    config: IndexerConfig,
    start_block: AtomicU64,
    reader: ChainLogReader,
    mapper: EventMapper,
    store: Arc<dyn RecordStore>,
    cursor: CursorManager,
    pass_lock: tokio::sync::Mutex<()>,
    syncing: AtomicBool,
}

impl SyncController {
    pub fn new(
        config: IndexerConfig,
        source: Arc<dyn LogSource>,
        store: Arc<dyn RecordStore>,
        cursor_store: Arc<dyn CursorStore>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        Ok(Self {
            start_block: AtomicU64::new(config.start_block),
            reader: ChainLogReader::new(source, config.max_log_window),
            mapper: EventMapper::new(store.clone()),
            store,
            cursor: CursorManager::new(cursor_store),
            pass_lock: tokio::sync::Mutex::new(()),
            syncing: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn reader(&self) -> &ChainLogReader {
        &self.reader
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn cursor(&self) -> &CursorManager {
        &self.cursor
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::SeqCst) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// The block passes never fetch below.
    pub fn start_block(&self) -> u64 {
        self.start_block.load(Ordering::SeqCst)
    }

    /// Change the start block for future passes.
    pub fn set_start_block(&self, block: u64) {
        let old = self.start_block.swap(block, Ordering::SeqCst);
        tracing::info!(old, new = block, "Updated start block");
    }

    /// Run one pass, waiting for any in-flight pass to finish first.
    pub async fn sync(&self) -> Result<PassResult, IndexerError> {
        let _lock = self.pass_lock.lock().await;
        self.run_pass().await
    }

    /// Run one pass, or fail with [`IndexerError::SyncInProgress`] if another
    /// pass holds the lock.
    pub async fn try_sync(&self) -> Result<PassResult, IndexerError> {
        let _lock = self
            .pass_lock
            .try_lock()
            .map_err(|_| IndexerError::SyncInProgress)?;
        self.run_pass().await
    }

    /// Rewind the cursor so the next pass starts at `block`.
    ///
    /// With `clear_records` the record store is emptied first. A `block` below
    /// the configured start block lowers the start block so the replay covers
    /// it.
    pub async fn resync_from(
        &self,
        block: u64,
        clear_records: bool,
    ) -> Result<SyncCursor, IndexerError> {
        let _lock = self.pass_lock.lock().await;
        tracing::warn!(block, clear_records, "Resyncing from block");

        if block < self.start_block() {
            self.set_start_block(block);
        }
        if clear_records {
            self.store.clear().await?;
        }
        let total = self.store.count().await?;
        self.cursor.reset(block, total).await
    }

    /// Rewind the cursor to the configured start block.
    pub async fn resync_from_start(&self, clear_records: bool) -> Result<SyncCursor, IndexerError> {
        self.resync_from(self.start_block(), clear_records).await
    }

    async fn run_pass(&self) -> Result<PassResult, IndexerError> {
        let _syncing = SyncingGuard::enter(&self.syncing);
        let started = Instant::now();

        match self.pass(started).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::error!(error = %e, "Event sync failed");
                if let Err(write_err) = self.cursor.record_failure(&format!("Sync failed: {e}")).await {
                    tracing::warn!(error = %write_err, "Could not record sync failure");
                }
                Err(e)
            }
        }
    }

    async fn pass(&self, started: Instant) -> Result<PassResult, IndexerError> {
        let start_block = self.start_block();
        let cursor = self.cursor.load_or_init(start_block).await?;
        let head = self.reader.head_block().await?;

        let from = cursor.next_block(start_block);
        if from > head {
            tracing::debug!(from, head, "Already caught up");
            self.cursor.touch(&cursor).await?;
            return Ok(PassResult {
                success: true,
                from_block: from,
                to_block: head,
                total_records: cursor.total_records,
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }
        let to = head.min(from + self.config.batch_window - 1);

        tracing::info!(from, to, head, "Syncing events");

        let (created, revealed) = futures::try_join!(
            self.reader.fetch_logs(&[EventKind::Created], from, to),
            self.reader.fetch_logs(&[EventKind::Revealed], from, to),
        )?;
        let mut logs = created;
        logs.extend(revealed);
        sort_chain_order(&mut logs);

        let outcome = self.mapper.apply_batch(logs).await?;
        let total_records = self.store.count().await?;
        let summary = summarize_errors(&outcome.errors, self.config.max_recent_errors);
        self.cursor.advance(to, total_records, summary).await?;

        let result = PassResult {
            success: true,
            from_block: from,
            to_block: to,
            events_processed: outcome.events_processed,
            created: outcome.created,
            revealed: outcome.revealed,
            errors: outcome.errors,
            total_records,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            from,
            to,
            created = result.created,
            revealed = result.revealed,
            errors = result.errors.len(),
            total = total_records,
            duration_ms = result.duration_ms,
            "Event sync completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::test_support::{created, revealed, ScriptedSource, TestStore};
    use std::sync::atomic::Ordering;

    struct Fixture {
        source: Arc<ScriptedSource>,
        store: Arc<TestStore>,
        cursor: Arc<MemoryCursorStore>,
        controller: SyncController,
    }

    fn fixture(head: u64, config: IndexerConfig) -> Fixture {
        let source = Arc::new(ScriptedSource::new(head));
        let store = Arc::new(TestStore::default());
        let cursor = Arc::new(MemoryCursorStore::new());
        let controller =
            SyncController::new(config, source.clone(), store.clone(), cursor.clone()).unwrap();
        Fixture { source, store, cursor, controller }
    }

    fn config(start_block: u64, batch_window: u64) -> IndexerConfig {
        IndexerConfig {
            start_block,
            batch_window,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pass_advances_cursor_by_batch_window() {
        let f = fixture(5_000, config(1_000, 100));
        f.source.push(created(1, 1_010, 0));
        f.source.push(created(2, 1_150, 0));

        let r = f.controller.sync().await.unwrap();
        assert!(r.success);
        assert_eq!((r.from_block, r.to_block), (1_000, 1_099));
        assert_eq!(r.created, 1);

        let r = f.controller.sync().await.unwrap();
        assert_eq!((r.from_block, r.to_block), (1_100, 1_199));
        assert_eq!(r.created, 1);
        assert_eq!(r.total_records, 2);

        let cursor = f.cursor.load().await.unwrap().unwrap();
        assert_eq!(cursor.last_synced_block, 1_199);
        assert_eq!(cursor.total_records, 2);
    }

    #[tokio::test]
    async fn caught_up_pass_is_a_noop_success() {
        let f = fixture(50, config(0, 1_000));
        let r = f.controller.sync().await.unwrap();
        assert_eq!(r.to_block, 50);

        let r = f.controller.sync().await.unwrap();
        assert!(r.success);
        assert_eq!(r.events_processed, 0);
        assert_eq!(r.from_block, 51);
        assert_eq!(f.source.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.cursor.load().await.unwrap().unwrap().last_synced_block, 50);
    }

    #[tokio::test]
    async fn upstream_failure_leaves_cursor_in_place() {
        let f = fixture(500, config(100, 1_000));
        f.source.push(created(1, 150, 0));
        f.source.fail_next("HTTP 429");

        let err = f.controller.sync().await.unwrap_err();
        assert!(matches!(err, IndexerError::Upstream(_)));
        let cursor = f.cursor.load().await.unwrap().unwrap();
        assert_eq!(cursor.last_synced_block, 99);
        assert!(cursor.recent_errors.contains("HTTP 429"));

        // Next pass retries the same range.
        let r = f.controller.sync().await.unwrap();
        assert_eq!(r.from_block, 100);
        assert_eq!(r.created, 1);
    }

    #[tokio::test]
    async fn storage_failure_leaves_cursor_in_place() {
        let f = fixture(500, config(100, 1_000));
        f.source.push(created(1, 150, 0));
        f.store.fail_writes.store(true, Ordering::SeqCst);

        let err = f.controller.sync().await.unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
        assert_eq!(f.cursor.load().await.unwrap().unwrap().last_synced_block, 99);
    }

    #[tokio::test]
    async fn per_event_errors_are_summarized() {
        let mut cfg = config(0, 1_000);
        cfg.max_recent_errors = 2;
        let f = fixture(100, cfg);
        for id in 0..4 {
            f.source.push(revealed(900 + id, "x", 10 + id, 0));
        }
        f.source.push(created(1, 20, 0));

        let r = f.controller.sync().await.unwrap();
        assert!(r.success);
        assert_eq!(r.errors.len(), 4);
        assert_eq!(r.created, 1);

        let cursor = f.cursor.load().await.unwrap().unwrap();
        assert_eq!(cursor.last_synced_block, 100);
        assert_eq!(cursor.recent_errors.matches("; ").count(), 1);
        assert!(cursor.recent_errors.contains("#903"));
    }

    #[tokio::test]
    async fn try_sync_rejects_while_syncing() {
        let f = fixture(100, config(0, 1_000));
        f.source.set_delay(std::time::Duration::from_millis(200));
        let controller = Arc::new(f.controller);

        let running = {
            let c = controller.clone();
            tokio::spawn(async move { c.sync().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(controller.state(), SyncState::Syncing);
        assert!(matches!(controller.try_sync().await, Err(IndexerError::SyncInProgress)));

        running.await.unwrap().unwrap();
        assert_eq!(controller.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn resync_rewinds_and_optionally_clears() {
        let f = fixture(300, config(100, 1_000));
        f.source.push(created(1, 150, 0));
        f.source.push(created(2, 250, 0));
        f.controller.sync().await.unwrap();
        assert_eq!(f.store.count().await.unwrap(), 2);

        let cursor = f.controller.resync_from(200, false).await.unwrap();
        assert_eq!(cursor.last_synced_block, 199);
        assert_eq!(cursor.total_records, 2);
        let r = f.controller.sync().await.unwrap();
        assert_eq!(r.from_block, 200);
        assert_eq!(f.store.count().await.unwrap(), 2);

        f.controller.resync_from_start(true).await.unwrap();
        assert_eq!(f.store.count().await.unwrap(), 0);
        let r = f.controller.sync().await.unwrap();
        assert_eq!(r.created, 2);
    }

    #[tokio::test]
    async fn resync_below_start_block_lowers_it() {
        let f = fixture(300, config(100, 1_000));
        f.source.push(created(1, 60, 0));
        f.controller.resync_from(50, false).await.unwrap();
        assert_eq!(f.controller.start_block(), 50);
        let r = f.controller.sync().await.unwrap();
        assert_eq!(r.from_block, 50);
        assert_eq!(r.created, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let source = Arc::new(ScriptedSource::new(0));
        let result = SyncController::new(
            config(0, 0),
            source,
            Arc::new(TestStore::default()),
            Arc::new(MemoryCursorStore::new()),
        );
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }
}
