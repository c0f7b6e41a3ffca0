//! Health reporting: how far the mirror lags the chain.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cursor::SyncCursor;
use crate::error::IndexerError;
use crate::source::CountSource;
use crate::sync::SyncController;

/// Snapshot of sync health, derived from the cursor and live chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHealth {
    pub is_healthy: bool,
    pub is_running: bool,
    pub last_sync_time: i64,
    pub seconds_since_sync: i64,
    pub current_block: u64,
    pub last_synced_block: i64,
    pub blocks_behind: u64,
    /// Capsule count according to the chain, when a count source is available.
    pub chain_records: Option<u64>,
    pub local_records: u64,
    /// `chain_records - local_records`; `None` when the chain count is unavailable.
    pub drift: Option<i64>,
    pub recent_errors: String,
    pub sync_interval_secs: u64,
    pub batch_window: u64,
    pub start_block: u64,
    pub blocks_processed: u64,
}

/// Gallery-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryStats {
    pub total: u64,
    pub revealed: u64,
    pub unrevealed: u64,
    pub recent_24h: u64,
}

const RECENT_WINDOW: Duration = Duration::from_secs(24 * 3600);
const RECENT_LIMIT: u64 = 100;

/// Derives [`SyncHealth`] from a controller and an optional count source.
pub struct HealthReporter {
    count_source: Option<Arc<dyn CountSource>>,
}

impl HealthReporter {
    pub fn new(count_source: Option<Arc<dyn CountSource>>) -> Self {
        Self { count_source }
    }

    /// Report health as of now.
    pub async fn report(
        &self,
        controller: &SyncController,
        is_running: bool,
    ) -> Result<SyncHealth, IndexerError> {
        self.report_at(controller, is_running, chrono::Utc::now().timestamp())
            .await
    }

    /// Report health as of the unix timestamp `now`.
    pub async fn report_at(
        &self,
        controller: &SyncController,
        is_running: bool,
        now: i64,
    ) -> Result<SyncHealth, IndexerError> {
        let config = controller.config();
        let start_block = controller.start_block();
        // Read-only: before the first pass, report the cursor it would create.
        let cursor = controller
            .cursor()
            .load()
            .await?
            .unwrap_or_else(|| SyncCursor::initial(start_block, 0));
        let current_block = controller.reader().head_block().await?;
        let local_records = controller.store().count().await?;

        let chain_records = match &self.count_source {
            Some(source) => match source.authoritative_count().await {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!(error = %e, "Authoritative count unavailable; drift not reported");
                    None
                }
            },
            None => None,
        };

        let seconds_since_sync = now - cursor.last_sync_time;
        let last = cursor.last_synced_block;

        Ok(SyncHealth {
            is_healthy: seconds_since_sync < config.healthy_threshold_secs as i64,
            is_running,
            last_sync_time: cursor.last_sync_time,
            seconds_since_sync,
            current_block,
            last_synced_block: last,
            blocks_behind: (current_block as i64 - last).max(0) as u64,
            chain_records,
            local_records,
            drift: chain_records.map(|c| c as i64 - local_records as i64),
            recent_errors: cursor.recent_errors,
            sync_interval_secs: config.sync_interval().as_secs(),
            batch_window: config.batch_window,
            start_block,
            blocks_processed: (last - start_block as i64 + 1).max(0) as u64,
        })
    }

    /// Gallery-wide counters from the record store.
    pub async fn stats(&self, controller: &SyncController) -> Result<GalleryStats, IndexerError> {
        let store = controller.store();
        let total = store.count().await?;
        let revealed = store.count_revealed().await?;
        let recent_24h = store.recent(RECENT_WINDOW, RECENT_LIMIT).await?.len() as u64;
        Ok(GalleryStats {
            total,
            revealed,
            unrevealed: total.saturating_sub(revealed),
            recent_24h,
        })
    }
}
