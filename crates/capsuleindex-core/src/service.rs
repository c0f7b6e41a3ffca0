//! `SyncService`, the explicitly constructed indexer instance handed to the
//! request-serving layer.
//!
//! It owns the [`SyncController`], the periodic background task and the
//! [`HealthReporter`]. The background task checks a cancellation signal once
//! per loop iteration and is joined by [`SyncService::shutdown`].

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::cursor::SyncCursor;
use crate::error::IndexerError;
use crate::health::{GalleryStats, HealthReporter, SyncHealth};
use crate::store::RecordStore;
use crate::sync::{PassResult, SyncController};

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A running (or stoppable) indexer.
pub struct SyncService {
    controller: Arc<SyncController>,
    health: HealthReporter,
    worker: Mutex<Option<Worker>>,
}

impl SyncService {
    pub fn new(controller: SyncController, health: HealthReporter) -> Self {
        Self {
            controller: Arc::new(controller),
            health,
            worker: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &Arc<SyncController> {
        &self.controller
    }

    /// Record store for listing, lookup and search.
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        self.controller.store()
    }

    /// Start the periodic sync task. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            tracing::warn!("Sync service is already running");
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let controller = self.controller.clone();
        let handle = tokio::spawn(sync_loop(controller, stop_rx));
        *worker = Some(Worker { stop, handle });
        tracing::info!(
            interval_ms = self.controller.config().sync_interval_ms,
            "Event sync service started"
        );
    }

    /// Signal the periodic task to stop and wait for it to exit.
    ///
    /// An in-flight pass is allowed to finish.
    pub async fn shutdown(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        let _ = worker.stop.send(true);
        if let Err(e) = worker.handle.await {
            tracing::error!(error = %e, "Sync task ended abnormally");
        }
        tracing::info!("Event sync service stopped");
    }

    /// Whether the periodic task is alive.
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Run a pass now, waiting for any in-flight pass first.
    ///
    /// Pass-level errors are folded into the returned result.
    pub async fn force_sync(&self) -> PassResult {
        tracing::info!("Force event sync requested");
        let started = Instant::now();
        match self.controller.sync().await {
            Ok(result) => result,
            Err(e) => PassResult::failed(&e, started.elapsed().as_millis() as u64),
        }
    }

    pub async fn health(&self) -> Result<SyncHealth, IndexerError> {
        let running = self.is_running().await;
        self.health.report(&self.controller, running).await
    }

    pub async fn stats(&self) -> Result<GalleryStats, IndexerError> {
        self.health.stats(&self.controller).await
    }

    /// Administrative: rewind so passes replay from `block`.
    pub async fn resync_from(
        &self,
        block: u64,
        clear_records: bool,
    ) -> Result<SyncCursor, IndexerError> {
        self.controller.resync_from(block, clear_records).await
    }

    /// Administrative: change the start block for future passes.
    pub fn set_start_block(&self, block: u64) {
        self.controller.set_start_block(block);
    }

    pub fn start_block(&self) -> u64 {
        self.controller.start_block()
    }
}

async fn sync_loop(controller: Arc<SyncController>, mut stop: watch::Receiver<bool>) {
    let interval = controller.config().sync_interval();
    loop {
        if *stop.borrow() {
            break;
        }
        // Failures are already logged and recorded on the cursor by the controller.
        if let Err(e) = controller.sync().await {
            tracing::debug!(error = %e, "Periodic pass failed; retrying next tick");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
