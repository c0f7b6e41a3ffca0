//! capsuleindex-core — the event-sourced mirror behind the time-capsule gallery.
//!
//! # Architecture
//!
//! ```text
//! SyncService (periodic task, force_sync, admin)
//!     └── SyncController  (one pass at a time)
//!             ├── ChainLogReader  (bounded, ordered log fetches)
//!             ├── EventMapper     (Created / Revealed → record upserts)
//!             ├── CursorManager   (last fully applied block)
//!             └── RecordStore     (memory / SQLite)
//!     └── HealthReporter  (lag, staleness, drift against the chain count)
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod health;
pub mod mapper;
pub mod service;
pub mod source;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{IndexerConfig, SyncState};
pub use cursor::{CursorManager, CursorStore, MemoryCursorStore, SyncCursor};
pub use error::IndexerError;
pub use health::{GalleryStats, HealthReporter, SyncHealth};
pub use mapper::{Applied, BatchOutcome, EventMapper};
pub use service::SyncService;
pub use source::{ChainLogReader, CountSource, LogSource};
pub use store::RecordStore;
pub use sync::{PassResult, SyncController};
pub use types::{CapsuleRecord, CreatedFields, EventFields, EventKind, ListQuery, LogEntry};
