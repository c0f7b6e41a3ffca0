//! capsuleindex-storage — record and cursor backends for CapsuleIndex.
//!
//! Backends:
//! - [`memory`]: in-memory, for development and tests
//! - [`sqlite`]: single-file SQLite via `sqlx`
//!
//! Every backend implements both [`RecordStore`](capsuleindex_core::RecordStore)
//! and [`CursorStore`](capsuleindex_core::CursorStore), so one handle serves
//! the sync controller and the query layer.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
