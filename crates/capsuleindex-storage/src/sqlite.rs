//! SQLite storage backend for CapsuleIndex.
//!
//! Persists capsule records and the sync cursor to a single SQLite file.
//! Uses `sqlx` with WAL mode so the query layer can read while a pass writes.
//!
//! # Usage
//! ```rust,no_run
//! use capsuleindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./capsules.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::time::Duration;
use tracing::debug;

use capsuleindex_core::cursor::{CursorStore, SyncCursor};
use capsuleindex_core::error::IndexerError;
use capsuleindex_core::store::RecordStore;
use capsuleindex_core::types::{CapsuleRecord, ListQuery};

const RECORD_COLUMNS: &str = "id, creator, title, tags, encrypted_payload, decrypted_payload, \
     revealed, reveal_time, identity_ref, image_ref, pixelated_image_ref, block_number, \
     transaction_hash, created_at, updated_at";

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed storage for capsule records and the sync cursor.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./capsules.db"`) or a full
    /// SQLite URL (`"sqlite:./capsules.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection would get its own private database, so the
    /// pool is pinned to one connection. All data is lost when it is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS capsules (
                id                  INTEGER PRIMARY KEY,
                creator             TEXT    NOT NULL,
                title               TEXT    NOT NULL,
                tags                TEXT    NOT NULL,
                encrypted_payload   BLOB    NOT NULL,
                decrypted_payload   TEXT    NOT NULL DEFAULT '',
                revealed            INTEGER NOT NULL DEFAULT 0,
                reveal_time         INTEGER NOT NULL,
                identity_ref        TEXT    NOT NULL,
                image_ref           TEXT    NOT NULL,
                pixelated_image_ref TEXT    NOT NULL,
                block_number        INTEGER NOT NULL,
                transaction_hash    TEXT    NOT NULL,
                created_at          INTEGER NOT NULL,
                updated_at          INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_status (
                id                INTEGER PRIMARY KEY CHECK (id = 1),
                last_synced_block INTEGER NOT NULL,
                last_sync_time    INTEGER NOT NULL,
                total_records     INTEGER NOT NULL,
                recent_errors     TEXT    NOT NULL DEFAULT ''
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_capsules_creator ON capsules (creator);",
            "CREATE INDEX IF NOT EXISTS idx_capsules_revealed ON capsules (revealed);",
            "CREATE INDEX IF NOT EXISTS idx_capsules_created_at ON capsules (created_at);",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        Ok(())
    }

    async fn fetch_records(
        &self,
        sql: &str,
        binds: &[&str],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<CapsuleRecord>, IndexerError> {
        let mut query = sqlx::query(sql);
        for b in binds {
            query = query.bind(*b);
        }
        let rows = query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(|r| read_record(r).map_err(storage_err)).collect()
    }

    async fn scalar(&self, sql: &str, bind: Option<&str>) -> Result<u64, IndexerError> {
        let mut query = sqlx::query(sql);
        if let Some(b) = bind {
            query = query.bind(b);
        }
        let row = query.fetch_one(&self.pool).await.map_err(storage_err)?;
        let n: i64 = row.try_get(0).map_err(storage_err)?;
        Ok(n as u64)
    }
}

fn read_record(row: &SqliteRow) -> Result<CapsuleRecord, sqlx::Error> {
    Ok(CapsuleRecord {
        id: row.try_get::<i64, _>("id")? as u64,
        creator: row.try_get("creator")?,
        title: row.try_get("title")?,
        tags: row.try_get("tags")?,
        encrypted_payload: row.try_get("encrypted_payload")?,
        decrypted_payload: row.try_get("decrypted_payload")?,
        revealed: row.try_get("revealed")?,
        reveal_time: row.try_get("reveal_time")?,
        identity_ref: row.try_get("identity_ref")?,
        image_ref: row.try_get("image_ref")?,
        pixelated_image_ref: row.try_get("pixelated_image_ref")?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        transaction_hash: row.try_get("transaction_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// `%query%` with LIKE wildcards in `query` escaped by `\`.
fn like_pattern(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    out.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl RecordStore for SqliteStorage {
    async fn upsert(&self, record: &CapsuleRecord) -> Result<(), IndexerError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO capsules (
                id, creator, title, tags, encrypted_payload, decrypted_payload, revealed,
                reveal_time, identity_ref, image_ref, pixelated_image_ref, block_number,
                transaction_hash, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                creator             = excluded.creator,
                title               = excluded.title,
                tags                = excluded.tags,
                encrypted_payload   = excluded.encrypted_payload,
                decrypted_payload   = excluded.decrypted_payload,
                revealed            = excluded.revealed,
                reveal_time         = excluded.reveal_time,
                identity_ref        = excluded.identity_ref,
                image_ref           = excluded.image_ref,
                pixelated_image_ref = excluded.pixelated_image_ref,
                block_number        = excluded.block_number,
                transaction_hash    = excluded.transaction_hash,
                updated_at          = excluded.updated_at",
        )
        .bind(record.id as i64)
        .bind(&record.creator)
        .bind(&record.title)
        .bind(&record.tags)
        .bind(&record.encrypted_payload)
        .bind(&record.decrypted_payload)
        .bind(record.revealed)
        .bind(record.reveal_time)
        .bind(&record.identity_ref)
        .bind(&record.image_ref)
        .bind(&record.pixelated_image_ref)
        .bind(record.block_number as i64)
        .bind(&record.transaction_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(id = record.id, revealed = record.revealed, "capsule stored");
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<CapsuleRecord>, IndexerError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM capsules WHERE id = ?"))
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(read_record).transpose().map_err(storage_err)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<CapsuleRecord>, IndexerError> {
        let revealed = if query.revealed_only { " AND revealed = 1" } else { "" };

        let Some(tag) = query.tag_filter() else {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM capsules WHERE 1 = 1{revealed}
                 ORDER BY id DESC LIMIT ? OFFSET ?"
            );
            return self.fetch_records(&sql, &[], query.limit, query.offset).await;
        };

        // LIKE narrows the candidates; exact tag matching happens per row so
        // whitespace around commas is handled the same way as in memory.
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM capsules
             WHERE tags LIKE ? ESCAPE '\\'{revealed}
             ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        let pattern = like_pattern(tag);
        let candidates = self.fetch_records(&sql, &[pattern.as_str()], i64::MAX as u64, 0).await?;
        Ok(candidates
            .into_iter()
            .filter(|r| r.has_tag(tag))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError> {
        let pattern = like_pattern(query);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM capsules
             WHERE title LIKE ?1 ESCAPE '\\' OR tags LIKE ?1 ESCAPE '\\' OR creator LIKE ?1 ESCAPE '\\'
             ORDER BY id DESC LIMIT ?2 OFFSET ?3"
        );
        self.fetch_records(&sql, &[pattern.as_str()], limit, 0).await
    }

    async fn by_creator(
        &self,
        creator: &str,
        limit: u64,
    ) -> Result<Vec<CapsuleRecord>, IndexerError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM capsules WHERE lower(creator) = lower(?)
             ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        self.fetch_records(&sql, &[creator], limit, 0).await
    }

    async fn recent(&self, since: Duration, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError> {
        let cutoff = chrono::Utc::now().timestamp() - since.as_secs() as i64;
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM capsules WHERE created_at >= ?
             ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(|r| read_record(r).map_err(storage_err)).collect()
    }

    async fn count(&self) -> Result<u64, IndexerError> {
        self.scalar("SELECT COUNT(*) FROM capsules", None).await
    }

    async fn count_revealed(&self) -> Result<u64, IndexerError> {
        self.scalar("SELECT COUNT(*) FROM capsules WHERE revealed = 1", None)
            .await
    }

    async fn count_by_creator(&self, creator: &str) -> Result<u64, IndexerError> {
        self.scalar(
            "SELECT COUNT(*) FROM capsules WHERE lower(creator) = lower(?)",
            Some(creator),
        )
        .await
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        let result = sqlx::query("DELETE FROM capsules")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        tracing::warn!(deleted = result.rows_affected(), "Cleared all capsule records");
        Ok(())
    }
}

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteStorage {
    async fn load(&self) -> Result<Option<SyncCursor>, IndexerError> {
        let row = sqlx::query(
            "SELECT last_synced_block, last_sync_time, total_records, recent_errors
             FROM sync_status WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(r) = row else {
            return Ok(None);
        };
        Ok(Some(SyncCursor {
            last_synced_block: r.try_get("last_synced_block").map_err(storage_err)?,
            last_sync_time: r.try_get("last_sync_time").map_err(storage_err)?,
            total_records: r.try_get::<i64, _>("total_records").map_err(storage_err)? as u64,
            recent_errors: r.try_get("recent_errors").map_err(storage_err)?,
        }))
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_status
             (id, last_synced_block, last_sync_time, total_records, recent_errors)
             VALUES (1, ?, ?, ?, ?)",
        )
        .bind(cursor.last_synced_block)
        .bind(cursor.last_sync_time)
        .bind(cursor.total_records as i64)
        .bind(&cursor.recent_errors)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(block = cursor.last_synced_block, "sync cursor saved");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
