//! Scripted log source and minimal record store shared by unit tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::IndexerError;
use crate::source::{CountSource, LogSource};
use crate::store::RecordStore;
use crate::types::{CapsuleRecord, CreatedFields, EventFields, EventKind, ListQuery, LogEntry};

pub fn created(id: u64, block: u64, tx: u32) -> LogEntry {
    LogEntry {
        kind: EventKind::Created,
        fields: EventFields::Created(CreatedFields {
            id,
            creator: "0x1111111111111111111111111111111111111111".into(),
            title: format!("Capsule {id}"),
            tags: "test,memories".into(),
            encrypted_payload: vec![id as u8, 0xff],
            reveal_time: 1_700_000_000 + id as i64,
            identity_ref: format!("0xidentity{id}"),
            image_ref: format!("bafyimage{id}"),
            pixelated_image_ref: format!("bafypixel{id}"),
        }),
        block_number: block,
        transaction_index: tx,
        log_index: tx,
        transaction_hash: format!("0x{block:x}{tx:02x}"),
    }
}

pub fn revealed(id: u64, text: &str, block: u64, tx: u32) -> LogEntry {
    LogEntry {
        kind: EventKind::Revealed,
        fields: EventFields::Revealed {
            id,
            plaintext_payload: text.to_string(),
        },
        block_number: block,
        transaction_index: tx,
        log_index: tx,
        transaction_hash: format!("0x{block:x}{tx:02x}"),
    }
}

/// Log source backed by a fixed list of entries.
pub struct ScriptedSource {
    head: AtomicU64,
    logs: Mutex<Vec<LogEntry>>,
    fail_next: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(vec![]),
            fail_next: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, log: LogEntry) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().unwrap() = Some(reason.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn head_block(&self) -> Result<u64, IndexerError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_logs(
        &self,
        kinds: &[EventKind],
        from: u64,
        to: u64,
    ) -> Result<Vec<LogEntry>, IndexerError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.fail_next.lock().unwrap().take();
        let result = match failure {
            Some(reason) => Err(IndexerError::Upstream(reason)),
            None => Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| kinds.contains(&l.kind))
                .filter(|l| l.block_number >= from && l.block_number <= to)
                .cloned()
                .collect()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct StaticCount(pub u64);

#[async_trait]
impl CountSource for StaticCount {
    async fn authoritative_count(&self) -> Result<u64, IndexerError> {
        Ok(self.0)
    }
}

/// Bare-bones record store keyed by id.
#[derive(Default)]
pub struct TestStore {
    rows: Mutex<BTreeMap<u64, CapsuleRecord>>,
    pub fail_writes: AtomicBool,
    pub writes: AtomicUsize,
}

impl TestStore {
    pub fn snapshot(&self) -> Vec<CapsuleRecord> {
        self.rows.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for TestStore {
    async fn upsert(&self, record: &CapsuleRecord) -> Result<(), IndexerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexerError::Storage("disk full".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<CapsuleRecord>, IndexerError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<CapsuleRecord>, IndexerError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .rev()
            .filter(|r| query.matches(r))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .rev()
            .filter(|r| r.matches_search(query))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn by_creator(&self, creator: &str, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .rev()
            .filter(|r| r.creator == creator)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn recent(&self, _since: Duration, limit: u64) -> Result<Vec<CapsuleRecord>, IndexerError> {
        Ok(self.rows.lock().unwrap().values().rev().take(limit as usize).cloned().collect())
    }

    async fn count(&self) -> Result<u64, IndexerError> {
        Ok(self.rows.lock().unwrap().len() as u64)
    }

    async fn count_revealed(&self) -> Result<u64, IndexerError> {
        Ok(self.rows.lock().unwrap().values().filter(|r| r.revealed).count() as u64)
    }

    async fn count_by_creator(&self, creator: &str) -> Result<u64, IndexerError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.creator == creator)
            .count() as u64)
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}
