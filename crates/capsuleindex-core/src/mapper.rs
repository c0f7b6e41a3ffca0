//! Turns decoded capsule logs into record store mutations.
//!
//! `Created` events build a fresh record and upsert it. `Revealed` events load
//! the existing record, flip it to revealed and upsert it. A reveal for an id
//! the store has never seen is a reconciliation gap: it is reported and
//! skipped, never turned into a placeholder record.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::IndexerError;
use crate::store::RecordStore;
use crate::types::{sort_chain_order, CapsuleRecord, CreatedFields, EventFields, LogEntry};

/// The mutation a single log entry produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created { id: u64 },
    Revealed { id: u64 },
}

/// Aggregate outcome of applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub events_processed: u64,
    pub created: u64,
    pub revealed: u64,
    /// Per-event errors, in application order.
    pub errors: Vec<String>,
}

/// Applies capsule events to a [`RecordStore`].
#[derive(Clone)]
pub struct EventMapper {
    store: Arc<dyn RecordStore>,
}

impl EventMapper {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Apply one log entry.
    ///
    /// Errors for which [`IndexerError::is_per_event`] is true mean the entry
    /// was skipped without touching the store. Any other error comes from the
    /// store itself.
    pub async fn apply(&self, log: &LogEntry) -> Result<Applied, IndexerError> {
        match &log.fields {
            EventFields::Created(fields) => self.apply_created(fields, log).await,
            EventFields::Revealed {
                id,
                plaintext_payload,
            } => self.apply_revealed(*id, plaintext_payload, log).await,
            EventFields::Malformed { id, reason } => Err(IndexerError::Mapping {
                id: *id,
                reason: format!("undecodable {} log in tx {}: {reason}", log.kind, log.transaction_hash),
            }),
        }
    }

    /// Apply a batch in chain order, collecting per-event errors.
    ///
    /// Returns `Err` only for store failures, which abort the batch.
    pub async fn apply_batch(&self, mut logs: Vec<LogEntry>) -> Result<BatchOutcome, IndexerError> {
        sort_chain_order(&mut logs);
        let mut outcome = BatchOutcome::default();

        for log in &logs {
            match self.apply(log).await {
                Ok(Applied::Created { .. }) => {
                    outcome.created += 1;
                    outcome.events_processed += 1;
                }
                Ok(Applied::Revealed { .. }) => {
                    outcome.revealed += 1;
                    outcome.events_processed += 1;
                }
                Err(e) if e.is_per_event() => {
                    let msg = format!(
                        "Error processing {} event {}: {e}",
                        log.kind, log.transaction_hash
                    );
                    tracing::warn!(
                        kind = %log.kind,
                        block = log.block_number,
                        tx = %log.transaction_hash,
                        error = %e,
                        "skipping event"
                    );
                    outcome.errors.push(msg);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    async fn apply_created(
        &self,
        fields: &CreatedFields,
        log: &LogEntry,
    ) -> Result<Applied, IndexerError> {
        validate_created(fields)?;

        let mut record = CapsuleRecord {
            id: fields.id,
            creator: fields.creator.clone(),
            title: fields.title.clone(),
            tags: fields.tags.clone(),
            encrypted_payload: fields.encrypted_payload.clone(),
            decrypted_payload: String::new(),
            revealed: false,
            reveal_time: fields.reveal_time,
            identity_ref: fields.identity_ref.clone(),
            image_ref: fields.image_ref.clone(),
            pixelated_image_ref: fields.pixelated_image_ref.clone(),
            block_number: log.block_number,
            transaction_hash: log.transaction_hash.clone(),
            created_at: 0,
            updated_at: 0,
        };

        // Replaying a Created over an already revealed row must not undo the reveal.
        if let Some(existing) = self.store.get(fields.id).await? {
            if existing.revealed {
                record.revealed = true;
                record.decrypted_payload = existing.decrypted_payload;
                record.block_number = existing.block_number;
                record.transaction_hash = existing.transaction_hash;
            }
        }

        self.store.upsert(&record).await?;
        tracing::debug!(id = fields.id, block = log.block_number, "capsule created");
        Ok(Applied::Created { id: fields.id })
    }

    async fn apply_revealed(
        &self,
        id: u64,
        plaintext: &str,
        log: &LogEntry,
    ) -> Result<Applied, IndexerError> {
        let Some(mut record) = self.store.get(id).await? else {
            return Err(IndexerError::UnknownCapsule { id });
        };

        // The plaintext is set exactly once; a replayed reveal keeps the first one.
        if !record.revealed {
            record.decrypted_payload = plaintext.to_string();
            record.revealed = true;
        }
        record.block_number = log.block_number;
        record.transaction_hash = log.transaction_hash.clone();

        self.store.upsert(&record).await?;
        tracing::debug!(id, block = log.block_number, "capsule revealed");
        Ok(Applied::Revealed { id })
    }
}

fn validate_created(fields: &CreatedFields) -> Result<(), IndexerError> {
    if fields.creator.trim().is_empty() {
        return Err(IndexerError::Mapping {
            id: Some(fields.id),
            reason: "creator address is empty".into(),
        });
    }
    if fields.reveal_time < 0 {
        return Err(IndexerError::Mapping {
            id: Some(fields.id),
            reason: format!("negative reveal time {}", fields.reveal_time),
        });
    }
    Ok(())
}
