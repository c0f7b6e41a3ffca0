//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};

// ─── CapsuleRecord ────────────────────────────────────────────────────────────

/// A materialized time capsule, as mirrored from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleRecord {
    /// Ledger-assigned sequence number. Never reassigned.
    pub id: u64,
    /// Creator address (`0x…`).
    pub creator: String,
    pub title: String,
    /// Comma-separated tag list, as submitted.
    pub tags: String,
    /// Opaque timelock-encrypted payload.
    #[serde(with = "hex_bytes")]
    pub encrypted_payload: Vec<u8>,
    /// Plaintext payload; empty until the capsule is revealed.
    pub decrypted_payload: String,
    pub revealed: bool,
    /// Unix timestamp after which the capsule may be revealed.
    pub reveal_time: i64,
    /// Handle of the decryption identity registered for this capsule.
    pub identity_ref: String,
    /// Content address of the encrypted image.
    pub image_ref: String,
    /// Content address of the public pixelated preview.
    pub pixelated_image_ref: String,
    /// Block of the last event that touched this record.
    pub block_number: u64,
    /// Transaction of the last event that touched this record.
    pub transaction_hash: String,
    /// Local insert time (unix seconds). Maintained by the store.
    pub created_at: i64,
    /// Local last-write time (unix seconds). Maintained by the store.
    pub updated_at: i64,
}

impl CapsuleRecord {
    /// Returns `true` if `tag` is one of this record's comma-separated tags.
    ///
    /// Comparison trims whitespace and ignores ASCII case.
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim();
        !tag.is_empty()
            && self
                .tags
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(tag))
    }

    /// Returns `true` if `query` is a substring of the title, tags or creator.
    ///
    /// Only ASCII letters are case-folded, matching SQLite's `LIKE`.
    pub fn matches_search(&self, query: &str) -> bool {
        let q = query.to_ascii_lowercase();
        [&self.title, &self.tags, &self.creator]
            .iter()
            .any(|field| field.to_ascii_lowercase().contains(&q))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// The two capsule event kinds the indexer follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Revealed,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Created, EventKind::Revealed];

    /// Contract event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Created => "CapsuleCreated",
            Self::Revealed => "CapsuleRevealed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Decoded fields of a `CapsuleCreated` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedFields {
    pub id: u64,
    pub creator: String,
    pub title: String,
    pub tags: String,
    pub encrypted_payload: Vec<u8>,
    pub reveal_time: i64,
    pub identity_ref: String,
    pub image_ref: String,
    pub pixelated_image_ref: String,
}

/// Decoded event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFields {
    Created(CreatedFields),
    Revealed { id: u64, plaintext_payload: String },
    /// The log matched a capsule topic but its payload could not be decoded.
    Malformed { id: Option<u64>, reason: String },
}

impl EventFields {
    /// Capsule id referenced by the event, when known.
    pub fn capsule_id(&self) -> Option<u64> {
        match self {
            Self::Created(f) => Some(f.id),
            Self::Revealed { id, .. } => Some(*id),
            Self::Malformed { id, .. } => *id,
        }
    }
}

/// One log entry returned by a [`LogSource`](crate::source::LogSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: EventKind,
    pub fields: EventFields,
    pub block_number: u64,
    /// Position of the emitting transaction within its block.
    pub transaction_index: u32,
    /// Position of the log within its block.
    pub log_index: u32,
    pub transaction_hash: String,
}

impl LogEntry {
    /// Chain order key: `(block, transaction index, log index)`.
    pub fn order_key(&self) -> (u64, u32, u32) {
        (self.block_number, self.transaction_index, self.log_index)
    }
}

/// Sort log entries into chain order. Stable, so entries with equal keys
/// keep their relative order.
pub fn sort_chain_order(logs: &mut [LogEntry]) {
    logs.sort_by_key(LogEntry::order_key);
}

// ─── Queries ──────────────────────────────────────────────────────────────────

/// Paginated listing request for the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub offset: u64,
    pub limit: u64,
    /// Only return revealed capsules.
    #[serde(default)]
    pub revealed_only: bool,
    /// Only return capsules carrying this tag.
    #[serde(default)]
    pub tag: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 10,
            revealed_only: false,
            tag: None,
        }
    }
}

impl ListQuery {
    pub fn page(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    pub fn revealed_only(mut self) -> Self {
        self.revealed_only = true;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.tag = if tag.trim().is_empty() { None } else { Some(tag) };
        self
    }

    /// The tag to filter on, trimmed. A blank tag means no tag filter.
    pub fn tag_filter(&self) -> Option<&str> {
        self.tag.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Returns `true` if `record` passes this query's filters.
    pub fn matches(&self, record: &CapsuleRecord) -> bool {
        (!self.revealed_only || record.revealed)
            && self.tag_filter().map_or(true, |t| record.has_tag(t))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) fn sample_record(id: u64) -> CapsuleRecord {
    CapsuleRecord {
        id,
        creator: "0x1111111111111111111111111111111111111111".into(),
        title: format!("Capsule {id}"),
        tags: "family, Travel,2024".into(),
        encrypted_payload: vec![0xde, 0xad, 0xbe, 0xef],
        decrypted_payload: String::new(),
        revealed: false,
        reveal_time: 1_700_000_000,
        identity_ref: "0xid".into(),
        image_ref: "bafyimage".into(),
        pixelated_image_ref: "bafypixel".into(),
        block_number: 100,
        transaction_hash: "0xabc".into(),
        created_at: 0,
        updated_at: 0,
    }
}
