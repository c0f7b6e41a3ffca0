//! Capsule contract ABI: event topics and payload decoding.
//!
//! ```text
//! CapsuleCreated(uint256 indexed id, address indexed creator, string title,
//!                string tags, bytes encryptedStory, uint256 revealTime,
//!                string shutterIdentity, string imageCID, string pixelatedImageCID)
//! CapsuleRevealed(uint256 indexed id, string plaintextStory)
//! ```
//!
//! Decoding never fails outright. A log that matches a capsule topic but does
//! not decode becomes [`EventFields::Malformed`], which the mapper records as
//! a per-event error.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use tiny_keccak::{Hasher, Keccak};

use capsuleindex_core::types::{CreatedFields, EventFields, EventKind};

pub const CREATED_SIGNATURE: &str =
    "CapsuleCreated(uint256,address,string,string,bytes,uint256,string,string,string)";
pub const REVEALED_SIGNATURE: &str = "CapsuleRevealed(uint256,string)";
pub const CAPSULE_COUNT_SIGNATURE: &str = "capsuleCount()";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Canonical signature of an event kind.
pub fn signature(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Created => CREATED_SIGNATURE,
        EventKind::Revealed => REVEALED_SIGNATURE,
    }
}

/// `topics[0]` for an event kind, as a `0x`-prefixed lowercase hex string.
pub fn topic0(kind: EventKind) -> String {
    format!("0x{}", hex::encode(keccak256(signature(kind).as_bytes())))
}

/// Event kind whose `topics[0]` is `topic`, if any.
pub fn kind_for_topic(topic: &str) -> Option<EventKind> {
    EventKind::ALL
        .into_iter()
        .find(|k| topic0(*k).eq_ignore_ascii_case(topic))
}

/// 4-byte selector of `capsuleCount()`, hex-encoded as calldata.
pub fn capsule_count_calldata() -> String {
    let hash = keccak256(CAPSULE_COUNT_SIGNATURE.as_bytes());
    format!("0x{}", hex::encode(&hash[..4]))
}

/// Decode the `uint256` returned by `capsuleCount()`.
pub fn decode_count(result: &[u8]) -> Result<u64, String> {
    match DynSolType::Uint(256).abi_decode(result) {
        Ok(DynSolValue::Uint(n, _)) => uint_to_u64(n),
        Ok(other) => Err(format!("unexpected value {other:?}")),
        Err(e) => Err(e.to_string()),
    }
}

/// Decode a capsule log into event fields.
pub fn decode_log(kind: EventKind, topics: &[String], data: &[u8]) -> EventFields {
    let result = match kind {
        EventKind::Created => decode_created(topics, data).map(EventFields::Created),
        EventKind::Revealed => decode_revealed(topics, data),
    };
    result.unwrap_or_else(|reason| EventFields::Malformed {
        id: topics.get(1).and_then(|t| decode_uint_topic(t).ok()),
        reason,
    })
}

fn decode_created(topics: &[String], data: &[u8]) -> Result<CreatedFields, String> {
    let [_, id_topic, creator_topic, ..] = topics else {
        return Err(format!("expected 3 topics, got {}", topics.len()));
    };
    let id = decode_uint_topic(id_topic)?;
    let creator = decode_address_topic(creator_topic)?;

    let values = decode_data(
        data,
        vec![
            DynSolType::String,
            DynSolType::String,
            DynSolType::Bytes,
            DynSolType::Uint(256),
            DynSolType::String,
            DynSolType::String,
            DynSolType::String,
        ],
    )?;
    let mut it = values.into_iter();
    let mut next = || it.next().ok_or_else(|| "missing data field".to_string());

    let title = as_string(next()?)?;
    let tags = as_string(next()?)?;
    let encrypted_payload = match next()? {
        DynSolValue::Bytes(b) => b,
        other => return Err(format!("expected bytes, got {other:?}")),
    };
    let reveal_time = match next()? {
        DynSolValue::Uint(n, _) => {
            i64::try_from(uint_to_u64(n)?).map_err(|_| "reveal time exceeds i64".to_string())?
        }
        other => return Err(format!("expected uint256, got {other:?}")),
    };

    Ok(CreatedFields {
        id,
        creator,
        title,
        tags,
        encrypted_payload,
        reveal_time,
        identity_ref: as_string(next()?)?,
        image_ref: as_string(next()?)?,
        pixelated_image_ref: as_string(next()?)?,
    })
}

fn decode_revealed(topics: &[String], data: &[u8]) -> Result<EventFields, String> {
    let [_, id_topic, ..] = topics else {
        return Err(format!("expected 2 topics, got {}", topics.len()));
    };
    let id = decode_uint_topic(id_topic)?;
    let plaintext_payload = decode_data(data, vec![DynSolType::String])?
        .into_iter()
        .next()
        .ok_or_else(|| "missing plaintext".to_string())
        .and_then(as_string)?;
    Ok(EventFields::Revealed {
        id,
        plaintext_payload,
    })
}

/// Decode non-indexed event data as a parameter sequence.
fn decode_data(data: &[u8], types: Vec<DynSolType>) -> Result<Vec<DynSolValue>, String> {
    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(data)
        .map_err(|e| format!("abi decode failed: {e}"))?;
    match decoded {
        DynSolValue::Tuple(vals) => Ok(vals),
        other => Ok(vec![other]),
    }
}

fn topic_bytes(topic: &str) -> Result<Vec<u8>, String> {
    let raw = topic.strip_prefix("0x").unwrap_or(topic);
    let bytes = hex::decode(raw).map_err(|e| format!("invalid topic hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("topic is {} bytes, expected 32", bytes.len()));
    }
    Ok(bytes)
}

fn decode_uint_topic(topic: &str) -> Result<u64, String> {
    match DynSolType::Uint(256).abi_decode(&topic_bytes(topic)?) {
        Ok(DynSolValue::Uint(n, _)) => uint_to_u64(n),
        Ok(other) => Err(format!("expected uint256 topic, got {other:?}")),
        Err(e) => Err(format!("topic decode: {e}")),
    }
}

fn decode_address_topic(topic: &str) -> Result<String, String> {
    match DynSolType::Address.abi_decode(&topic_bytes(topic)?) {
        Ok(DynSolValue::Address(a)) => Ok(a.to_checksum(None)),
        Ok(other) => Err(format!("expected address topic, got {other:?}")),
        Err(e) => Err(format!("topic decode: {e}")),
    }
}

fn uint_to_u64(n: U256) -> Result<u64, String> {
    u64::try_from(n).map_err(|_| format!("value {n} does not fit in u64"))
}

fn as_string(v: DynSolValue) -> Result<String, String> {
    match v {
        DynSolValue::String(s) => Ok(s),
        other => Err(format!("expected string, got {other:?}")),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn erc20_transfer_topic_matches_known_hash() {
        let hash = keccak256(b"Transfer(address,address,uint256)");
        assert_eq!(
            hex::encode(hash),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn topics_are_distinct_and_resolvable() {
        let created = topic0(EventKind::Created);
        let revealed = topic0(EventKind::Revealed);
        assert_ne!(created, revealed);
        assert_eq!(created.len(), 66);
        assert_eq!(kind_for_topic(&created.to_uppercase().replace("0X", "0x")), Some(EventKind::Created));
        assert_eq!(kind_for_topic(&revealed), Some(EventKind::Revealed));
        assert_eq!(kind_for_topic("0x00"), None);
    }

    #[test]
    fn capsule_count_selector() {
        let data = capsule_count_calldata();
        assert_eq!(data.len(), 10);
        assert!(data.starts_with("0x"));
        let encoded = DynSolValue::Uint(U256::from(150u64), 256).abi_encode();
        assert_eq!(decode_count(&encoded).unwrap(), 150);
    }

    #[test]
    fn decodes_created() {
        let topics = vec![topic0(EventKind::Created), uint_topic(42), address_topic(CREATOR)];
        let data = created_data("Letter to 2030", &[0xca, 0xfe], 1_900_000_000);

        let EventFields::Created(f) = decode_log(EventKind::Created, &topics, &data) else {
            panic!("expected created fields");
        };
        assert_eq!(f.id, 42);
        assert_eq!(f.creator, creator_address().to_checksum(None));
        assert_eq!(f.title, "Letter to 2030");
        assert_eq!(f.tags, "family, summer");
        assert_eq!(f.encrypted_payload, vec![0xca, 0xfe]);
        assert_eq!(f.reveal_time, 1_900_000_000);
        assert_eq!(f.identity_ref, "0xshutter");
        assert_eq!(f.image_ref, "bafyimage");
        assert_eq!(f.pixelated_image_ref, "bafypixel");
    }

    #[test]
    fn decodes_revealed() {
        let topics = vec![topic0(EventKind::Revealed), uint_topic(7)];
        let fields = decode_log(EventKind::Revealed, &topics, &revealed_data("hello future"));
        assert_eq!(
            fields,
            EventFields::Revealed { id: 7, plaintext_payload: "hello future".into() }
        );
    }

    #[test]
    fn truncated_data_is_malformed_with_id() {
        let topics = vec![topic0(EventKind::Created), uint_topic(9), address_topic(CREATOR)];
        let mut data = created_data("t", &[1], 1);
        data.truncate(40);
        match decode_log(EventKind::Created, &topics, &data) {
            EventFields::Malformed { id, reason } => {
                assert_eq!(id, Some(9));
                assert!(reason.contains("abi decode failed"));
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn missing_topics_are_malformed() {
        let topics = vec![topic0(EventKind::Revealed)];
        let fields = decode_log(EventKind::Revealed, &topics, &revealed_data("x"));
        assert!(matches!(fields, EventFields::Malformed { id: None, .. }));
    }

    #[test]
    fn oversized_id_is_malformed() {
        let topics = vec![topic0(EventKind::Revealed), format!("0x{}", "f".repeat(64))];
        let fields = decode_log(EventKind::Revealed, &topics, &revealed_data("x"));
        assert!(matches!(fields, EventFields::Malformed { .. }));
    }
}
