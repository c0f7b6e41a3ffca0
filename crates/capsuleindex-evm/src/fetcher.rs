//! EVM log source for the capsule contract.
//!
//! Uses JSON-RPC `eth_blockNumber`, `eth_getLogs` (one request per event kind,
//! issued concurrently) and `eth_call` for the authoritative capsule count.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use capsuleindex_core::error::IndexerError;
use capsuleindex_core::source::{CountSource, LogSource};
use capsuleindex_core::types::{EventKind, LogEntry};

use crate::abi;
use crate::rpc::{EvmRpcClient, RpcError};

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "transactionIndex")]
    pub tx_index: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Convert into a [`LogEntry`], decoding the payload as `kind`.
    ///
    /// Bad positional fields are an upstream error; a bad payload is not.
    pub fn into_entry(self, kind: EventKind) -> Result<LogEntry, RpcError> {
        let block_number = parse_hex_u64(&self.block_number)?;
        let transaction_index = parse_hex_u32(&self.tx_index)?;
        let log_index = parse_hex_u32(&self.log_index)?;

        let raw = self.data.strip_prefix("0x").unwrap_or(&self.data);
        let fields = match hex::decode(raw) {
            Ok(data) => abi::decode_log(kind, &self.topics, &data),
            Err(e) => capsuleindex_core::types::EventFields::Malformed {
                id: None,
                reason: format!("invalid data hex: {e}"),
            },
        };

        Ok(LogEntry {
            kind,
            fields,
            block_number,
            transaction_index,
            log_index,
            transaction_hash: self.tx_hash,
        })
    }
}

/// Parse a hex-encoded quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, RpcError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| RpcError::Malformed(format!("bad quantity {s:?}: {e}")))
}

fn parse_hex_u32(s: &str) -> Result<u32, RpcError> {
    let n = parse_hex_u64(s)?;
    u32::try_from(n).map_err(|_| RpcError::Malformed(format!("quantity {s:?} exceeds u32")))
}

fn hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// [`LogSource`] and [`CountSource`] backed by a JSON-RPC node.
pub struct EvmLogSource<C> {
    client: C,
    contract: String,
}

impl<C: EvmRpcClient> EvmLogSource<C> {
    pub fn new(client: C, contract: impl Into<String>) -> Self {
        Self {
            client,
            contract: contract.into(),
        }
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    async fn logs_for(&self, kind: EventKind, from: u64, to: u64) -> Result<Vec<LogEntry>, RpcError> {
        let topic = abi::topic0(kind);
        let filter = json!({
            "address": self.contract,
            "fromBlock": hex_quantity(from),
            "toBlock": hex_quantity(to),
            "topics": [[topic]],
        });
        let result = self.client.request("eth_getLogs", vec![filter]).await?;
        let raw: Vec<RawLog> =
            serde_json::from_value(result).map_err(|e| RpcError::Malformed(e.to_string()))?;

        let mut entries = Vec::with_capacity(raw.len());
        for log in raw {
            if log.is_removed() {
                tracing::debug!(tx = %log.tx_hash, "dropping removed log");
                continue;
            }
            // Some nodes ignore the topic filter; only keep what was asked for.
            if log.topics.first().and_then(|t| abi::kind_for_topic(t)) != Some(kind) {
                continue;
            }
            entries.push(log.into_entry(kind)?);
        }
        tracing::debug!(%kind, from, to, count = entries.len(), "fetched logs");
        Ok(entries)
    }
}

#[async_trait]
impl<C: EvmRpcClient> LogSource for EvmLogSource<C> {
    async fn head_block(&self) -> Result<u64, IndexerError> {
        let result = self.client.request("eth_blockNumber", vec![]).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::Malformed(format!("eth_blockNumber returned {result}")))?;
        Ok(parse_hex_u64(hex)?)
    }

    async fn fetch_logs(
        &self,
        kinds: &[EventKind],
        from: u64,
        to: u64,
    ) -> Result<Vec<LogEntry>, IndexerError> {
        let batches = try_join_all(kinds.iter().map(|k| self.logs_for(*k, from, to))).await?;
        Ok(batches.into_iter().flatten().collect())
    }
}

#[async_trait]
impl<C: EvmRpcClient> CountSource for EvmLogSource<C> {
    async fn authoritative_count(&self) -> Result<u64, IndexerError> {
        let call = json!({
            "to": self.contract,
            "data": abi::capsule_count_calldata(),
        });
        let result: Value = self
            .client
            .request("eth_call", vec![call, json!("latest")])
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| RpcError::Malformed(format!("eth_call returned {result}")))?;
        let bytes = hex::decode(hex_str.strip_prefix("0x").unwrap_or(hex_str))
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        abi::decode_count(&bytes).map_err(|e| IndexerError::Upstream(format!("capsuleCount(): {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::fixtures::*;
    use alloy_core::dyn_abi::DynSolValue;
    use alloy_primitives::U256;
    use capsuleindex_core::types::EventFields;
    use std::sync::Mutex;

    const CONTRACT: &str = "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0";

    /// Answers calls from canned per-method responses and records requests.
    #[derive(Default)]
    struct MockClient {
        logs: Vec<Value>,
        head: Option<Value>,
        call_result: Option<Value>,
        fail: Option<String>,
        requests: Mutex<Vec<(String, Vec<Value>)>>,
    }

    #[async_trait]
    impl EvmRpcClient for MockClient {
        async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
            self.requests.lock().unwrap().push((method.to_string(), params.clone()));
            if let Some(msg) = &self.fail {
                return Err(RpcError::Http(msg.clone()));
            }
            match method {
                "eth_blockNumber" => Ok(self.head.clone().unwrap_or(json!("0x0"))),
                "eth_call" => Ok(self.call_result.clone().unwrap_or(json!("0x"))),
                "eth_getLogs" => {
                    let wanted = params[0]["topics"][0][0].as_str().unwrap().to_string();
                    Ok(Value::Array(
                        self.logs
                            .iter()
                            .filter(|l| l["topics"][0] == wanted.as_str())
                            .cloned()
                            .collect(),
                    ))
                }
                other => Err(RpcError::Rpc { code: -32601, message: format!("{other} not found") }),
            }
        }
    }

    fn raw(topics: Vec<String>, data: &[u8], block: u64, tx: u32, log: u32) -> Value {
        json!({
            "address": CONTRACT,
            "topics": topics,
            "data": format!("0x{}", hex::encode(data)),
            "blockNumber": format!("0x{block:x}"),
            "blockHash": "0x00",
            "transactionHash": format!("0x{block:x}{tx:02x}"),
            "transactionIndex": format!("0x{tx:x}"),
            "logIndex": format!("0x{log:x}"),
            "removed": false,
        })
    }

    fn created_log(id: u64, block: u64, tx: u32) -> Value {
        raw(
            vec![abi::topic0(EventKind::Created), uint_topic(id), address_topic(CREATOR)],
            &created_data(&format!("Capsule {id}"), &[1, 2, 3], 1_900_000_000),
            block,
            tx,
            tx,
        )
    }

    fn revealed_log(id: u64, text: &str, block: u64, tx: u32) -> Value {
        raw(
            vec![abi::topic0(EventKind::Revealed), uint_topic(id)],
            &revealed_data(text),
            block,
            tx,
            tx,
        )
    }

    #[tokio::test]
    async fn head_block_parses_quantity() {
        let source = EvmLogSource::new(
            MockClient { head: Some(json!("0x243d580")), ..Default::default() },
            CONTRACT,
        );
        assert_eq!(source.head_block().await.unwrap(), 38_000_000);
    }

    #[tokio::test]
    async fn fetches_each_kind_with_topic_and_address_filter() {
        let client = MockClient {
            logs: vec![created_log(1, 100, 0), revealed_log(1, "hi", 120, 2)],
            ..Default::default()
        };
        let source = EvmLogSource::new(client, CONTRACT);

        let logs = source.fetch_logs(&EventKind::ALL, 100, 199).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(matches!(logs[0].fields, EventFields::Created(ref f) if f.id == 1 && f.title == "Capsule 1"));
        assert_eq!(
            logs[1].fields,
            EventFields::Revealed { id: 1, plaintext_payload: "hi".into() }
        );
        assert_eq!((logs[1].block_number, logs[1].transaction_index), (120, 2));

        let requests = source.client.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let filter = &requests[0].1[0];
        assert_eq!(filter["address"], CONTRACT);
        assert_eq!(filter["fromBlock"], "0x64");
        assert_eq!(filter["toBlock"], "0xc7");
    }

    #[tokio::test]
    async fn removed_logs_are_dropped() {
        let mut gone = created_log(2, 101, 0);
        gone["removed"] = json!(true);
        let client = MockClient { logs: vec![gone, created_log(3, 102, 0)], ..Default::default() };
        let source = EvmLogSource::new(client, CONTRACT);

        let logs = source.fetch_logs(&[EventKind::Created], 100, 110).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].fields.capsule_id(), Some(3));
    }

    #[tokio::test]
    async fn undecodable_payload_is_malformed_not_upstream() {
        let bad = raw(
            vec![abi::topic0(EventKind::Revealed), uint_topic(5)],
            &[0xde, 0xad],
            150,
            0,
            0,
        );
        let source = EvmLogSource::new(MockClient { logs: vec![bad], ..Default::default() }, CONTRACT);

        let logs = source.fetch_logs(&[EventKind::Revealed], 100, 199).await.unwrap();
        assert!(matches!(logs[0].fields, EventFields::Malformed { id: Some(5), .. }));
    }

    #[tokio::test]
    async fn transport_failure_is_upstream() {
        let source = EvmLogSource::new(
            MockClient { fail: Some("connection refused".into()), ..Default::default() },
            CONTRACT,
        );
        let err = source.fetch_logs(&EventKind::ALL, 0, 10).await.unwrap_err();
        assert!(matches!(err, IndexerError::Upstream(ref m) if m.contains("connection refused")));
        assert!(source.head_block().await.is_err());
    }

    #[tokio::test]
    async fn bad_block_number_is_upstream() {
        let mut log = created_log(1, 100, 0);
        log["blockNumber"] = json!("0xzz");
        let source = EvmLogSource::new(MockClient { logs: vec![log], ..Default::default() }, CONTRACT);
        let err = source.fetch_logs(&[EventKind::Created], 0, 200).await.unwrap_err();
        assert!(matches!(err, IndexerError::Upstream(_)));
    }

    #[tokio::test]
    async fn authoritative_count_via_eth_call() {
        let encoded = DynSolValue::Uint(U256::from(150u64), 256).abi_encode();
        let client = MockClient {
            call_result: Some(json!(format!("0x{}", hex::encode(encoded)))),
            ..Default::default()
        };
        let source = EvmLogSource::new(client, CONTRACT);
        assert_eq!(source.authoritative_count().await.unwrap(), 150);

        let requests = source.client.requests.lock().unwrap();
        assert_eq!(requests[0].0, "eth_call");
        assert_eq!(requests[0].1[0]["data"], abi::capsule_count_calldata());
        assert_eq!(requests[0].1[1], "latest");
    }

    #[test]
    fn parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert!(parse_hex_u64("0x").is_err());
        assert!(parse_hex_u32("0x1ffffffff").is_err());
    }
}
