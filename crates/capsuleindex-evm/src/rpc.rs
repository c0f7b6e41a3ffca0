//! JSON-RPC 2.0 wire types and the HTTP transport.
//!
//! The client makes exactly one attempt per request. Retries happen one level
//! up, when the sync controller's next pass re-reads the same range.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use capsuleindex_core::error::IndexerError;

/// JSON-RPC request ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the node's error object as an [`RpcError`].
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Transport-level failure talking to the node.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<RpcError> for IndexerError {
    fn from(e: RpcError) -> Self {
        IndexerError::Upstream(e.to_string())
    }
}

/// Anything that can answer a JSON-RPC call.
///
/// [`HttpRpcClient`] is the production implementation; tests script one.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;
}

/// JSON-RPC client over HTTP with a per-request timeout.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Http(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout(self.timeout)
                } else {
                    RpcError::Http(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Http(format!("HTTP {status}: {body}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        tracing::trace!(method, url = %self.url, "rpc response");
        body.into_result()
    }
}
