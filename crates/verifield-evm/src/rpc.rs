//! JSON-RPC access to an EVM node.
//!
//! Only two methods are needed: `eth_blockNumber` for the chain head and
//! `eth_getLogs` for a single event signature over a block range. Failure
//! classification follows the error taxonomy: anything that never produced
//! a JSON-RPC answer is `ChainUnavailable`, an answer that is an error
//! object or cannot be parsed is `ChainQuery`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use verifield_core::error::IndexerError;

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
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

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the error object mapped to `ChainQuery`.
    pub fn into_result(self) -> Result<Value, IndexerError> {
        if let Some(err) = self.error {
            return Err(IndexerError::ChainQuery(err.to_string()));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number).ok_or_else(|| {
            IndexerError::ChainQuery(format!("bad blockNumber {:?}", self.block_number))
        })
    }

    pub fn log_index_u32(&self) -> Result<u32, IndexerError> {
        parse_hex_u64(&self.log_index)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| IndexerError::ChainQuery(format!("bad logIndex {:?}", self.log_index)))
    }

    /// Returns `true` if the node flagged this log as reorged out.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// `topics[0]`, lowercased.
    pub fn topic0(&self) -> Option<String> {
        self.topics.first().map(|t| t.to_ascii_lowercase())
    }
}

/// One `eth_getLogs` query: a single contract and event signature over
/// the inclusive range `[from_block, to_block]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topic0: String,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn to_params(&self) -> Value {
        json!({
            "address": self.address,
            "topics": [[self.topic0]],
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
        })
    }
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

// ─── Client trait ────────────────────────────────────────────────────────────

/// Minimal EVM node interface used by the chain reader.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, IndexerError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError>;
}

#[async_trait]
impl<T: EvmRpcClient + ?Sized> EvmRpcClient for Arc<T> {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        (**self).block_number().await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        (**self).get_logs(filter).await
    }
}

// ─── HTTP client ─────────────────────────────────────────────────────────────

/// HTTP JSON-RPC client backed by `reqwest`.
///
/// Sends each call once. Retrying is the chain reader's job.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IndexerError::ChainUnavailable(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(http_error(method, status, &body));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| IndexerError::ChainUnavailable(format!("{method}: {e}")))?;
        serde_json::from_slice::<JsonRpcResponse>(&body)
            .map_err(|e| IndexerError::ChainQuery(format!("{method}: malformed response: {e}")))?
            .into_result()
    }
}

/// Classify a non-2xx reply. A JSON-RPC error object in the body is a query
/// error whatever the status; otherwise only 5xx and 429 are unavailability.
fn http_error(method: &str, status: u16, body: &str) -> IndexerError {
    if let Ok(JsonRpcResponse { error: Some(e), .. }) = serde_json::from_str(body) {
        return IndexerError::ChainQuery(format!(
            "{method}: HTTP {status}: rpc error {}: {}",
            e.code, e.message
        ));
    }
    if status >= 500 || status == 429 {
        IndexerError::ChainUnavailable(format!("{method}: HTTP {status}: {body}"))
    } else {
        IndexerError::ChainQuery(format!("{method}: HTTP {status}: {body}"))
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        v.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::ChainQuery(format!("eth_blockNumber: unexpected result {v}")))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let v = self.call("eth_getLogs", vec![filter.to_params()]).await?;
        serde_json::from_value(v)
            .map_err(|e| IndexerError::ChainQuery(format!("eth_getLogs: malformed logs: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0x"), None);
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn filter_params_use_hex_quantities() {
        let filter = LogFilter {
            address: "0xabc".into(),
            topic0: "0xdead".into(),
            from_block: 1,
            to_block: 2000,
        };
        let p = filter.to_params();
        assert_eq!(p["fromBlock"], "0x1");
        assert_eq!(p["toBlock"], "0x7d0");
        assert_eq!(p["topics"][0][0], "0xdead");
    }

    #[test]
    fn raw_log_deserializes_node_json() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0xabc",
            "topics": ["0xAA"],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "blockHash": "0x0",
            "transactionHash": "0x1",
            "logIndex": "0x5",
            "removed": false
        }))
        .unwrap();
        assert_eq!(log.block_number_u64().unwrap(), 5_000_000_000);
        assert_eq!(log.log_index_u32().unwrap(), 5);
        assert_eq!(log.topic0().as_deref(), Some("0xaa"));
        assert!(!log.is_removed());
    }

    #[test]
    fn error_object_is_a_query_error() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32005, "message": "query returned more than 10000 results"}
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, IndexerError::ChainQuery(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn http_status_classification() {
        let busy = http_error("eth_getLogs", 503, "upstream down");
        assert!(matches!(busy, IndexerError::ChainUnavailable(_)));
        assert!(busy.is_retryable());

        let limited = http_error("eth_getLogs", 429, "");
        assert!(matches!(limited, IndexerError::ChainUnavailable(_)));

        let bad = http_error("eth_getLogs", 400, "bad request");
        assert!(matches!(bad, IndexerError::ChainQuery(_)));
        assert!(!bad.is_retryable());
    }

    #[test]
    fn rpc_error_body_on_http_error_is_a_query_error() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32005, "message": "query returned more than 10000 results"}
        })
        .to_string();
        for status in [400, 500, 503] {
            let err = http_error("eth_getLogs", status, &body);
            assert!(matches!(err, IndexerError::ChainQuery(_)), "status {status}");
            assert!(!err.is_retryable());
        }
    }
}
