//! JSON-RPC transport
//!
//! Providers talk to nodes only through [`RpcTransport`], so the HTTP
//! client can be swapped for the in-memory [`MockTransport`] in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CustodyError, CustodyResult};

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Issue one call and return its `result` member.
    /// Node-side errors come back as `ErrorCode::Rpc` with the node's code and data.
    async fn request(&self, method: &str, params: Value) -> CustodyResult<Value>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// HTTP JSON-RPC client for one endpoint
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> CustodyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("custody-core/0.1")
            .build()
            .map_err(|e| CustodyError::network_error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> CustodyResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        crate::log_debug!("rpc", "Request", method = method, id = id);

        let response = self
            .client
            .post(&self.url)
            .json(&RpcRequest {
                jsonrpc: "2.0",
                method,
                params,
                id,
            })
            .send()
            .await?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| CustodyError::parse_error(format!("Invalid RPC response: {}", e)))?;

        if let Some(error) = body.error {
            crate::log_warn!("rpc", "Node returned error", method = method, code = error.code);
            return Err(CustodyError::rpc(error.code, error.message, error.data));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// In-memory transport with canned responses per method.
///
/// Each method has a queue; the last queued response is sticky so a single
/// `respond` call answers every later request for that method.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, VecDeque<CustodyResult<Value>>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &str, result: Value) -> &Self {
        self.push(method, Ok(result))
    }

    pub fn fail(&self, method: &str, error: CustodyError) -> &Self {
        self.push(method, Err(error))
    }

    fn push(&self, method: &str, result: CustodyResult<Value>) -> &Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.entry(method.to_string()).or_default().push_back(result);
        }
        self
    }

    /// All recorded `(method, params)` pairs in call order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn request(&self, method: &str, params: Value) -> CustodyResult<Value> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((method.to_string(), params));
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| CustodyError::internal("mock transport poisoned"))?;
        let queue = responses
            .get_mut(method)
            .ok_or_else(|| CustodyError::rpc(-32601, format!("Method not found: {}", method), None))?;

        match queue.len() {
            0 => Err(CustodyError::rpc(-32601, format!("Method not found: {}", method), None)),
            1 => queue
                .front()
                .cloned()
                .ok_or_else(|| CustodyError::internal("empty mock queue"))?,
            _ => queue
                .pop_front()
                .ok_or_else(|| CustodyError::internal("empty mock queue"))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_queue_then_sticky() {
        let mock = MockTransport::new();
        mock.respond("eth_blockNumber", json!("0x1"))
            .respond("eth_blockNumber", json!("0x2"));

        assert_eq!(mock.request("eth_blockNumber", json!([])).await.unwrap(), json!("0x1"));
        assert_eq!(mock.request("eth_blockNumber", json!([])).await.unwrap(), json!("0x2"));
        assert_eq!(mock.request("eth_blockNumber", json!([])).await.unwrap(), json!("0x2"));
        assert_eq!(mock.calls_to("eth_blockNumber").len(), 3);
    }

    #[tokio::test]
    async fn test_mock_unknown_method() {
        let mock = MockTransport::new();
        let err = mock.request("eth_chainId", json!([])).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Rpc { code: -32601 });
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockTransport::new();
        mock.fail("eth_sendRawTransaction", CustodyError::rpc(-32000, "nonce too low", None));
        let err = mock.request("eth_sendRawTransaction", json!(["0x"])).await.unwrap_err();
        assert_eq!(err.provider_code(), -32000);
    }
}
