use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use super::error::TransportError;
use super::types::{JsonRpcRequest, JsonRpcResponse, RpcCall, RpcResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Sends one request carrying one or more calls to the daemon.
///
/// Implementations must not retry; the result vector is positionally matched
/// to `calls`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, calls: &[RpcCall]) -> Result<Vec<RpcResult>, TransportError>;
}

pub struct HttpTransport {
    endpoint: Url,
    client: reqwest::Client,
    last_latency: RwLock<Option<(Duration, Instant)>>,
}

impl HttpTransport {
    pub fn new(endpoint: Url) -> Result<Self, TransportError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: Url, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoint,
            client,
            last_latency: RwLock::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn update_latency(&self, duration: Duration) {
        *self.last_latency.write().await = Some((duration, Instant::now()));
    }

    pub async fn get_latency(&self) -> Option<Duration> {
        self.last_latency.read().await.map(|(d, _)| d)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, calls: &[RpcCall]) -> Result<Vec<RpcResult>, TransportError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let body = encode_calls(calls)?;
        let start = Instant::now();

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        // Bitcoin-style daemons answer RPC errors with a non-2xx status and a
        // JSON body, so the status is not checked here.
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let latency = start.elapsed();
        self.update_latency(latency).await;
        debug!(
            calls = calls.len(),
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64;
            "RPC: Response received"
        );

        decode_results(&bytes, calls.len())
    }
}

/// Serializes a single call as an object and several calls as an array.
pub(crate) fn encode_calls(calls: &[RpcCall]) -> Result<String, TransportError> {
    let encoded = match calls {
        [single] => serde_json::to_string(&JsonRpcRequest::from(single)),
        many => serde_json::to_string(&many.iter().map(JsonRpcRequest::from).collect::<Vec<_>>()),
    };
    encoded.map_err(TransportError::from)
}

/// Parses a response body and matches it positionally against `expected` calls.
pub(crate) fn decode_results(body: &[u8], expected: usize) -> Result<Vec<RpcResult>, TransportError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| TransportError::MalformedResponse(format!("Body is not valid JSON: {}", e)))?;

    let entries = match value {
        Value::Array(entries) => entries,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(TransportError::MalformedResponse(format!(
                "Unexpected response type: {}",
                other
            )));
        },
    };

    if entries.len() != expected {
        return Err(TransportError::MalformedResponse(format!(
            "Expected {} responses, got {}",
            expected,
            entries.len()
        )));
    }

    entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value::<JsonRpcResponse>(entry)
                .map(RpcResult::from)
                .map_err(|e| TransportError::MalformedResponse(format!("Invalid response entry: {}", e)))
        })
        .collect()
}
