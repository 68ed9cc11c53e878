use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outcome of one call: the daemon's `result` or its structured `error`.
pub type RpcResult = Result<Value, RpcError>;

/// A method invocation before an id has been assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn without_params(method: impl Into<String>) -> Self {
        Self::new(method, Vec::new())
    }
}

/// An issued call. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl RpcCall {
    pub fn new(request: RpcRequest, id: u64) -> Self {
        Self {
            method: request.method,
            params: request.params,
            id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> From<&'a RpcCall> for JsonRpcRequest<'a> {
    fn from(call: &'a RpcCall) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: call.id,
            method: &call.method,
            params: &call.params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl From<JsonRpcResponse> for RpcResult {
    fn from(response: JsonRpcResponse) -> Self {
        match response.error {
            Some(error) => Err(RpcError::new(error.code, error.message)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }
}
