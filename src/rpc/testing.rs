//! In-memory daemon used by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::error::{RpcError, TransportError};
use super::transport::Transport;
use super::types::{RpcCall, RpcResult};

#[derive(Default)]
pub struct FakeTransport {
    unreachable: AtomicBool,
    malformed: AtomicBool,
    queued: Mutex<HashMap<String, VecDeque<RpcResult>>>,
    sticky: Mutex<HashMap<String, RpcResult>>,
    sent: Mutex<Vec<RpcCall>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    /// Answers every call to `method` with `result` until replaced.
    pub fn respond(&self, method: &str, result: RpcResult) {
        self.sticky.lock().unwrap().insert(method.to_string(), result);
    }

    /// Answers the next call to `method` with `result`, ahead of any sticky answer.
    pub fn respond_once(&self, method: &str, result: RpcResult) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|c| c.method == method).count()
    }

    pub fn sent(&self) -> Vec<RpcCall> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_params(&self, method: &str) -> Option<Vec<Value>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.method == method)
            .map(|c| c.params.clone())
    }

    fn answer(&self, call: &RpcCall) -> RpcResult {
        if let Some(result) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&call.method)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        self.sticky
            .lock()
            .unwrap()
            .get(&call.method)
            .cloned()
            .unwrap_or_else(|| Err(RpcError::new(-32601, "Method not found")))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, calls: &[RpcCall]) -> Result<Vec<RpcResult>, TransportError> {
        self.sent.lock().unwrap().extend(calls.iter().cloned());

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("connection refused".into()));
        }
        if self.malformed.load(Ordering::SeqCst) {
            return Err(TransportError::MalformedResponse("not json".into()));
        }
        Ok(calls.iter().map(|call| self.answer(call)).collect())
    }
}
