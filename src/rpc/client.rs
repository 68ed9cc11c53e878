use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::error::TransportError;
use super::health::HealthTracker;
use super::transport::Transport;
use super::types::{RpcCall, RpcRequest, RpcResult};

/// Method used by the retry probe to re-test reachability.
pub const PROBE_METHOD: &str = "getinfo";
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

struct PendingProbe {
    generation: u64,
    token: CancellationToken,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    health: HealthTracker,
    next_id: AtomicU64,
    probe_interval: Duration,
    probe: Mutex<Option<PendingProbe>>,
    probe_generation: AtomicU64,
    shutdown: CancellationToken,
}

/// JSON-RPC client for the wallet daemon.
///
/// Calls never fail hard on an unreachable daemon. They return `None`, feed
/// the [`HealthTracker`], and leave a single retry probe scheduled that keeps
/// re-testing the endpoint until it answers or a newer call supersedes it.
///
/// Cloning is cheap; all clones share the same health, id sequence and probe.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, health: HealthTracker) -> Self {
        Self::with_probe_interval(transport, health, DEFAULT_PROBE_INTERVAL, CancellationToken::new())
    }

    /// Creates a client whose retry probes stop when `shutdown` is cancelled.
    pub fn with_probe_interval(
        transport: Arc<dyn Transport>,
        health: HealthTracker,
        probe_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                health,
                next_id: AtomicU64::new(rand::random::<u32>() as u64),
                probe_interval,
                probe: Mutex::new(None),
                probe_generation: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    pub fn health(&self) -> &HealthTracker {
        &self.inner.health
    }

    /// Issues one call. `None` means the daemon gave no usable response.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Option<RpcResult> {
        let mut results = self.call_batch(vec![RpcRequest::new(method, params)]).await?;
        results.pop()
    }

    /// Issues several calls in one request; results keep the request order.
    pub async fn call_batch(&self, requests: Vec<RpcRequest>) -> Option<Vec<RpcResult>> {
        self.cancel_probe();

        let calls: Vec<RpcCall> = requests
            .into_iter()
            .map(|request| RpcCall::new(request, self.next_id()))
            .collect();
        let methods: Vec<&str> = calls.iter().map(|c| c.method.as_str()).collect();
        debug!(methods:? = methods; "RPC: Sending");

        let outcome = self.inner.transport.send(&calls).await;
        self.settle(outcome)
    }

    pub fn has_pending_probe(&self) -> bool {
        self.inner
            .probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| !p.token.is_cancelled())
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn settle(&self, outcome: Result<Vec<RpcResult>, TransportError>) -> Option<Vec<RpcResult>> {
        match outcome {
            Ok(results) => {
                self.inner.health.record_reachable();
                Some(results)
            },
            Err(TransportError::Unreachable(reason)) => {
                debug!(reason = &*reason; "RPC: No response from daemon");
                self.inner.health.record_unreachable();
                self.schedule_probe();
                None
            },
            Err(e) => {
                warn!(error:% = e; "RPC: Request produced no usable results");
                None
            },
        }
    }

    fn cancel_probe(&self) {
        let pending = self.inner.probe.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(probe) = pending {
            debug!(generation = probe.generation; "RPC: Superseding retry probe");
            probe.token.cancel();
        }
    }

    fn schedule_probe(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let (generation, token) = {
            let mut slot = self.inner.probe.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|p| !p.token.is_cancelled()) {
                return;
            }
            let generation = self.inner.probe_generation.fetch_add(1, Ordering::Relaxed) + 1;
            let token = self.inner.shutdown.child_token();
            *slot = Some(PendingProbe {
                generation,
                token: token.clone(),
            });
            (generation, token)
        };

        let client = self.clone();
        tokio::spawn(client.run_probe(generation, token));
    }

    async fn run_probe(self, generation: u64, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(self.inner.probe_interval) => {}
            }

            let call = RpcCall::new(RpcRequest::without_params(PROBE_METHOD), self.next_id());
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = self.inner.transport.send(std::slice::from_ref(&call)) => outcome,
            };

            match outcome {
                Ok(_) => {
                    debug!(generation = generation; "RPC: Retry probe reached daemon");
                    self.inner.health.record_reachable();
                    break;
                },
                Err(e) if e.is_unreachable() => {
                    self.inner.health.record_unreachable();
                },
                Err(e) => {
                    debug!(error:% = e; "RPC: Retry probe got an unusable response");
                },
            }
        }

        let mut slot = self.inner.probe.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|p| p.generation == generation) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::rpc::health::{ConnectionHealth, HealthEvent};
    use crate::rpc::testing::FakeTransport;

    fn client(transport: Arc<FakeTransport>) -> RpcClient {
        RpcClient::with_probe_interval(
            transport,
            HealthTracker::new(),
            Duration::from_secs(5),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn successful_call_marks_reachable() {
        let transport = FakeTransport::new();
        transport.respond("getinfo", Ok(json!({"blocks": 1})));
        let client = client(transport.clone());

        let result = client.call("getinfo", vec![]).await;

        assert_eq!(result, Some(Ok(json!({"blocks": 1}))));
        assert_eq!(client.health().current(), ConnectionHealth::Reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn ids_are_unique_within_a_batch() {
        let transport = FakeTransport::new();
        transport.respond("a", Ok(json!(1)));
        transport.respond("b", Ok(json!(2)));
        let client = client(transport.clone());

        let results = client
            .call_batch(vec![RpcRequest::without_params("a"), RpcRequest::without_params("b")])
            .await
            .unwrap();

        assert_eq!(results, vec![Ok(json!(1)), Ok(json!(2))]);
        let sent = transport.sent();
        assert_ne!(sent[0].id, sent[1].id);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_returns_none_and_schedules_probe() {
        let transport = FakeTransport::new();
        transport.set_reachable(false);
        let client = client(transport.clone());

        assert_eq!(client.call("listsinceblock", vec![]).await, None);
        assert_eq!(client.health().current(), ConnectionHealth::Unreachable);
        assert!(client.has_pending_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_restores_reachability() {
        let transport = FakeTransport::new();
        transport.set_reachable(false);
        transport.respond("getinfo", Ok(json!({})));
        let client = client(transport.clone());
        let mut events = client.health().subscribe();

        client.call("getpeerinfo", vec![]).await;
        assert_eq!(events.recv().await.unwrap(), HealthEvent::BecameUnreachable);

        transport.set_reachable(true);
        sleep(Duration::from_millis(5100)).await;

        assert_eq!(events.recv().await.unwrap(), HealthEvent::BecameReachable);
        assert_eq!(transport.calls("getinfo"), 1);
        assert!(!client.has_pending_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_call_supersedes_pending_probe() {
        let transport = FakeTransport::new();
        transport.set_reachable(false);
        let client = client(transport.clone());

        client.call("getinfo", vec![]).await;
        sleep(Duration::from_secs(3)).await;
        client.call("getinfo", vec![]).await;
        let direct_calls = transport.calls("getinfo");

        // The first probe would have fired at 5s; only the replacement fires, at 8s.
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.calls("getinfo"), direct_calls);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.calls("getinfo"), direct_calls + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_leaves_health_alone() {
        let transport = FakeTransport::new();
        transport.respond("getinfo", Ok(json!({})));
        let client = client(transport.clone());
        client.call("getinfo", vec![]).await;

        transport.set_malformed(true);
        assert_eq!(client.call("getinfo", vec![]).await, None);
        assert_eq!(client.health().current(), ConnectionHealth::Reachable);
        assert!(!client.has_pending_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_probe() {
        let transport = FakeTransport::new();
        transport.set_reachable(false);
        let shutdown = CancellationToken::new();
        let client = RpcClient::with_probe_interval(
            transport.clone(),
            HealthTracker::new(),
            Duration::from_secs(5),
            shutdown.clone(),
        );

        client.call("listsinceblock", vec![]).await;
        shutdown.cancel();
        sleep(Duration::from_secs(30)).await;

        assert_eq!(transport.calls("getinfo"), 0);
    }
}
