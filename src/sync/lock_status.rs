use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::rpc::{HealthEvent, RpcClient, RpcError, RpcErrorCode};

const UNLOCK_METHOD: &str = "walletpassphrase";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub is_locked: bool,
    pub is_encrypted: bool,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_encrypted, self.is_locked) {
            (false, _) => write!(f, "unencrypted"),
            (true, true) => write!(f, "locked"),
            (true, false) => write!(f, "unlocked"),
        }
    }
}

/// Reads the lock state off the error `walletpassphrase` returns when called
/// without a passphrase.
pub fn lock_status_from(error: &RpcError) -> Option<LockStatus> {
    match error.kind() {
        RpcErrorCode::InvalidParams => Some(LockStatus {
            is_locked: true,
            is_encrypted: true,
        }),
        RpcErrorCode::AlreadyUnlocked => Some(LockStatus {
            is_locked: false,
            is_encrypted: true,
        }),
        RpcErrorCode::WrongEncryptionState => Some(LockStatus {
            is_locked: false,
            is_encrypted: false,
        }),
        _ => None,
    }
}

/// Probes the wallet lock state. `None` when the daemon gave no usable answer.
pub async fn check_lock_status(client: &RpcClient) -> Option<LockStatus> {
    match client.call(UNLOCK_METHOD, Vec::new()).await? {
        Err(e) => {
            let status = lock_status_from(&e);
            if status.is_none() {
                debug!(code = e.code; "Lock check returned an unrelated error");
            }
            status
        },
        Ok(_) => {
            warn!("Lock check unexpectedly succeeded without a passphrase");
            None
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    IncorrectPassphrase,
    AlreadyUnlocked,
    NotEncrypted,
}

impl fmt::Display for UnlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockOutcome::Unlocked => write!(f, "unlocked"),
            UnlockOutcome::IncorrectPassphrase => write!(f, "incorrect passphrase"),
            UnlockOutcome::AlreadyUnlocked => write!(f, "already unlocked"),
            UnlockOutcome::NotEncrypted => write!(f, "wallet is not encrypted"),
        }
    }
}

pub async fn unlock(client: &RpcClient, passphrase: &str) -> Option<UnlockOutcome> {
    match client.call(UNLOCK_METHOD, vec![json!(passphrase)]).await? {
        Ok(_) => Some(UnlockOutcome::Unlocked),
        Err(e) => match e.kind() {
            RpcErrorCode::PassphraseIncorrect => Some(UnlockOutcome::IncorrectPassphrase),
            RpcErrorCode::AlreadyUnlocked => Some(UnlockOutcome::AlreadyUnlocked),
            RpcErrorCode::WrongEncryptionState => Some(UnlockOutcome::NotEncrypted),
            _ => {
                debug!(code = e.code; "Unlock returned an unrelated error");
                None
            },
        },
    }
}

/// Keeps the published wallet lock state current.
///
/// The state is re-checked at start and each time the daemon becomes
/// reachable again, since a restarted daemon comes back locked.
pub struct LockStatusWatcher {
    client: RpcClient,
    publisher: watch::Sender<Option<LockStatus>>,
}

impl LockStatusWatcher {
    pub fn new(client: RpcClient) -> Self {
        let (publisher, _) = watch::channel(None);
        Self { client, publisher }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LockStatus>> {
        self.publisher.subscribe()
    }

    pub fn current(&self) -> Option<LockStatus> {
        *self.publisher.borrow()
    }

    /// Re-checks the lock state and publishes it if it changed.
    pub async fn refresh(&self) -> Option<LockStatus> {
        let status = check_lock_status(&self.client).await?;
        let changed = self.publisher.send_if_modified(|current| {
            if *current == Some(status) {
                return false;
            }
            *current = Some(status);
            true
        });
        if changed {
            info!(status:% = status; "Wallet lock status changed");
        }
        Some(status)
    }

    /// Tries `passphrase`, then refreshes the published state.
    pub async fn unlock(&self, passphrase: &str) -> Option<UnlockOutcome> {
        let outcome = unlock(&self.client, passphrase).await;
        if let Some(outcome) = outcome {
            info!(outcome:% = outcome; "Unlock attempted");
            self.refresh().await;
        }
        outcome
    }

    /// Refreshes, then discards health events raised while the check ran.
    /// A check that got an answer already reflects them.
    async fn refresh_and_settle(&self, events: &mut broadcast::Receiver<HealthEvent>) {
        if self.refresh().await.is_some() {
            while matches!(events.try_recv(), Ok(_) | Err(TryRecvError::Lagged(_))) {}
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut events = self.client.health().subscribe();
        self.refresh_and_settle(&mut events).await;

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(HealthEvent::BecameReachable) => {
                    debug!("Daemon reachable again, re-checking lock status");
                    self.refresh_and_settle(&mut events).await;
                },
                Ok(HealthEvent::BecameUnreachable) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped; "Health events lagged, re-checking lock status");
                    self.refresh_and_settle(&mut events).await;
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        debug!("Lock status watcher stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::rpc::HealthTracker;
    use crate::rpc::testing::FakeTransport;

    fn client(transport: Arc<FakeTransport>) -> RpcClient {
        RpcClient::new(transport, HealthTracker::new())
    }

    #[tokio::test]
    async fn invalid_params_means_locked_and_encrypted() {
        let transport = FakeTransport::new();
        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-32602, "Invalid parameters")));

        let status = check_lock_status(&client(transport.clone())).await;

        assert_eq!(
            status,
            Some(LockStatus {
                is_locked: true,
                is_encrypted: true
            })
        );
        assert_eq!(transport.last_params(UNLOCK_METHOD), Some(vec![]));
    }

    #[tokio::test]
    async fn already_unlocked_means_unlocked_and_encrypted() {
        let transport = FakeTransport::new();
        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-17, "Wallet is already unlocked")));

        let status = check_lock_status(&client(transport)).await;

        assert_eq!(
            status,
            Some(LockStatus {
                is_locked: false,
                is_encrypted: true
            })
        );
    }

    #[tokio::test]
    async fn unencrypted_wallet_and_unrelated_codes() {
        let transport = FakeTransport::new();
        let client = client(transport.clone());

        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-15, "Wallet is unencrypted")));
        assert_eq!(
            check_lock_status(&client).await,
            Some(LockStatus {
                is_locked: false,
                is_encrypted: false
            })
        );

        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-4, "Wallet error")));
        assert_eq!(check_lock_status(&client).await, None);

        transport.set_reachable(false);
        assert_eq!(check_lock_status(&client).await, None);
    }

    #[tokio::test]
    async fn unlock_outcomes_follow_error_codes() {
        let transport = FakeTransport::new();
        let client = client(transport.clone());

        transport.respond_once(UNLOCK_METHOD, Ok(serde_json::Value::Null));
        assert_eq!(unlock(&client, "hunter2").await, Some(UnlockOutcome::Unlocked));
        assert_eq!(transport.last_params(UNLOCK_METHOD), Some(vec![json!("hunter2")]));

        transport.respond_once(UNLOCK_METHOD, Err(RpcError::new(-14, "The wallet passphrase entered was incorrect.")));
        assert_eq!(unlock(&client, "wrong").await, Some(UnlockOutcome::IncorrectPassphrase));

        transport.respond_once(UNLOCK_METHOD, Err(RpcError::new(-17, "Wallet is already unlocked")));
        assert_eq!(unlock(&client, "x").await, Some(UnlockOutcome::AlreadyUnlocked));

        transport.respond_once(UNLOCK_METHOD, Err(RpcError::new(-15, "Wallet is unencrypted")));
        assert_eq!(unlock(&client, "x").await, Some(UnlockOutcome::NotEncrypted));

        transport.respond_once(UNLOCK_METHOD, Err(RpcError::new(-1, "Something else")));
        assert_eq!(unlock(&client, "x").await, None);
    }

    #[tokio::test]
    async fn watcher_refreshes_after_unlock() {
        let transport = FakeTransport::new();
        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-32602, "Invalid parameters")));
        let watcher = LockStatusWatcher::new(client(transport.clone()));

        watcher.refresh().await;
        assert_eq!(watcher.current().map(|s| s.is_locked), Some(true));

        transport.respond_once(UNLOCK_METHOD, Ok(serde_json::Value::Null));
        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-17, "Wallet is already unlocked")));
        assert_eq!(watcher.unlock("hunter2").await, Some(UnlockOutcome::Unlocked));

        assert_eq!(watcher.current().map(|s| s.is_locked), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_checks_once_at_start_and_once_per_reconnect() {
        let transport = FakeTransport::new();
        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-32602, "Invalid parameters")));
        let client = client(transport.clone());
        let health = client.health().clone();
        let watcher = Arc::new(LockStatusWatcher::new(client));
        let shutdown = CancellationToken::new();
        let handle = watcher.clone().spawn(shutdown.clone());

        // The first check is also what makes the daemon reachable.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls(UNLOCK_METHOD), 1);

        health.record_unreachable();
        health.record_reachable();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls(UNLOCK_METHOD), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_rechecks_when_daemon_returns() {
        let transport = FakeTransport::new();
        transport.set_reachable(false);
        let watcher = Arc::new(LockStatusWatcher::new(client(transport.clone())));
        let mut rx = watcher.subscribe();
        let shutdown = CancellationToken::new();
        let handle = watcher.clone().spawn(shutdown.clone());

        // Let the first check fail and leave a retry probe behind.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(watcher.current(), None);

        transport.respond("getinfo", Ok(json!({"version": "v0.6.0.4"})));
        transport.respond(UNLOCK_METHOD, Err(RpcError::new(-32602, "Invalid parameters")));
        transport.set_reachable(true);

        timeout(Duration::from_secs(30), rx.changed()).await.unwrap().unwrap();
        assert_eq!(
            *rx.borrow(),
            Some(LockStatus {
                is_locked: true,
                is_encrypted: true
            })
        );

        shutdown.cancel();
        handle.await.unwrap();
    }
}
