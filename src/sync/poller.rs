use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::rpc::{RpcClient, RpcError};

/// What a domain got back from the daemon on one tick.
#[derive(Debug)]
pub enum Fetched<S> {
    Snapshot(S),
    /// The daemon answered with an error that means nothing in this domain.
    Ignored(RpcError),
    NoResponse,
}

/// One data domain polled from the daemon.
#[async_trait]
pub trait PollDomain: Send + Sync + 'static {
    type Snapshot: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    async fn fetch(&self, client: &RpcClient) -> Fetched<Self::Snapshot>;

    /// Equality rule of the domain. `previous` is the last accepted snapshot.
    fn has_changed(&self, previous: Option<&Self::Snapshot>, next: &Self::Snapshot) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was already in flight.
    Skipped,
    Failed,
    Unchanged,
    Accepted,
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Skipped => write!(f, "skipped"),
            TickOutcome::Failed => write!(f, "failed"),
            TickOutcome::Unchanged => write!(f, "unchanged"),
            TickOutcome::Accepted => write!(f, "accepted"),
        }
    }
}

#[derive(Debug, Error)]
#[error("failure interval {failure:?} must be shorter than success interval {success:?}")]
pub struct InvalidIntervals {
    pub success: Duration,
    pub failure: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    success: Duration,
    failure: Duration,
}

impl PollIntervals {
    pub fn new(success: Duration, failure: Duration) -> Result<Self, InvalidIntervals> {
        if failure >= success {
            return Err(InvalidIntervals { success, failure });
        }
        Ok(Self { success, failure })
    }

    pub fn from_millis(success: u64, failure: u64) -> Result<Self, InvalidIntervals> {
        Self::new(Duration::from_millis(success), Duration::from_millis(failure))
    }

    pub fn success(&self) -> Duration {
        self.success
    }

    pub fn failure(&self) -> Duration {
        self.failure
    }

    pub fn delay_after(&self, outcome: TickOutcome) -> Duration {
        match outcome {
            TickOutcome::Failed => self.failure,
            TickOutcome::Skipped | TickOutcome::Unchanged | TickOutcome::Accepted => self.success,
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub type SnapshotReceiver<S> = watch::Receiver<Option<Arc<S>>>;

/// Recurring task reconciling one [`PollDomain`] against the daemon.
///
/// Ticks never overlap: a tick started while another is in flight is
/// skipped, not queued. Snapshots are published through a `watch` channel
/// only when the domain's equality rule reports a change.
pub struct Poller<D: PollDomain> {
    domain: D,
    client: RpcClient,
    intervals: PollIntervals,
    in_flight: AtomicBool,
    publisher: watch::Sender<Option<Arc<D::Snapshot>>>,
    refresh: Notify,
}

impl<D: PollDomain> Poller<D> {
    pub fn new(domain: D, client: RpcClient, intervals: PollIntervals) -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            domain,
            client,
            intervals,
            in_flight: AtomicBool::new(false),
            publisher,
            refresh: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.domain.name()
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }

    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    pub fn subscribe(&self) -> SnapshotReceiver<D::Snapshot> {
        self.publisher.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<D::Snapshot>> {
        self.publisher.borrow().clone()
    }

    /// Cuts the current wait short; the next tick starts right away.
    ///
    /// Ignored while a tick is in flight, since that tick is already
    /// fetching current state.
    pub fn request_refresh(&self) {
        if self.in_flight.load(Ordering::Acquire) {
            trace!(domain = self.name(); "Refresh ignored, tick in flight");
            return;
        }
        self.refresh.notify_one();
    }

    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(domain = self.name(); "Tick skipped, previous tick still in flight");
            return TickOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        let snapshot = match self.domain.fetch(&self.client).await {
            Fetched::Snapshot(snapshot) => snapshot,
            Fetched::NoResponse => {
                debug!(domain = self.name(); "No response from daemon");
                return TickOutcome::Failed;
            },
            Fetched::Ignored(e) => {
                debug!(domain = self.name(), error:% = e; "Ignoring daemon error");
                return TickOutcome::Unchanged;
            },
        };

        let previous = self.latest();
        if !self.domain.has_changed(previous.as_deref(), &snapshot) {
            trace!(domain = self.name(); "Snapshot unchanged");
            return TickOutcome::Unchanged;
        }

        self.publisher.send_replace(Some(Arc::new(snapshot)));
        debug!(domain = self.name(); "Snapshot accepted");
        TickOutcome::Accepted
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            domain = self.name(),
            success_ms = self.intervals.success().as_millis() as u64,
            failure_ms = self.intervals.failure().as_millis() as u64;
            "Poller started"
        );

        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.tick() => outcome,
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.refresh.notified() => {
                    debug!(domain = self.name(); "Refresh requested");
                }
                _ = sleep(self.intervals.delay_after(outcome)) => {}
            }
        }

        info!(domain = self.name(); "Poller stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
