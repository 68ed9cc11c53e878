//! Connection health state machine.
//!
//! Health starts [`ConnectionHealth::Unknown`] and is driven only by transport
//! outcomes: any successful exchange forces `Reachable`, any
//! [`TransportError::Unreachable`](super::TransportError::Unreachable) forces
//! `Unreachable`, and a malformed response leaves the state untouched.
//!
//! A [`HealthEvent`] is broadcast once per real transition, so subscribers
//! never see two consecutive `BecameReachable` events without a
//! `BecameUnreachable` in between.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionHealth {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionHealth::Unknown => write!(f, "unknown"),
            ConnectionHealth::Reachable => write!(f, "reachable"),
            ConnectionHealth::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    BecameReachable,
    BecameUnreachable,
}

/// Shared handle to the connection health of one daemon endpoint.
#[derive(Clone)]
pub struct HealthTracker {
    state: Arc<Mutex<ConnectionHealth>>,
    events: broadcast::Sender<HealthEvent>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ConnectionHealth::Unknown)),
            events,
        }
    }

    pub fn current(&self) -> ConnectionHealth {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Records a completed exchange with the daemon.
    pub fn record_reachable(&self) -> Option<HealthEvent> {
        self.transition(ConnectionHealth::Reachable)
    }

    /// Records a refused or timed out exchange.
    pub fn record_unreachable(&self) -> Option<HealthEvent> {
        self.transition(ConnectionHealth::Unreachable)
    }

    fn transition(&self, next: ConnectionHealth) -> Option<HealthEvent> {
        // Events are broadcast under the state lock so their order matches the state changes.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return None;
        }
        let event = match next {
            ConnectionHealth::Reachable => HealthEvent::BecameReachable,
            ConnectionHealth::Unreachable => HealthEvent::BecameUnreachable,
            ConnectionHealth::Unknown => return None,
        };
        *state = next;
        // No subscribers is fine.
        let _ = self.events.send(event);
        drop(state);

        match event {
            HealthEvent::BecameReachable => info!("Daemon became reachable"),
            HealthEvent::BecameUnreachable => warn!("Daemon became unreachable"),
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn starts_unknown() {
        assert_eq!(HealthTracker::new().current(), ConnectionHealth::Unknown);
    }

    #[test]
    fn unknown_to_unreachable_emits_once() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.record_unreachable(), Some(HealthEvent::BecameUnreachable));
        assert_eq!(tracker.record_unreachable(), None);
        assert_eq!(tracker.current(), ConnectionHealth::Unreachable);
    }

    #[tokio::test]
    async fn subscribers_receive_each_transition() {
        let tracker = HealthTracker::new();
        let mut rx = tracker.subscribe();

        tracker.record_reachable();
        tracker.record_reachable();
        tracker.record_unreachable();
        tracker.record_reachable();

        assert_eq!(rx.recv().await.unwrap(), HealthEvent::BecameReachable);
        assert_eq!(rx.recv().await.unwrap(), HealthEvent::BecameUnreachable);
        assert_eq!(rx.recv().await.unwrap(), HealthEvent::BecameReachable);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_transitions_are_broadcast_in_state_order() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        use tokio::sync::broadcast::error::TryRecvError;

        let tracker = HealthTracker::new();
        let mut rx = tracker.subscribe();
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let done = done.clone();
            thread::spawn(move || {
                let mut last: Option<HealthEvent> = None;
                let mut repeats = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    match rx.try_recv() {
                        Ok(event) => {
                            if last == Some(event) {
                                repeats += 1;
                            }
                            last = Some(event);
                        },
                        Err(TryRecvError::Lagged(_)) => last = None,
                        Err(TryRecvError::Empty) if finished => break,
                        Err(TryRecvError::Empty) => thread::yield_now(),
                        Err(TryRecvError::Closed) => break,
                    }
                }
                (repeats, last)
            })
        };

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                thread::spawn(move || {
                    for i in 0..20_000 {
                        if i % 2 == 0 {
                            tracker.record_reachable();
                        } else {
                            tracker.record_unreachable();
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);

        let (repeats, last) = reader.join().unwrap();
        assert_eq!(repeats, 0);
        let expected = match tracker.current() {
            ConnectionHealth::Reachable => Some(HealthEvent::BecameReachable),
            ConnectionHealth::Unreachable => Some(HealthEvent::BecameUnreachable),
            ConnectionHealth::Unknown => None,
        };
        if last.is_some() {
            assert_eq!(last, expected);
        }
    }

    proptest! {
        #[test]
        fn prop_reachable_events_alternate(outcomes in proptest::collection::vec(any::<bool>(), 0..64)) {
            let tracker = HealthTracker::new();
            let mut last: Option<HealthEvent> = None;

            for reachable in outcomes {
                let event = if reachable {
                    tracker.record_reachable()
                } else {
                    tracker.record_unreachable()
                };
                if let Some(event) = event {
                    prop_assert_ne!(Some(event), last);
                    last = Some(event);
                }
            }
        }
    }
}
