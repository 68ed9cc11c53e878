//! Polling and reconciliation of daemon state.
//!
//! Each data domain runs in its own [`Poller`], which publishes a new snapshot
//! only when the domain's equality rule says the daemon's answer changed.

pub mod domains;
mod lock_status;
mod poller;
mod policy;

pub use lock_status::{LockStatus, LockStatusWatcher, UnlockOutcome, check_lock_status, lock_status_from, unlock};
pub use poller::{Fetched, InvalidIntervals, PollDomain, PollIntervals, Poller, SnapshotReceiver, TickOutcome};
pub use policy::{FieldSnapshot, fields_differ, transactions_differ};
