//! JSON-RPC plumbing between the synchronisation core and the wallet daemon.
//!
//! # Architecture
//!
//! - [`Transport`] / [`HttpTransport`] - one HTTP POST per request, carrying a
//!   single call or a batch; no retries and no interpretation of results
//! - [`HealthTracker`] - reachability state machine fed by transport outcomes
//! - [`RpcClient`] - assigns call ids, funnels outcomes into the tracker and
//!   keeps one cancellable retry probe alive while the daemon is down
//!
//! # Error Handling
//!
//! An unreachable daemon is an expected condition. The client reports it as
//! "no response" (`None`) and through [`HealthEvent`]s, never as a hard error.
//! Daemon-side errors arrive as [`RpcError`] values inside each [`RpcResult`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use url::Url;
//! use daemon_sync::rpc::{HealthTracker, HttpTransport, RpcClient};
//!
//! # async fn example() -> Result<(), anyhow::Error> {
//! let transport = HttpTransport::new(Url::parse("http://127.0.0.1:9195")?)?;
//! let client = RpcClient::new(Arc::new(transport), HealthTracker::new());
//!
//! match client.call("getinfo", vec![]).await {
//!     Some(Ok(info)) => println!("Daemon info: {}", info),
//!     Some(Err(e)) => println!("Daemon error: {}", e),
//!     None => println!("Daemon is not reachable"),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod health;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{DEFAULT_PROBE_INTERVAL, PROBE_METHOD, RpcClient};
pub use error::{RpcError, RpcErrorCode, TransportError};
pub use health::{ConnectionHealth, HealthEvent, HealthTracker};
pub use transport::{DEFAULT_TIMEOUT, HttpTransport, Transport};
pub use types::{RpcCall, RpcRequest, RpcResult};
