pub mod cli;
pub mod config;
pub mod daemon;
pub mod db;
pub mod geo;
pub mod log;
pub mod rpc;
pub mod sync;

pub use crate::daemon::{DaemonError, GeoParts, SyncDaemon};
pub use crate::rpc::{ConnectionHealth, HealthEvent, RpcClient};
