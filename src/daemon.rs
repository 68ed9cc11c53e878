//! Long-running synchronisation against a wallet daemon.
//!
//! [`SyncDaemon`] owns every component of the core and wires them together:
//!
//! 1. **RPC client**: shared by every poller, feeds the health tracker
//! 2. **Pollers**: wallet info, transactions, network, chain blender and
//!    incentive info, each on its own success/failure intervals
//! 3. **Geolocation**: optional enricher used by the network poller, with an
//!    optional SQLite-backed cache
//! 4. **Lock status watcher**: re-checks the wallet lock state whenever the
//!    daemon becomes reachable
//! 5. **Reconnect fan-out**: cuts every poller's wait short when the daemon
//!    comes back, instead of waiting out the failure interval
//!
//! All tasks stop when the shutdown token is cancelled. In-flight ticks and
//! staggered lookups are dropped, not awaited.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use daemon_sync::config::SyncConfig;
//! use daemon_sync::daemon::SyncDaemon;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let daemon = SyncDaemon::new(SyncConfig::default()).await?;
//! let _wallet_info = daemon.wallet_info().subscribe();
//!
//! daemon.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info};
use thiserror::Error;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, IntervalConfig, SyncConfig};
use crate::db::{self, GeoDbError};
use crate::geo::{Enricher, GeoCache, GeoLookup, GeoLookupError, HttpGeoLookup};
use crate::rpc::{HealthEvent, HealthTracker, HttpTransport, RpcClient, Transport, TransportError};
use crate::sync::domains::{FieldDomain, NetworkDomain, TransactionsDomain};
use crate::sync::{LockStatusWatcher, PollDomain, PollIntervals, Poller};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not set up the daemon transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Could not set up the geolocation provider: {0}")]
    GeoProvider(#[from] GeoLookupError),

    #[error("Geolocation cache error: {0}")]
    GeoCache(#[from] GeoDbError),

    #[error("Failed to listen for the shutdown signal: {0}")]
    Signal(#[source] std::io::Error),

    #[error("A task panicked during shutdown: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Geolocation parts the network poller is enriched with.
pub struct GeoParts {
    pub lookup: Arc<dyn GeoLookup>,
    pub cache: GeoCache,
}

pub struct SyncDaemon {
    client: RpcClient,
    wallet_info: Arc<Poller<FieldDomain>>,
    transactions: Arc<Poller<TransactionsDomain>>,
    network: Arc<Poller<NetworkDomain>>,
    chain_blender: Arc<Poller<FieldDomain>>,
    incentive: Arc<Poller<FieldDomain>>,
    lock_status: Arc<LockStatusWatcher>,
    geo_cache: Option<GeoCache>,
    shutdown: CancellationToken,
}

impl SyncDaemon {
    /// Builds the daemon with an HTTP transport and, when enabled, the HTTP
    /// geolocation provider from `config`.
    pub async fn new(config: SyncConfig) -> Result<Self, DaemonError> {
        config.validate()?;

        let transport = HttpTransport::with_timeout(config.daemon.rpc_url()?, config.daemon.request_timeout())?;
        info!(endpoint:% = transport.endpoint(); "Using wallet daemon");

        let geo = if config.geo.enabled {
            let lookup = HttpGeoLookup::with_timeout(config.geo.provider_url()?, config.geo.request_timeout())?;
            let cache = match &config.geo.cache_path {
                Some(path) => GeoCache::with_store(db::init_db(path)?).await?,
                None => GeoCache::new(),
            };
            Some(GeoParts {
                lookup: Arc::new(lookup),
                cache,
            })
        } else {
            info!("Geolocation disabled");
            None
        };

        Self::with_parts(&config, Arc::new(transport), geo)
    }

    /// Builds the daemon around caller-supplied transport and geolocation parts.
    pub fn with_parts(
        config: &SyncConfig,
        transport: Arc<dyn Transport>,
        geo: Option<GeoParts>,
    ) -> Result<Self, DaemonError> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let client = RpcClient::with_probe_interval(
            transport,
            HealthTracker::new(),
            config.daemon.probe_interval(),
            shutdown.child_token(),
        );

        let (network_domain, geo_cache) = match geo {
            Some(parts) => {
                let enricher = Enricher::new(parts.lookup, parts.cache.clone()).with_stagger(config.geo.stagger());
                (NetworkDomain::with_enricher(Arc::new(enricher)), Some(parts.cache))
            },
            None => (NetworkDomain::new(), None),
        };

        let poll = &config.poll;
        Ok(Self {
            wallet_info: poller(FieldDomain::wallet_info(), &client, "wallet_info", poll.wallet_info)?,
            transactions: poller(TransactionsDomain::new(), &client, "transactions", poll.transactions)?,
            network: poller(network_domain, &client, "network", poll.network)?,
            chain_blender: poller(FieldDomain::chain_blender(), &client, "chain_blender", poll.chain_blender)?,
            incentive: poller(FieldDomain::incentive_info(), &client, "incentive", poll.incentive)?,
            lock_status: Arc::new(LockStatusWatcher::new(client.clone())),
            client,
            geo_cache,
            shutdown,
        })
    }

    pub fn health(&self) -> &HealthTracker {
        self.client.health()
    }

    pub fn wallet_info(&self) -> &Arc<Poller<FieldDomain>> {
        &self.wallet_info
    }

    pub fn transactions(&self) -> &Arc<Poller<TransactionsDomain>> {
        &self.transactions
    }

    pub fn network(&self) -> &Arc<Poller<NetworkDomain>> {
        &self.network
    }

    pub fn chain_blender(&self) -> &Arc<Poller<FieldDomain>> {
        &self.chain_blender
    }

    pub fn incentive(&self) -> &Arc<Poller<FieldDomain>> {
        &self.incentive
    }

    pub fn lock_status(&self) -> &Arc<LockStatusWatcher> {
        &self.lock_status
    }

    pub fn geo_cache(&self) -> Option<&GeoCache> {
        self.geo_cache.as_ref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns every background task. They run until [`Self::shutdown`].
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let handles = vec![
            self.wallet_info.clone().spawn(self.shutdown.child_token()),
            self.transactions.clone().spawn(self.shutdown.child_token()),
            self.network.clone().spawn(self.shutdown.child_token()),
            self.chain_blender.clone().spawn(self.shutdown.child_token()),
            self.incentive.clone().spawn(self.shutdown.child_token()),
            self.lock_status.clone().spawn(self.shutdown.child_token()),
            tokio::spawn(refresh_on_reconnect(
                self.refreshers(),
                self.health().subscribe(),
                self.shutdown.child_token(),
            )),
        ];
        info!(tasks = handles.len(); "Synchronisation tasks started");
        handles
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs until Ctrl+C or [`Self::shutdown`], then stops every task.
    pub async fn run(&self) -> Result<(), DaemonError> {
        info!("Sync daemon started. Press Ctrl+C to stop.");
        let handles = self.start();

        let signal_result = tokio::select! {
            res = signal::ctrl_c() => {
                info!("Received shutdown signal, stopping all tasks...");
                res
            }
            _ = self.shutdown.cancelled() => Ok(()),
        };
        self.shutdown.cancel();

        for result in join_all(handles).await {
            result?;
        }

        signal_result.map_err(DaemonError::Signal)?;
        info!("Daemon stopped gracefully.");
        Ok(())
    }

    fn refreshers(&self) -> Vec<Box<dyn Fn() + Send + Sync>> {
        fn refresher<D: PollDomain>(poller: &Arc<Poller<D>>) -> Box<dyn Fn() + Send + Sync> {
            let poller = poller.clone();
            Box::new(move || poller.request_refresh())
        }

        vec![
            refresher(&self.wallet_info),
            refresher(&self.transactions),
            refresher(&self.network),
            refresher(&self.chain_blender),
            refresher(&self.incentive),
        ]
    }
}

fn poller<D: PollDomain>(
    domain: D,
    client: &RpcClient,
    name: &'static str,
    intervals: IntervalConfig,
) -> Result<Arc<Poller<D>>, ConfigError> {
    let intervals: PollIntervals = intervals
        .intervals()
        .map_err(|source| ConfigError::Intervals { domain: name, source })?;
    Ok(Arc::new(Poller::new(domain, client.clone(), intervals)))
}

async fn refresh_on_reconnect(
    refreshers: Vec<Box<dyn Fn() + Send + Sync>>,
    mut events: broadcast::Receiver<HealthEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(HealthEvent::BecameReachable) | Err(broadcast::error::RecvError::Lagged(_)) => {
                debug!(pollers = refreshers.len(); "Daemon reachable, refreshing every poller");
                refreshers.iter().for_each(|refresh| refresh());
            },
            Ok(HealthEvent::BecameUnreachable) => {},
            Err(broadcast::error::RecvError::Closed) => {
                error!("Health event channel closed");
                break;
            },
        }
    }
}
