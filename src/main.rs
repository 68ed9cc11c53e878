use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use futures::future::join_all;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use daemon_sync::cli::{Cli, Commands};
use daemon_sync::config::{SyncConfig, load_configuration};
use daemon_sync::daemon::SyncDaemon;
use daemon_sync::log::{init_logging, mask_amount};
use daemon_sync::rpc::{HealthTracker, HttpTransport, RpcClient};
use daemon_sync::sync::domains::{NetworkSnapshot, TransactionsSnapshot};
use daemon_sync::sync::{FieldSnapshot, SnapshotReceiver, UnlockOutcome, check_lock_status, unlock};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging()?;

    let cli = Cli::parse();
    let mut config = load_configuration(&cli.config)?;

    match cli.command {
        Commands::Run { geo_cache, no_geo } => {
            config.apply_overrides(cli.rpc_url, geo_cache);
            if no_geo {
                config.geo.enabled = false;
            }
            let daemon = SyncDaemon::new(config).await?;
            let reporters = spawn_reporters(&daemon);

            daemon.run().await?;
            join_all(reporters).await;
            Ok(())
        },
        Commands::LockStatus => {
            config.apply_overrides(cli.rpc_url, None);
            let (client, _) = one_shot_client(&config)?;
            let status = check_lock_status(&client)
                .await
                .ok_or_else(|| anyhow!("Daemon at {} gave no usable answer", config.daemon.rpc_url))?;
            println!("Wallet is {} (encrypted: {}, locked: {})", status, status.is_encrypted, status.is_locked);
            Ok(())
        },
        Commands::Unlock { passphrase } => {
            config.apply_overrides(cli.rpc_url, None);
            let (client, _) = one_shot_client(&config)?;
            match unlock(&client, &passphrase).await {
                Some(UnlockOutcome::IncorrectPassphrase) => bail!("The wallet passphrase entered was incorrect"),
                Some(outcome) => {
                    println!("Wallet {}", outcome);
                    Ok(())
                },
                None => bail!("Daemon at {} gave no usable answer", config.daemon.rpc_url),
            }
        },
        Commands::Call { method, params } => {
            config.apply_overrides(cli.rpc_url, None);
            let (client, transport) = one_shot_client(&config)?;
            let params = params.iter().map(String::as_str).map(parse_param).collect();

            let result = client.call(&method, params).await;
            if let Some(latency) = transport.get_latency().await {
                debug!(method = &*method, latency_ms = latency.as_millis() as u64; "Call completed");
            }

            match result {
                Some(Ok(value)) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    Ok(())
                },
                Some(Err(e)) => bail!("Daemon returned an error: {}", e),
                None => bail!("Daemon at {} is not reachable", config.daemon.rpc_url),
            }
        },
    }
}

/// A client for a single exchange. It never leaves a retry probe behind.
fn one_shot_client(config: &SyncConfig) -> Result<(RpcClient, Arc<HttpTransport>), anyhow::Error> {
    let transport = Arc::new(
        HttpTransport::with_timeout(config.daemon.rpc_url()?, config.daemon.request_timeout())
            .context("Could not create the daemon transport")?,
    );
    let no_probe = CancellationToken::new();
    no_probe.cancel();
    let client = RpcClient::with_probe_interval(
        transport.clone(),
        HealthTracker::new(),
        config.daemon.probe_interval(),
        no_probe,
    );
    Ok((client, transport))
}

fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn spawn_reporters(daemon: &SyncDaemon) -> Vec<JoinHandle<()>> {
    let shutdown = daemon.shutdown_token();
    let mut lock_rx = daemon.lock_status().subscribe();
    let lock_shutdown = shutdown.child_token();

    vec![
        report("wallet_info", daemon.wallet_info().subscribe(), shutdown.child_token(), describe_wallet_info),
        report(
            "transactions",
            daemon.transactions().subscribe(),
            shutdown.child_token(),
            describe_transactions,
        ),
        report("network", daemon.network().subscribe(), shutdown.child_token(), describe_network),
        report(
            "chain_blender",
            daemon.chain_blender().subscribe(),
            shutdown.child_token(),
            describe_fields,
        ),
        report("incentive", daemon.incentive().subscribe(), shutdown.child_token(), describe_fields),
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = lock_shutdown.cancelled() => break,
                    changed = lock_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let status = *lock_rx.borrow_and_update();
                if let Some(status) = status {
                    info!(status:% = status; "Wallet lock status published");
                }
            }
        }),
    ]
}

fn report<S, F>(
    domain: &'static str,
    mut rx: SnapshotReceiver<S>,
    shutdown: CancellationToken,
    describe: F,
) -> JoinHandle<()>
where
    S: Send + Sync + 'static,
    F: Fn(&S) -> String + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        warn!(domain = domain; "Snapshot channel closed");
                        break;
                    }
                }
            }
            let summary = rx.borrow_and_update().as_deref().map(&describe);
            if let Some(summary) = summary {
                info!(domain = domain, snapshot = &*summary; "Snapshot published");
            }
        }
    })
}

fn describe_wallet_info(snapshot: &FieldSnapshot) -> String {
    format!(
        "balance={} stake={} blocks={} connections={}",
        mask_amount(snapshot.get_f64("balance").unwrap_or_default()),
        mask_amount(snapshot.get_f64("stake").unwrap_or_default()),
        snapshot.get_u64("blocks").unwrap_or_default(),
        snapshot.get_u64("connections").unwrap_or_default(),
    )
}

fn describe_fields(snapshot: &FieldSnapshot) -> String {
    snapshot
        .fields()
        .filter(|(name, _)| !name.to_lowercase().contains("balance"))
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_transactions(snapshot: &TransactionsSnapshot) -> String {
    format!(
        "transactions={} unconfirmed={} last_block={}",
        snapshot.transactions.len(),
        snapshot.unconfirmed_txids().count(),
        snapshot.last_block.as_deref().unwrap_or("none"),
    )
}

fn describe_network(snapshot: &NetworkSnapshot) -> String {
    let located = snapshot.peers.iter().filter(|p| p.geo.is_some()).count();
    format!(
        "tcp={} udp={} peers={} located={} endpoints={}",
        snapshot.tcp_connections,
        snapshot.udp_connections,
        snapshot.peers.len(),
        located,
        snapshot.endpoints.len(),
    )
}
