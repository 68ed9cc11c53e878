use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

#[derive(Parser)]
#[command(name = "daemon-sync")]
#[command(about = "Keeps wallet daemon state synchronised", long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        help = "Path to the configuration file",
        default_value = "data/config.toml"
    )]
    pub config: PathBuf,
    #[arg(long, global = true, help = "Override the daemon JSON-RPC endpoint")]
    pub rpc_url: Option<Url>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll the daemon continuously and log every published change
    Run {
        #[arg(long, help = "SQLite file used to keep resolved peer locations")]
        geo_cache: Option<PathBuf>,
        #[arg(long, help = "Disable peer geolocation")]
        no_geo: bool,
    },
    /// Check whether the wallet is encrypted and locked
    LockStatus,
    /// Unlock an encrypted wallet
    Unlock {
        #[arg(short, long, help = "Wallet passphrase")]
        passphrase: String,
    },
    /// Issue one raw JSON-RPC call and print the result
    Call {
        #[arg(help = "Method name, e.g. getinfo")]
        method: String,
        #[arg(help = "Parameters, each parsed as JSON and falling back to a plain string")]
        params: Vec<String>,
    },
}
