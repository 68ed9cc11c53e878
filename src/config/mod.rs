//! Runtime configuration for the synchronisation core.

mod loader;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::geo::DEFAULT_PROVIDER_URL;
use crate::sync::{InvalidIntervals, PollIntervals};

pub use loader::{get_default_config, load_configuration, write_config_to};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9195";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("poll.{domain}: {source}")]
    Intervals {
        domain: &'static str,
        #[source]
        source: InvalidIntervals,
    },

    #[error(
        "daemon.request_timeout_ms ({timeout_ms}) must be shorter than the smallest failure interval ({failure_ms})"
    )]
    TimeoutTooLong { timeout_ms: u64, failure_ms: u64 },

    #[error("{field} is not a valid URL: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{field} must be an http or https URL, got '{url}'")]
    UnsupportedScheme { field: &'static str, url: Url },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            request_timeout_ms: default_request_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

impl DaemonConfig {
    pub fn rpc_url(&self) -> Result<Url, ConfigError> {
        http_url("daemon.rpc_url", &self.rpc_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub success_interval_ms: u64,
    pub failure_interval_ms: u64,
}

impl IntervalConfig {
    const fn new(success_interval_ms: u64, failure_interval_ms: u64) -> Self {
        Self {
            success_interval_ms,
            failure_interval_ms,
        }
    }

    pub fn intervals(&self) -> Result<PollIntervals, InvalidIntervals> {
        PollIntervals::from_millis(self.success_interval_ms, self.failure_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_wallet_info")]
    pub wallet_info: IntervalConfig,
    #[serde(default = "default_transactions")]
    pub transactions: IntervalConfig,
    #[serde(default = "default_network")]
    pub network: IntervalConfig,
    #[serde(default = "default_chain_blender")]
    pub chain_blender: IntervalConfig,
    #[serde(default = "default_incentive")]
    pub incentive: IntervalConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            wallet_info: default_wallet_info(),
            transactions: default_transactions(),
            network: default_network(),
            chain_blender: default_chain_blender(),
            incentive: default_incentive(),
        }
    }
}

impl PollConfig {
    pub fn domains(&self) -> [(&'static str, IntervalConfig); 5] {
        [
            ("wallet_info", self.wallet_info),
            ("transactions", self.transactions),
            ("network", self.network),
            ("chain_blender", self.chain_blender),
            ("incentive", self.incentive),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    #[serde(default = "default_geo_timeout_ms")]
    pub request_timeout_ms: u64,
    /// SQLite file that keeps resolved locations across restarts.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider_url: default_provider_url(),
            stagger_ms: default_stagger_ms(),
            request_timeout_ms: default_geo_timeout_ms(),
            cache_path: None,
        }
    }
}

impl GeoConfig {
    pub fn provider_url(&self) -> Result<Url, ConfigError> {
        http_url("geo.provider_url", &self.provider_url)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub geo: GeoConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut smallest_failure = u64::MAX;
        for (domain, interval) in self.poll.domains() {
            interval
                .intervals()
                .map_err(|source| ConfigError::Intervals { domain, source })?;
            smallest_failure = smallest_failure.min(interval.failure_interval_ms);
        }

        if self.daemon.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("daemon.request_timeout_ms"));
        }
        if self.daemon.request_timeout_ms >= smallest_failure {
            return Err(ConfigError::TimeoutTooLong {
                timeout_ms: self.daemon.request_timeout_ms,
                failure_ms: smallest_failure,
            });
        }
        if self.daemon.probe_interval_ms == 0 {
            return Err(ConfigError::Zero("daemon.probe_interval_ms"));
        }

        self.daemon.rpc_url()?;
        if self.geo.enabled {
            self.geo.provider_url()?;
        }
        Ok(())
    }

    /// Applies command line overrides on top of the loaded file.
    pub fn apply_overrides(&mut self, rpc_url: Option<Url>, geo_cache: Option<PathBuf>) {
        if let Some(url) = rpc_url {
            self.daemon.rpc_url = url.to_string();
        }
        if let Some(path) = geo_cache {
            self.geo.cache_path = Some(path);
        }
    }
}

fn http_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme { field, url }),
    }
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.to_string()
}

fn default_provider_url() -> String {
    DEFAULT_PROVIDER_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_probe_interval_ms() -> u64 {
    5_000
}

fn default_stagger_ms() -> u64 {
    400
}

fn default_geo_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_wallet_info() -> IntervalConfig {
    IntervalConfig::new(10_000, 5_000)
}

fn default_transactions() -> IntervalConfig {
    IntervalConfig::new(10_000, 5_000)
}

fn default_network() -> IntervalConfig {
    IntervalConfig::new(20_000, 10_000)
}

fn default_chain_blender() -> IntervalConfig {
    IntervalConfig::new(10_000, 5_000)
}

fn default_incentive() -> IntervalConfig {
    IntervalConfig::new(20_000, 10_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.daemon.rpc_url().unwrap().as_str(), "http://127.0.0.1:9195/");
        assert_eq!(config.geo.stagger(), Duration::from_millis(400));
    }

    #[test]
    fn failure_interval_not_shorter_is_rejected() {
        let mut config = SyncConfig::default();
        config.poll.network = IntervalConfig::new(10_000, 10_000);

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Intervals { domain: "network", .. }));
    }

    #[test]
    fn timeout_must_undercut_every_failure_interval() {
        let mut config = SyncConfig::default();
        config.daemon.request_timeout_ms = 5_000;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TimeoutTooLong {
                timeout_ms: 5_000,
                failure_ms: 5_000
            }
        ));
    }

    #[test]
    fn non_http_provider_is_rejected_only_when_enabled() {
        let mut config = SyncConfig::default();
        config.geo.provider_url = "ftp://geo.example.org/".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedScheme {
                field: "geo.provider_url",
                ..
            })
        ));

        config.geo.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn unparsable_rpc_url_is_rejected() {
        let mut config = SyncConfig::default();
        config.daemon.rpc_url = "127.0.0.1 9195".to_string();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl {
                field: "daemon.rpc_url",
                ..
            })
        ));
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let mut config = SyncConfig::default();
        config.apply_overrides(
            Some(Url::parse("http://10.0.0.2:9195").unwrap()),
            Some(PathBuf::from("/tmp/geo.db")),
        );

        assert_eq!(config.daemon.rpc_url().unwrap().host_str(), Some("10.0.0.2"));
        assert_eq!(config.geo.cache_path, Some(PathBuf::from("/tmp/geo.db")));
    }
}
