use std::{fs, fs::File, io::Write, path::Path};

use anyhow::{Context, Result};
use config::{Config, Environment};
use log::{debug, info};

use super::SyncConfig;

const ENV_PREFIX: &str = "DAEMON_SYNC";

pub fn get_default_config() -> &'static str {
    include_str!("../../config/config.toml")
}

/// Loads the configuration file at `path`, writing the default one first if
/// it does not exist. `DAEMON_SYNC_<SECTION>__<KEY>` variables override it.
pub fn load_configuration(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        write_config_to(path, get_default_config()).context("Could not create default config")?;
        info!(path:% = path.display(); "Created new configuration file");
    }

    let filename = path.to_str().context("Invalid config file path")?;

    let cfg = Config::builder()
        .add_source(config::File::with_name(filename))
        .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"))
        .build()
        .context("Could not build config")?;

    let sync_config: SyncConfig = cfg.try_deserialize().context("Invalid configuration values")?;
    sync_config.validate().context("Configuration rejected")?;

    debug!(
        path:% = path.display(),
        rpc_url = &*sync_config.daemon.rpc_url,
        geo_enabled = sync_config.geo.enabled;
        "Configuration loaded"
    );
    Ok(sync_config)
}

pub fn write_config_to(path: &Path, source: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create parent directories")?;
    };

    let mut file = File::create(path).context("Failed to create config file")?;
    file.write_all(source.as_bytes())
        .context("Failed to write config content")?;
    file.write_all(b"\n").context("Failed to write newline")?;
    Ok(())
}
