pub mod structured_console_encoder;

use std::net::IpAddr;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use log::{debug, info};
use log4rs::{
    Config,
    config::{Deserializers, RawConfig},
};

use crate::log::structured_console_encoder::StructuredConsoleEncoderDeserializer;

const EXTERNAL_CONFIG: &str = "log4rs.yml";

/// Initializes logging from `log4rs.yml` in the working directory, falling
/// back to the configuration embedded in the binary.
pub fn init_logging() -> anyhow::Result<()> {
    let mut deserializers = Deserializers::default();
    deserializers.insert("structured_console", StructuredConsoleEncoderDeserializer);

    let path = Path::new(EXTERNAL_CONFIG);
    if path.exists() {
        log4rs::init_file(path, deserializers)
            .with_context(|| format!("Failed to load external {}", EXTERNAL_CONFIG))?;
        info!(path = EXTERNAL_CONFIG; "Logging initialized from external configuration");
        return Ok(());
    }

    let yaml_content = include_str!("../../resources/default_log4rs.yml");
    let raw_config: RawConfig =
        serde_yaml::from_str(yaml_content).context("Embedded logging configuration is invalid YAML")?;

    let (appenders, errors) = raw_config.appenders_lossy(&deserializers);
    if !errors.is_empty() {
        return Err(anyhow!("Errors parsing embedded appenders: {:?}", errors));
    }

    let config = Config::builder()
        .appenders(appenders)
        .loggers(raw_config.loggers())
        .build(raw_config.root())
        .context("Failed to build logging config")?;

    log4rs::init_config(config).context("Failed to initialize logging from embedded config")?;

    debug!("Logging initialized from embedded defaults (no external log4rs.yml found)");
    Ok(())
}

fn reveal_pii() -> bool {
    static REVEAL_PII_CACHE: OnceLock<bool> = OnceLock::new();

    *REVEAL_PII_CACHE.get_or_init(|| {
        std::env::var("REVEAL_PII")
            .map(|v| parse_flag(&v))
            .unwrap_or(false)
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Masks a peer address, keeping only the leading part of the network.
/// If REVEAL_PII is true, returns the full address.
pub fn mask_ip(ip: IpAddr) -> String {
    if reveal_pii() {
        return ip.to_string();
    }
    redact_ip(ip)
}

fn redact_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            format!("{}.{}.x.x", a, b)
        },
        IpAddr::V6(v6) => format!("{:x}:{:x}::x", v6.segments()[0], v6.segments()[1]),
    }
}

/// Returns a redacted placeholder for wallet balances.
/// If REVEAL_PII is true, returns the actual amount.
pub fn mask_amount(amount: f64) -> String {
    if reveal_pii() {
        return amount.to_string();
    }

    "<REDACTED>".to_string()
}
