use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_PROVIDER_URL: &str = "https://geoip.nekudo.com/api/";
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A single failed geolocation lookup. Always absorbed by the enricher.
#[derive(Debug, Error)]
pub enum GeoLookupError {
    #[error("Lookup request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Lookup provider returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Lookup provider error: {0}")]
    Provider(String),

    #[error("Lookup response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid lookup URL: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoLookupError>;
}

#[derive(Debug, Deserialize)]
struct ProviderCountry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProviderCoordinates {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ProviderRecord {
    country: ProviderCountry,
    location: ProviderCoordinates,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorEnvelope {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderResponse {
    Found(ProviderRecord),
    Error(ProviderErrorEnvelope),
}

/// `GET {provider}/{ip}` against a nekudo-style geolocation API.
pub struct HttpGeoLookup {
    base_url: Url,
    client: Client,
}

impl HttpGeoLookup {
    pub fn new(base_url: Url) -> Result<Self, GeoLookupError> {
        Self::with_timeout(base_url, HTTP_TIMEOUT)
    }

    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, GeoLookupError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("daemon-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { base_url, client })
    }

    fn url_for(&self, ip: IpAddr) -> Result<Url, GeoLookupError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&ip.to_string())?)
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoLookupError> {
        let resp = self.client.get(self.url_for(ip)?).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GeoLookupError::Status(status));
        }

        let body = resp.bytes().await?;
        match serde_json::from_slice::<ProviderResponse>(&body)? {
            ProviderResponse::Found(record) => Ok(GeoLocation {
                country: record.country.name,
                latitude: record.location.latitude,
                longitude: record.location.longitude,
            }),
            ProviderResponse::Error(envelope) => Err(GeoLookupError::Provider(
                envelope
                    .msg
                    .or(envelope.kind)
                    .unwrap_or_else(|| "unrecognised response".to_string()),
            )),
        }
    }
}
