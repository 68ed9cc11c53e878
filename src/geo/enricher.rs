use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info};
use tokio::time::{Instant, sleep};

use crate::geo::{GeoCache, GeoEntry, GeoLookup, GeoMap};
use crate::log::mask_ip;

pub const DEFAULT_STAGGER: Duration = Duration::from_millis(400);

/// Resolves unknown peer addresses and merges the results into a [`GeoCache`].
///
/// Lookup `i` of a batch starts `i * stagger` after the batch begins, so the
/// provider sees a steady request rate without the batch running serially.
/// Failed lookups are dropped and retried the next time the address is seen.
pub struct Enricher {
    lookup: Arc<dyn GeoLookup>,
    cache: GeoCache,
    stagger: Duration,
}

impl Enricher {
    pub fn new(lookup: Arc<dyn GeoLookup>, cache: GeoCache) -> Self {
        Self {
            lookup,
            cache,
            stagger: DEFAULT_STAGGER,
        }
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    pub fn stagger(&self) -> Duration {
        self.stagger
    }

    /// Addresses from `ips` that still need a lookup, in first-seen order.
    pub fn pending(&self, ips: impl IntoIterator<Item = IpAddr>) -> Vec<IpAddr> {
        let cached = self.cache.snapshot();
        let mut seen = HashSet::new();
        ips.into_iter()
            .filter(|ip| is_resolvable(ip) && !cached.contains_key(ip) && seen.insert(*ip))
            .collect()
    }

    /// Looks up every uncached address and returns the cache as it stands
    /// once all lookups have settled.
    pub async fn enrich(&self, ips: impl IntoIterator<Item = IpAddr>) -> Arc<GeoMap> {
        let pending = self.pending(ips);
        if pending.is_empty() {
            return self.cache.snapshot();
        }

        let started = Instant::now();
        let total = pending.len();
        let lookups = pending.into_iter().enumerate().map(|(index, ip)| {
            let delay = self.stagger * index as u32;
            async move {
                sleep(delay).await;
                match self.lookup.lookup(ip).await {
                    Ok(location) => Some(GeoEntry::new(ip, location)),
                    Err(e) => {
                        debug!(ip = &*mask_ip(ip), error:% = e; "Geolocation lookup failed");
                        None
                    },
                }
            }
        });

        let resolved: Vec<GeoEntry> = join_all(lookups).await.into_iter().flatten().collect();
        let succeeded = resolved.len();
        let added = self.cache.merge(resolved).await;

        info!(
            requested = total,
            resolved = succeeded,
            added = added,
            elapsed_ms = started.elapsed().as_millis() as u64;
            "Geolocation batch settled"
        );

        self.cache.snapshot()
    }
}

/// Unspecified, loopback and private addresses have no public location.
/// IPv4-mapped IPv6 addresses are judged by their IPv4 form.
fn is_resolvable(ip: &IpAddr) -> bool {
    let ip = ip.to_canonical();
    if ip.is_unspecified() || ip.is_loopback() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => !v4.is_private(),
        // fc00::/7 unique local
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) != 0xfc00,
    }
}
