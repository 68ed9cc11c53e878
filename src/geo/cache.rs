use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::db::{GeoDbResult, SqlitePool, get_geo_entries, insert_geo_entry};
use crate::geo::GeoLocation;

/// A resolved address. Never replaced once it is in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoEntry {
    pub ip: IpAddr,
    pub location: GeoLocation,
    pub resolved_at: DateTime<Utc>,
}

impl GeoEntry {
    pub fn new(ip: IpAddr, location: GeoLocation) -> Self {
        Self {
            ip,
            location,
            resolved_at: Utc::now(),
        }
    }
}

pub type GeoMap = HashMap<IpAddr, GeoEntry>;

/// Append-only geolocation cache.
///
/// Readers take an immutable snapshot of the map. Merges build a new map and
/// swap it in, so a reader never observes a half-applied merge. When a store
/// is attached, newly added entries are also written to SQLite.
#[derive(Clone, Default)]
pub struct GeoCache {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: RwLock<Arc<GeoMap>>,
    merge_lock: Mutex<()>,
    store: Option<SqlitePool>,
}

impl GeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a cache backed by `pool`, preloading every stored entry.
    pub async fn with_store(pool: SqlitePool) -> GeoDbResult<Self> {
        let loader = pool.clone();
        let stored = tokio::task::spawn_blocking(move || {
            let conn = loader.get()?;
            get_geo_entries(&conn)
        })
        .await??;

        let entries: GeoMap = stored.into_iter().map(|entry| (entry.ip, entry)).collect();
        info!(entries = entries.len(); "Geolocation cache loaded");

        Ok(Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(Arc::new(entries)),
                merge_lock: Mutex::new(()),
                store: Some(pool),
            }),
        })
    }

    pub fn snapshot(&self) -> Arc<GeoMap> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.snapshot().contains_key(ip)
    }

    pub fn get(&self, ip: &IpAddr) -> Option<GeoLocation> {
        self.snapshot().get(ip).map(|entry| entry.location.clone())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds entries for addresses not yet present and returns how many were added.
    pub(crate) async fn merge(&self, entries: Vec<GeoEntry>) -> usize {
        let _guard = self.inner.merge_lock.lock().await;

        let mut next = GeoMap::clone(&self.snapshot());
        let mut added = Vec::new();
        for entry in entries {
            if let Entry::Vacant(slot) = next.entry(entry.ip) {
                slot.insert(entry.clone());
                added.push(entry);
            }
        }

        if added.is_empty() {
            return 0;
        }

        *self.inner.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        debug!(added = added.len(); "Geolocation cache merged");

        let count = added.len();
        if let Some(pool) = &self.inner.store {
            persist(pool.clone(), added).await;
        }
        count
    }
}

async fn persist(pool: SqlitePool, entries: Vec<GeoEntry>) {
    let result = tokio::task::spawn_blocking(move || -> GeoDbResult<usize> {
        let conn = pool.get()?;
        let mut written = 0;
        for entry in &entries {
            if insert_geo_entry(&conn, entry)? {
                written += 1;
            }
        }
        Ok(written)
    })
    .await;

    match result {
        Ok(Ok(written)) => debug!(written = written; "Geolocation entries stored"),
        Ok(Err(e)) => warn!(error:% = e; "Failed to store geolocation entries"),
        Err(e) => warn!(error:% = e; "Geolocation store task failed"),
    }
}
