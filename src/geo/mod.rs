//! Peer geolocation: an HTTP lookup provider, an append-only cache, and the
//! staggered enrichment batch that fills it.

mod cache;
mod enricher;
mod lookup;

pub use cache::{GeoCache, GeoEntry, GeoMap};
pub use enricher::{DEFAULT_STAGGER, Enricher};
pub use lookup::{DEFAULT_PROVIDER_URL, GeoLocation, GeoLookup, GeoLookupError, HttpGeoLookup};
