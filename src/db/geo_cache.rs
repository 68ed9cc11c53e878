use std::net::IpAddr;

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, named_params};

use crate::db::{GeoDbError, GeoDbResult};
use crate::geo::{GeoEntry, GeoLocation};

/// Stores a resolved entry unless the address is already present.
///
/// Returns `true` when a row was written. Existing rows are never updated.
pub fn insert_geo_entry(conn: &Connection, entry: &GeoEntry) -> GeoDbResult<bool> {
    debug!(country = &*entry.location.country; "DB: Storing geolocation");

    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO geo_cache (
            ip,
            country,
            latitude,
            longitude,
            resolved_at
        ) VALUES (
            :ip,
            :country,
            :latitude,
            :longitude,
            :resolved_at
        )
        "#,
        named_params! {
            ":ip": entry.ip.to_string(),
            ":country": entry.location.country,
            ":latitude": entry.location.latitude,
            ":longitude": entry.location.longitude,
            ":resolved_at": entry.resolved_at,
        },
    )?;

    Ok(inserted > 0)
}

pub fn get_geo_entries(conn: &Connection) -> GeoDbResult<Vec<GeoEntry>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT ip, country, latitude, longitude, resolved_at
        FROM geo_cache
        ORDER BY resolved_at ASC
        "#,
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, DateTime<Utc>>(4)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (ip, country, latitude, longitude, resolved_at) = row?;
        let ip: IpAddr = ip
            .parse()
            .map_err(|e| GeoDbError::Decoding(format!("Invalid IP address '{}': {}", ip, e)))?;
        entries.push(GeoEntry {
            ip,
            location: GeoLocation {
                country,
                latitude,
                longitude,
            },
            resolved_at,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::db::init_db;

    fn entry(ip: &str, country: &str) -> GeoEntry {
        GeoEntry {
            ip: ip.parse().unwrap(),
            location: GeoLocation {
                country: country.to_string(),
                latitude: 52.37,
                longitude: 4.89,
            },
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn entries_are_written_once() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(temp_dir.path().join("geo.db")).unwrap();
        let conn = pool.get().unwrap();

        assert!(insert_geo_entry(&conn, &entry("1.2.3.4", "Netherlands")).unwrap());
        assert!(!insert_geo_entry(&conn, &entry("1.2.3.4", "Germany")).unwrap());

        let entries = get_geo_entries(&conn).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].location.country, "Netherlands");
    }

    #[test]
    fn ipv6_addresses_round_trip() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(temp_dir.path().join("nested").join("geo.db")).unwrap();
        let conn = pool.get().unwrap();

        insert_geo_entry(&conn, &entry("2001:db8::1", "Iceland")).unwrap();

        let entries = get_geo_entries(&conn).unwrap();
        assert_eq!(entries[0].ip, "2001:db8::1".parse::<IpAddr>().unwrap());
    }
}
