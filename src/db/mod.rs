use std::fs;
use std::path::Path;

use include_dir::{Dir, include_dir};
use log::info;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite_migration::Migrations;

mod error;
pub use error::{GeoDbError, GeoDbResult};

mod geo_cache;
pub use geo_cache::{get_geo_entries, insert_geo_entry};

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

const MAX_CONNECTIONS: u32 = 4;

pub fn init_db(db_path: impl AsRef<Path>) -> GeoDbResult<SqlitePool> {
    let path = db_path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path);
    let pool = r2d2::Pool::builder().max_size(MAX_CONNECTIONS).build(manager)?;

    let mut conn = pool.get()?;
    let migrations = Migrations::from_directory(&MIGRATIONS_DIR)?;
    migrations.to_latest(&mut conn)?;

    info!(path:% = path.display(); "Geolocation cache database ready");
    Ok(pool)
}
