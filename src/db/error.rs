use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoDbError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] r2d2::Error),

    #[error("Database execution error: {0}")]
    Rusqlite(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// Convenience alias
pub type GeoDbResult<T> = Result<T, GeoDbError>;
