//! Error types for pixdex

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Partial failure: {0}")]
    PartialFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Description error: {0}")]
    Describe(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CatalogError {
    /// Map rusqlite errors, surfacing UNIQUE violations as their own variant
    /// so callers can distinguish a duplicate `file_path` from a broken store.
    pub fn from_sqlite(err: rusqlite::Error, context: &str) -> Self {
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if e.code == rusqlite::ErrorCode::ConstraintViolation {
                return CatalogError::ConstraintViolation(format!("{}: {}", context, err));
            }
        }
        CatalogError::Database(err)
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
