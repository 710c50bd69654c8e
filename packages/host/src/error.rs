//! Host startup and run errors.

use silo::{GrainError, SiloError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Object storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Grain error: {0}")]
    Grain(#[from] GrainError),

    #[error("Silo error: {0}")]
    Silo(#[from] SiloError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
