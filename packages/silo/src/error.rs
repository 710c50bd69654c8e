//! Error types for grain calls and the silo lifecycle.

use silo_core::{GrainId, SiloAddress};

/// Errors surfaced to grain callers.
///
/// Cloneable so one failure can be delivered to every queued caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrainError {
    #[error("Unknown grain type: {0}")]
    UnknownGrainType(String),

    #[error("Unknown method '{method}' on {grain}")]
    UnknownMethod { grain: GrainId, method: String },

    #[error("Grain {grain} failed to activate: {reason}")]
    ActivationFailed { grain: GrainId, reason: String },

    #[error("Grain {0} is deactivating")]
    Deactivating(GrainId),

    #[error("Call to {0} timed out")]
    Timeout(GrainId),

    #[error("No active silos available for placement")]
    NoActiveSilos,

    #[error("Too many forwards resolving {0}")]
    TooManyForwards(GrainId),

    #[error("Silo {0} is unavailable")]
    SiloUnavailable(SiloAddress),

    #[error("Inconsistent state for {key}: {message}")]
    InconsistentState { key: String, message: String },

    #[error("Unknown storage provider: {0}")]
    UnknownStorageProvider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Reminder error: {0}")]
    Reminder(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An error raised by grain code.
    #[error("{0}")]
    Application(String),
}

impl GrainError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    pub fn unknown_method(grain: &GrainId, method: &str) -> Self {
        Self::UnknownMethod {
            grain: grain.clone(),
            method: method.to_string(),
        }
    }
}

impl From<serde_json::Error> for GrainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors from starting, running or stopping a silo.
#[derive(Debug, thiserror::Error)]
pub enum SiloError {
    #[error("Silo {0} was declared dead by the cluster")]
    DeclaredDead(SiloAddress),

    #[error("Failed to spawn {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("Membership error: {0}")]
    Membership(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Silo is not running")]
    NotRunning,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Grain(#[from] GrainError),
}

impl SiloError {
    pub(crate) fn spawn(name: impl Into<String>, err: ractor::SpawnErr) -> Self {
        Self::Spawn {
            name: name.into(),
            reason: err.to_string(),
        }
    }
}
