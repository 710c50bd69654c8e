//! Persisted grain state envelope.

use serde::{Deserialize, Serialize};

/// Grain state together with its version token.
///
/// `etag` is `None` until the state has been written once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrainState<T> {
    pub etag: Option<String>,
    pub data: T,
}

impl<T> GrainState<T> {
    pub fn new(data: T) -> Self {
        Self { etag: None, data }
    }

    /// Check if this state has ever been persisted.
    pub fn record_exists(&self) -> bool {
        self.etag.is_some()
    }

    /// Generate a fresh etag value.
    pub fn next_etag() -> String {
        ulid::Ulid::new().to_string()
    }
}
