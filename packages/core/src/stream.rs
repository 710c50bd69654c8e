//! Stream identity and item envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a pub/sub stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub namespace: String,
    pub key: String,
}

impl StreamId {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// An item published to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    pub stream: StreamId,
    /// Per-stream sequence, assigned by the publishing silo.
    pub sequence: u64,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}
