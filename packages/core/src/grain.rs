//! Grain identity types.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::SiloAddress;

/// Name of a registered grain type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrainType(String);

impl GrainType {
    /// Create a grain type from its registered name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GrainType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for GrainType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for GrainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a grain: its type plus an application key.
///
/// A grain id is valid regardless of whether the grain is currently active;
/// the runtime activates it on the first message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrainId {
    pub grain_type: GrainType,
    pub key: String,
}

impl GrainId {
    pub fn new(grain_type: impl Into<GrainType>, key: impl Into<String>) -> Self {
        Self {
            grain_type: grain_type.into(),
            key: key.into(),
        }
    }

    /// Parse a grain id from its `type/key` form.
    ///
    /// The key may itself contain `/`; only the first separator splits.
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let (grain_type, key) = s
            .split_once('/')
            .ok_or_else(|| IdParseError::MissingSeparator(s.to_string()))?;
        if grain_type.is_empty() || key.is_empty() {
            return Err(IdParseError::Empty(s.to_string()));
        }
        Ok(Self::new(grain_type, key))
    }
}

impl std::fmt::Display for GrainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.grain_type, self.key)
    }
}

/// Unique identifier for one activation of a grain, using ULID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationId(pub Ulid);

impl ActivationId {
    /// Create a new unique activation ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse an activation ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActivationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory record: where a grain is currently activated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrainAddress {
    pub grain: GrainId,
    pub silo: SiloAddress,
    pub activation: ActivationId,
}

impl GrainAddress {
    /// Address for a brand new activation on `silo`.
    pub fn new_activation(grain: GrainId, silo: SiloAddress) -> Self {
        Self {
            grain,
            silo,
            activation: ActivationId::new(),
        }
    }

    /// Check if two addresses refer to the same activation.
    pub fn matches(&self, other: &GrainAddress) -> bool {
        self.grain == other.grain && self.silo == other.silo && self.activation == other.activation
    }
}

impl std::fmt::Display for GrainAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.grain, self.silo, self.activation)
    }
}

/// Why an activation left memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    /// Idle longer than the collection age.
    IdleCollected,
    /// The grain (or an operator) asked for it.
    Requested,
    /// `on_activate` returned an error.
    ActivationFailed,
    /// The hosting silo is shutting down.
    SiloShutdown,
    /// Another activation won the directory registration.
    DuplicateActivation,
}

impl std::fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeactivationReason::IdleCollected => write!(f, "idle_collected"),
            DeactivationReason::Requested => write!(f, "requested"),
            DeactivationReason::ActivationFailed => write!(f, "activation_failed"),
            DeactivationReason::SiloShutdown => write!(f, "silo_shutdown"),
            DeactivationReason::DuplicateActivation => write!(f, "duplicate_activation"),
        }
    }
}

/// Errors parsing identities from their string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("missing '/' separator in grain id: {0}")]
    MissingSeparator(String),

    #[error("empty grain type or key in: {0}")]
    Empty(String),

    #[error("invalid silo address: {0}")]
    InvalidSilo(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grain_id_display_and_parse() {
        let id = GrainId::new("counter", "alice/main");
        assert_eq!(id.to_string(), "counter/alice/main");

        let parsed = GrainId::parse("counter/alice/main").expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn grain_id_parse_rejects_malformed() {
        assert!(matches!(
            GrainId::parse("counter"),
            Err(IdParseError::MissingSeparator(_))
        ));
        assert!(matches!(GrainId::parse("/alice"), Err(IdParseError::Empty(_))));
        assert!(matches!(GrainId::parse("counter/"), Err(IdParseError::Empty(_))));
    }

    #[test]
    fn addresses_match_only_same_activation() {
        let silo = SiloAddress::new("127.0.0.1", 11111);
        let grain = GrainId::new("counter", "a");
        let first = GrainAddress::new_activation(grain.clone(), silo.clone());
        let second = GrainAddress::new_activation(grain, silo);
        assert!(first.matches(&first.clone()));
        assert!(!first.matches(&second));
    }
}
