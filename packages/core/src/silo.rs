//! Silo addresses and the cluster membership model.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::IdParseError;

/// Network identity of a silo.
///
/// `generation` is the start time in epoch milliseconds, so a silo restarted
/// on the same endpoint gets a distinct address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiloAddress {
    pub host: String,
    pub port: u16,
    pub generation: i64,
}

impl SiloAddress {
    /// Create an address for a silo starting now.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            generation: Utc::now().timestamp_millis(),
        }
    }

    /// Set an explicit generation.
    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    /// Endpoint without the generation, e.g. `127.0.0.1:11111`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse the `host:port@generation` form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let invalid = || IdParseError::InvalidSilo(s.to_string());
        let (endpoint, generation) = s.rsplit_once('@').ok_or_else(invalid)?;
        let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port: port.parse().map_err(|_| invalid())?,
            generation: generation.parse().map_err(|_| invalid())?,
        })
    }
}

impl std::fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.host, self.port, self.generation)
    }
}

/// Lifecycle status of a silo in the membership table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiloStatus {
    /// Built but not yet joining.
    #[default]
    Created,
    /// Announced itself, not yet serving.
    Joining,
    /// Serving requests.
    Active,
    /// Draining activations before leaving.
    ShuttingDown,
    /// Left the cluster or declared dead by its peers.
    Dead,
}

impl SiloStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SiloStatus::Active)
    }

    /// Check if the silo is leaving or gone.
    pub fn is_terminating(self) -> bool {
        matches!(self, SiloStatus::ShuttingDown | SiloStatus::Dead)
    }
}

impl std::fmt::Display for SiloStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiloStatus::Created => write!(f, "created"),
            SiloStatus::Joining => write!(f, "joining"),
            SiloStatus::Active => write!(f, "active"),
            SiloStatus::ShuttingDown => write!(f, "shutting_down"),
            SiloStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A vote from one silo that another may be dead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspicion {
    pub by: SiloAddress,
    pub at: DateTime<Utc>,
}

/// One row of the membership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    pub silo: SiloAddress,
    /// Human-readable silo name.
    pub name: String,
    pub status: SiloStatus,
    pub start_time: DateTime<Utc>,
    /// Last heartbeat written by the silo itself.
    pub i_am_alive: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suspicions: Vec<Suspicion>,
}

impl MembershipEntry {
    /// Create a row for a silo that is starting now.
    pub fn new(silo: SiloAddress, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            silo,
            name: name.into(),
            status: SiloStatus::Created,
            start_time: now,
            i_am_alive: now,
            suspicions: Vec::new(),
        }
    }

    /// Distinct suspecting silos whose vote is younger than `expiration`.
    pub fn fresh_suspecters(&self, now: DateTime<Utc>, expiration: Duration) -> HashSet<SiloAddress> {
        self.suspicions
            .iter()
            .filter(|s| now - s.at <= expiration)
            .map(|s| s.by.clone())
            .collect()
    }

    /// Check if the heartbeat is older than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.i_am_alive > max_age
    }
}

/// A versioned snapshot of the membership table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipView {
    pub version: u64,
    pub entries: Vec<MembershipEntry>,
}

impl MembershipView {
    /// Active silos, sorted for deterministic iteration.
    pub fn active_silos(&self) -> Vec<SiloAddress> {
        let mut silos: Vec<SiloAddress> = self
            .entries
            .iter()
            .filter(|e| e.status.is_active())
            .map(|e| e.silo.clone())
            .collect();
        silos.sort();
        silos
    }

    pub fn status_of(&self, silo: &SiloAddress) -> Option<SiloStatus> {
        self.entries
            .iter()
            .find(|e| &e.silo == silo)
            .map(|e| e.status)
    }

    pub fn is_active(&self, silo: &SiloAddress) -> bool {
        self.status_of(silo).is_some_and(SiloStatus::is_active)
    }

    /// Silos marked `Dead` in this view.
    pub fn dead_silos(&self) -> Vec<SiloAddress> {
        self.entries
            .iter()
            .filter(|e| e.status == SiloStatus::Dead)
            .map(|e| e.silo.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silo_address_round_trips_through_display() {
        let silo = SiloAddress::new("10.0.0.7", 11111).with_generation(42);
        assert_eq!(silo.to_string(), "10.0.0.7:11111@42");
        assert_eq!(SiloAddress::parse("10.0.0.7:11111@42").expect("parse"), silo);
        assert!(SiloAddress::parse("10.0.0.7:11111").is_err());
        assert!(SiloAddress::parse(":1@1").is_err());
    }

    #[test]
    fn fresh_suspecters_are_distinct_and_unexpired() {
        let now = Utc::now();
        let a = SiloAddress::new("a", 1).with_generation(1);
        let b = SiloAddress::new("b", 1).with_generation(1);
        let mut entry = MembershipEntry::new(SiloAddress::new("c", 1), "c");
        entry.suspicions = vec![
            Suspicion { by: a.clone(), at: now },
            Suspicion { by: a.clone(), at: now },
            Suspicion { by: b, at: now - Duration::seconds(600) },
        ];

        let voters = entry.fresh_suspecters(now, Duration::seconds(120));
        assert_eq!(voters.len(), 1);
        assert!(voters.contains(&a));
    }

    #[test]
    fn view_lists_only_active_silos() {
        let mut active = MembershipEntry::new(SiloAddress::new("b", 1).with_generation(1), "b");
        active.status = SiloStatus::Active;
        let mut dead = MembershipEntry::new(SiloAddress::new("a", 1).with_generation(1), "a");
        dead.status = SiloStatus::Dead;

        let view = MembershipView {
            version: 3,
            entries: vec![dead.clone(), active.clone()],
        };
        assert_eq!(view.active_silos(), vec![active.silo.clone()]);
        assert_eq!(view.dead_silos(), vec![dead.silo.clone()]);
        assert!(view.is_active(&active.silo));
        assert!(!view.is_active(&dead.silo));
    }
}
