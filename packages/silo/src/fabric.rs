//! Fabric: how silos in one process reach each other.
//!
//! Each running silo publishes the actors its peers talk to. Membership
//! probes, grain routing and reminder notifications all go through it.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use ractor::ActorRef;
use silo_core::SiloAddress;

use crate::messages::{CatalogMessage, ReminderMessage};

/// Actors a silo exposes to its peers.
#[derive(Debug, Clone)]
pub struct SiloEndpoint {
    pub catalog: ActorRef<CatalogMessage>,
    pub reminders: ActorRef<ReminderMessage>,
}

/// Table of reachable silos.
#[derive(Debug, Default)]
pub struct Fabric {
    silos: RwLock<HashMap<SiloAddress, SiloEndpoint>>,
}

impl Fabric {
    /// Create a new empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide fabric.
    pub fn global() -> Arc<Fabric> {
        GLOBAL_FABRIC.clone()
    }

    /// Make `silo` reachable.
    pub fn register(&self, silo: SiloAddress, endpoint: SiloEndpoint) {
        tracing::debug!("Silo {} joined the fabric", silo);
        self.silos.write().insert(silo, endpoint);
    }

    /// Make `silo` unreachable.
    pub fn unregister(&self, silo: &SiloAddress) -> bool {
        let removed = self.silos.write().remove(silo).is_some();
        if removed {
            tracing::debug!("Silo {} left the fabric", silo);
        }
        removed
    }

    /// Get the endpoint of `silo`.
    pub fn get(&self, silo: &SiloAddress) -> Option<SiloEndpoint> {
        self.silos.read().get(silo).cloned()
    }

    pub fn contains(&self, silo: &SiloAddress) -> bool {
        self.silos.read().contains_key(silo)
    }

    /// List all reachable silos.
    pub fn silos(&self) -> Vec<SiloAddress> {
        let mut silos: Vec<SiloAddress> = self.silos.read().keys().cloned().collect();
        silos.sort();
        silos
    }
}

static GLOBAL_FABRIC: LazyLock<Arc<Fabric>> = LazyLock::new(|| Arc::new(Fabric::new()));
