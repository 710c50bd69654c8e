//! Placement: which silo hosts a new activation.

use std::sync::Arc;
use std::time::Duration;

use ractor::rpc::CallResult;
use serde::{Deserialize, Serialize};
use silo_core::{GrainId, SiloAddress};

use crate::error::GrainError;
use crate::fabric::Fabric;
use crate::hashing::rendezvous_owner;
use crate::messages::CatalogMessage;

/// How a grain type chooses a silo for new activations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// Uniformly random active silo.
    #[default]
    Random,
    /// The calling silo when it is active.
    PreferLocal,
    /// Deterministic silo chosen by hashing the grain id.
    HashBased,
    /// The silo with the fewest activations.
    ActivationCountBased,
}

/// Picks silos for new activations.
pub(crate) struct PlacementDirector {
    local: SiloAddress,
    fabric: Arc<Fabric>,
    /// Per-silo timeout when asking for activation counts.
    timeout: Duration,
}

impl PlacementDirector {
    pub fn new(local: SiloAddress, fabric: Arc<Fabric>, timeout: Duration) -> Self {
        Self {
            local,
            fabric,
            timeout,
        }
    }

    /// Choose a silo for `grain` among `active` silos.
    pub async fn place(
        &self,
        strategy: PlacementStrategy,
        grain: &GrainId,
        active: &[SiloAddress],
    ) -> Result<SiloAddress, GrainError> {
        let candidates: Vec<SiloAddress> = active
            .iter()
            .filter(|silo| self.fabric.contains(silo))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(GrainError::NoActiveSilos);
        }

        let chosen = match strategy {
            PlacementStrategy::Random => random_silo(&candidates),
            PlacementStrategy::PreferLocal => {
                if candidates.contains(&self.local) {
                    self.local.clone()
                } else {
                    random_silo(&candidates)
                }
            }
            PlacementStrategy::HashBased => rendezvous_owner(&grain.to_string(), &candidates)
                .cloned()
                .ok_or(GrainError::NoActiveSilos)?,
            PlacementStrategy::ActivationCountBased => self.least_loaded(&candidates).await,
        };

        tracing::trace!("Placing {} on {} ({:?})", grain, chosen, strategy);
        Ok(chosen)
    }

    /// Silo with the fewest activations. Silos that do not answer are skipped.
    async fn least_loaded(&self, candidates: &[SiloAddress]) -> SiloAddress {
        let mut best: Option<(usize, &SiloAddress)> = None;
        for silo in candidates {
            let Some(endpoint) = self.fabric.get(silo) else {
                continue;
            };
            let count = match ractor::rpc::call(
                &endpoint.catalog,
                |reply| CatalogMessage::Stats { reply },
                Some(self.timeout),
            )
            .await
            {
                Ok(CallResult::Success(stats)) => stats.activations,
                _ => continue,
            };
            if best.is_none_or(|(lowest, _)| count < lowest) {
                best = Some((count, silo));
            }
        }

        match best {
            Some((_, silo)) => silo.clone(),
            None => random_silo(candidates),
        }
    }
}

fn random_silo(candidates: &[SiloAddress]) -> SiloAddress {
    let index = rand::random_range(0..candidates.len());
    candidates[index].clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silo(port: u16) -> SiloAddress {
        SiloAddress::new("127.0.0.1", port).with_generation(1)
    }

    #[tokio::test]
    async fn no_reachable_silos_is_an_error() {
        let director = PlacementDirector::new(silo(1), Arc::new(Fabric::new()), Duration::from_secs(1));
        let grain = GrainId::new("counter", "a");

        let result = director
            .place(PlacementStrategy::Random, &grain, &[silo(1), silo(2)])
            .await;
        assert_eq!(result, Err(GrainError::NoActiveSilos));

        let result = director.place(PlacementStrategy::HashBased, &grain, &[]).await;
        assert_eq!(result, Err(GrainError::NoActiveSilos));
    }

    #[test]
    fn strategy_names_are_snake_case() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_string(&PlacementStrategy::ActivationCountBased)?,
            "\"activation_count_based\""
        );
        let parsed: PlacementStrategy = serde_json::from_str("\"prefer_local\"")?;
        assert_eq!(parsed, PlacementStrategy::PreferLocal);
        Ok(())
    }
}
