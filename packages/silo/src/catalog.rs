//! Catalog actor: the activation table of one silo.
//!
//! Every activation is a child of the catalog, so termination and panics
//! reach `handle_supervisor_evt`, which keeps the table and the directory
//! in sync.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use ractor::concurrency::JoinHandle;
use ractor::{
    Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, ActorStatus, RpcReplyPort,
    SupervisionEvent,
};
use silo_core::{DeactivationReason, GrainAddress, GrainId, SiloAddress, SiloStatus};

use crate::activation::{ActivationHandle, ActivationSeed};
use crate::client::MAX_FORWARD_COUNT;
use crate::error::GrainError;
use crate::messages::{ActivationTarget, CatalogMessage, CatalogStats, GrainMessage};
use crate::runtime::SiloRuntime;

/// One row of the activation table.
struct ActivationEntry {
    address: GrainAddress,
    actor: ActorRef<GrainMessage>,
    handle: Arc<ActivationHandle>,
    join: Option<JoinHandle<()>>,
}

impl ActivationEntry {
    fn is_stopping(&self) -> bool {
        self.handle.is_deactivating()
            || matches!(
                self.actor.get_status(),
                ActorStatus::Stopping | ActorStatus::Stopped
            )
    }
}

/// State for the catalog actor.
pub(crate) struct CatalogState {
    runtime: Arc<SiloRuntime>,
    activations: HashMap<GrainId, ActivationEntry>,
    by_actor: HashMap<ActorId, GrainId>,
    /// Cleared once shutdown starts; no new activations after that.
    accepting: bool,
}

impl CatalogState {
    fn new(runtime: Arc<SiloRuntime>) -> Self {
        Self {
            runtime,
            activations: HashMap::new(),
            by_actor: HashMap::new(),
            accepting: true,
        }
    }

    fn silo(&self) -> &SiloAddress {
        &self.runtime.silo
    }

    /// Check if an activation on `silo` can still be reached.
    fn is_live(&self, silo: &SiloAddress) -> bool {
        self.runtime.fabric.contains(silo)
            && self.runtime.view().status_of(silo) != Some(SiloStatus::Dead)
    }

    fn redirect(
        &self,
        grain: &GrainId,
        owner: GrainAddress,
        forward_count: u8,
    ) -> Result<ActivationTarget, GrainError> {
        if forward_count >= MAX_FORWARD_COUNT {
            return Err(GrainError::TooManyForwards(grain.clone()));
        }
        self.runtime.cache.put(owner.clone());
        Ok(ActivationTarget::Redirect(owner))
    }

    async fn get_or_activate(
        &mut self,
        myself: &ActorRef<CatalogMessage>,
        grain: GrainId,
        forward_count: u8,
    ) -> Result<ActivationTarget, GrainError> {
        if let Some(entry) = self.activations.get(&grain) {
            if let Some(failure) = entry.handle.failure() {
                return Err(failure);
            }
            if entry.is_stopping() {
                return Err(GrainError::Deactivating(grain));
            }
            return Ok(ActivationTarget::Local {
                actor: entry.actor.clone(),
                address: entry.address.clone(),
            });
        }

        let factory = self
            .runtime
            .registry
            .get(&grain.grain_type)
            .ok_or_else(|| GrainError::UnknownGrainType(grain.grain_type.to_string()))?;

        if !self.accepting {
            return Err(GrainError::SiloUnavailable(self.silo().clone()));
        }

        let directory = self.runtime.directory.clone();
        if let Some(existing) = directory.lookup(&grain).await? {
            if &existing.silo != self.silo() && self.is_live(&existing.silo) {
                return self.redirect(&grain, existing, forward_count);
            }
            // Left behind by a dead silo or an earlier activation here
            tracing::debug!("Removing stale directory entry {}", existing);
            directory.unregister(&existing).await?;
            self.runtime.cache.invalidate(&grain);
        }

        let address = GrainAddress::new_activation(grain.clone(), self.silo().clone());
        let mut winner = directory.register(&address).await?;
        if winner.activation != address.activation {
            if self.is_live(&winner.silo) && &winner.silo != self.silo() {
                return self.redirect(&grain, winner, forward_count);
            }
            directory.unregister(&winner).await?;
            winner = directory.register(&address).await?;
            if winner.activation != address.activation {
                return self.redirect(&grain, winner, forward_count);
            }
        }

        let handle = Arc::new(ActivationHandle::new());
        let seed = ActivationSeed {
            address: address.clone(),
            runtime: self.runtime.clone(),
            handle: handle.clone(),
        };

        let (actor, join) = match factory.spawn(seed, myself.get_cell()).await {
            Ok(spawned) => spawned,
            Err(e) => {
                if let Err(err) = directory.unregister(&address).await {
                    tracing::warn!("Failed to unregister {}: {}", address, err);
                }
                return Err(GrainError::ActivationFailed {
                    grain,
                    reason: e.to_string(),
                });
            }
        };

        self.by_actor.insert(actor.get_id(), grain.clone());
        self.activations.insert(
            grain,
            ActivationEntry {
                address: address.clone(),
                actor: actor.clone(),
                handle,
                join: Some(join),
            },
        );
        self.runtime.cache.put(address.clone());

        Ok(ActivationTarget::Local { actor, address })
    }

    /// Answer with `target` once its activation has finished `on_activate`.
    ///
    /// Waiting happens off the catalog so other grains keep activating.
    fn reply_when_ready(
        &self,
        grain: GrainId,
        target: ActivationTarget,
        reply: RpcReplyPort<Result<ActivationTarget, GrainError>>,
    ) {
        let Some(handle) = self.activations.get(&grain).map(|entry| entry.handle.clone()) else {
            let _ = reply.send(Ok(target));
            return;
        };
        match handle.outcome() {
            Some(Ok(())) => {
                let _ = reply.send(Ok(target));
            }
            Some(Err(failure)) => {
                let _ = reply.send(Err(failure));
            }
            None => {
                let timeout = self.runtime.config.messaging.response_timeout;
                tokio::spawn(async move {
                    let result = match tokio::time::timeout(timeout, handle.ready()).await {
                        Ok(Ok(())) => Ok(target),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(GrainError::Timeout(grain)),
                    };
                    let _ = reply.send(result);
                });
            }
        }
    }

    fn stats(&self) -> CatalogStats {
        let mut by_type = BTreeMap::new();
        for grain in self.activations.keys() {
            *by_type.entry(grain.grain_type.to_string()).or_insert(0) += 1;
        }
        CatalogStats {
            activations: self.activations.len(),
            by_type,
        }
    }

    async fn deactivate_all(&mut self, reason: DeactivationReason) -> usize {
        self.accepting = false;
        let count = self.activations.len();
        tracing::info!("Deactivating {} activations on {}", count, self.silo());

        let mut joins = Vec::with_capacity(count);
        let mut addresses = Vec::with_capacity(count);
        for (_, mut entry) in self.activations.drain() {
            let _ = entry.actor.send_message(GrainMessage::Deactivate { reason });
            if let Some(join) = entry.join.take() {
                joins.push(join);
            }
            addresses.push(entry.address);
        }
        self.by_actor.clear();

        let timeout = self.runtime.config.messaging.response_timeout;
        if tokio::time::timeout(timeout, futures_util::future::join_all(joins))
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for activations on {} to stop", self.silo());
        }

        for address in &addresses {
            if let Err(e) = self.runtime.directory.unregister(address).await {
                tracing::warn!("Failed to unregister {}: {}", address, e);
            }
            self.runtime.cache.invalidate(&address.grain);
        }

        count
    }

    fn collect_idle(&mut self) -> usize {
        let age = self.runtime.config.collection.collection_age;
        let Ok(age) = chrono::Duration::from_std(age) else {
            return 0;
        };
        let now = Utc::now();

        let mut collected = 0;
        for entry in self.activations.values() {
            if entry.is_stopping() || now - entry.handle.last_used() <= age {
                continue;
            }
            entry.handle.mark_deactivating();
            let deactivate = GrainMessage::Deactivate {
                reason: DeactivationReason::IdleCollected,
            };
            if entry.actor.send_message(deactivate).is_ok() {
                collected += 1;
            }
        }
        collected
    }

    /// Deactivate local activations the directory no longer points at.
    ///
    /// Happens when a peer dropped this silo's entries while the view was
    /// stale and the grain was activated again elsewhere.
    async fn evict_duplicates(&mut self) -> usize {
        let local: Vec<(GrainAddress, ActorRef<GrainMessage>, Arc<ActivationHandle>)> = self
            .activations
            .values()
            .filter(|entry| !entry.is_stopping() && !entry.handle.is_pending())
            .map(|entry| (entry.address.clone(), entry.actor.clone(), entry.handle.clone()))
            .collect();

        let mut evicted = 0;
        for (address, actor, handle) in local {
            let registered = match self.runtime.directory.lookup(&address.grain).await {
                Ok(Some(registered)) => registered,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Failed to check directory entry of {}: {}", address, e);
                    continue;
                }
            };
            if registered.activation == address.activation || !self.is_live(&registered.silo) {
                continue;
            }

            tracing::warn!("Duplicate activation {}, directory points at {}", address, registered);
            handle.mark_deactivating();
            let deactivate = GrainMessage::Deactivate {
                reason: DeactivationReason::DuplicateActivation,
            };
            if actor.send_message(deactivate).is_ok() {
                evicted += 1;
            }
        }
        evicted
    }

    /// Forget an activation whose actor stopped.
    async fn remove_actor(&mut self, cell: &ActorCell) {
        let Some(grain) = self.by_actor.remove(&cell.get_id()) else {
            return;
        };
        let Some(entry) = self.activations.remove(&grain) else {
            return;
        };
        entry.handle.failed(GrainError::ActivationFailed {
            grain: grain.clone(),
            reason: "activation stopped before it was ready".to_string(),
        });

        if let Err(e) = self.runtime.directory.unregister(&entry.address).await {
            tracing::warn!("Failed to unregister {}: {}", entry.address, e);
        }
        self.runtime.cache.invalidate(&grain);
    }
}

/// The catalog actor.
pub(crate) struct Catalog;

impl Actor for Catalog {
    type Msg = CatalogMessage;
    type State = CatalogState;
    type Arguments = Arc<SiloRuntime>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        runtime: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting catalog for {}", runtime.silo);

        let quantum = runtime.config.collection.collection_quantum;
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(quantum);
            interval.tick().await;
            loop {
                interval.tick().await;
                if myself_clone.send_message(CatalogMessage::CollectIdle).is_err() {
                    break;
                }
            }
        });

        Ok(CatalogState::new(runtime))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CatalogMessage::GetOrActivate {
                grain,
                forward_count,
                reply,
            } => {
                match state.get_or_activate(&myself, grain.clone(), forward_count).await {
                    Ok(target @ ActivationTarget::Local { .. }) => {
                        state.reply_when_ready(grain, target, reply);
                    }
                    other => {
                        let _ = reply.send(other);
                    }
                }
            }

            CatalogMessage::Stats { reply } => {
                let _ = reply.send(state.stats());
            }

            CatalogMessage::Ping { reply } => {
                let _ = reply.send(state.silo().clone());
            }

            CatalogMessage::DeactivateAll { reason, reply } => {
                let count = state.deactivate_all(reason).await;
                let _ = reply.send(count);
            }

            CatalogMessage::CollectIdle => {
                let collected = state.collect_idle();
                if collected > 0 {
                    tracing::info!("Collecting {} idle activations on {}", collected, state.silo());
                }
                let evicted = state.evict_duplicates().await;
                if evicted > 0 {
                    tracing::info!("Evicting {} duplicate activations on {}", evicted, state.silo());
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!(
                    "Activation actor {} terminated: {}",
                    cell.get_id(),
                    reason.unwrap_or_default()
                );
                state.remove_actor(&cell).await;
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::warn!("Activation actor {} failed: {}", cell.get_id(), err);
                state.remove_actor(&cell).await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for entry in state.activations.values() {
            entry.actor.stop(Some("catalog stopped".to_string()));
        }
        tracing::info!("Catalog for {} stopped", state.silo());
        Ok(())
    }
}
