//! Membership agent actor: heartbeats, probes and death votes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use silo_core::{MembershipEntry, MembershipView, SiloAddress, SiloEvent, SiloStatus, Suspicion};
use tokio::sync::watch;

use super::{MembershipTable, votes_required};
use crate::error::SiloError;
use crate::messages::{CatalogMessage, MembershipMessage, ReminderMessage};
use crate::runtime::SiloRuntime;

/// Arguments for the membership agent.
pub(crate) struct MembershipArgs {
    pub runtime: Arc<SiloRuntime>,
    pub table: Arc<dyn MembershipTable>,
    pub view_tx: watch::Sender<MembershipView>,
    /// Set to `true` when the cluster declares this silo dead.
    pub declared_dead: watch::Sender<bool>,
}

/// State for the membership agent.
pub(crate) struct MembershipState {
    runtime: Arc<SiloRuntime>,
    table: Arc<dyn MembershipTable>,
    view_tx: watch::Sender<MembershipView>,
    declared_dead: watch::Sender<bool>,
    /// Status this silo last wrote for itself.
    status: SiloStatus,
    /// Consecutive failed probes per peer.
    missed_probes: HashMap<SiloAddress, u32>,
    /// Dead silos whose directory entries were already dropped.
    cleaned: HashSet<SiloAddress>,
}

impl MembershipState {
    fn silo(&self) -> &SiloAddress {
        &self.runtime.silo
    }

    fn silo_name(&self) -> String {
        self.runtime
            .config
            .endpoint
            .silo_name
            .clone()
            .unwrap_or_else(|| self.silo().endpoint())
    }

    async fn join(&mut self) -> Result<(), SiloError> {
        let mut entry = MembershipEntry::new(self.silo().clone(), self.silo_name());
        entry.status = SiloStatus::Joining;
        self.table.upsert_entry(&entry).await?;
        self.change_status(SiloStatus::Joining).await;

        self.table.set_status(self.silo(), SiloStatus::Active).await?;
        self.change_status(SiloStatus::Active).await;
        self.refresh_view().await?;

        tracing::info!("Silo {} joined cluster {}", self.silo(), self.runtime.config.cluster.cluster_id);
        Ok(())
    }

    async fn change_status(&mut self, status: SiloStatus) {
        let old_status = std::mem::replace(&mut self.status, status);
        self.runtime.emit(SiloEvent::SiloStatusChanged {
            silo: self.silo().clone(),
            old_status,
            new_status: status,
            timestamp: Utc::now(),
        });
    }

    /// Re-read the table, publish the view and drop entries of dead silos.
    async fn refresh_view(&mut self) -> Result<MembershipView, SiloError> {
        let view = self.table.read_all().await?;

        for dead in view.dead_silos() {
            if &dead != self.silo() && self.cleaned.insert(dead.clone()) {
                self.drop_silo(&dead).await;
            }
        }

        let previous = self.view_tx.send_replace(view.clone());
        if previous.version != view.version
            && let Some(endpoint) = self.runtime.fabric.get(self.silo())
        {
            // Reminder ownership follows the set of active silos
            let _ = endpoint.reminders.send_message(ReminderMessage::Refresh);
        }
        Ok(view)
    }

    async fn drop_silo(&mut self, silo: &SiloAddress) {
        self.missed_probes.remove(silo);
        self.runtime.cache.invalidate_silo(silo);
        match self.runtime.directory.unregister_silo(silo).await {
            Ok(removed) => {
                tracing::info!("Dropped {} directory entries of dead silo {}", removed, silo)
            }
            Err(e) => tracing::warn!("Failed to drop directory entries of {}: {}", silo, e),
        }
    }

    /// Check if the table says this silo is dead without us having left.
    fn is_declared_dead(&self, view: &MembershipView) -> bool {
        self.status != SiloStatus::Dead && view.status_of(self.silo()) == Some(SiloStatus::Dead)
    }

    async fn heartbeat(&mut self) -> Result<bool, SiloError> {
        self.table.update_i_am_alive(self.silo(), Utc::now()).await?;
        let view = self.refresh_view().await?;

        let cleanup = self.runtime.config.membership.defunct_silo_cleanup;
        if let Ok(cleanup) = chrono::Duration::from_std(cleanup) {
            self.table.clean_dead(Utc::now() - cleanup).await?;
        }

        Ok(self.is_declared_dead(&view))
    }

    async fn ping(&self, peer: &SiloAddress, timeout: Duration) -> bool {
        let Some(endpoint) = self.runtime.fabric.get(peer) else {
            return false;
        };
        matches!(
            ractor::rpc::call(&endpoint.catalog, |reply| CatalogMessage::Ping { reply }, Some(timeout))
                .await,
            Ok(CallResult::Success(ref answered)) if answered == peer
        )
    }

    async fn probe(&mut self) -> Result<(), SiloError> {
        let options = self.runtime.config.membership.clone();
        let expiration = chrono::Duration::from_std(options.death_vote_expiration)
            .unwrap_or(chrono::Duration::MAX);
        let view = self.runtime.view();
        let active = view.active_silos().len();

        for peer in view.entries.iter().filter(|e| e.status.is_active()) {
            if &peer.silo == self.silo() {
                continue;
            }

            let missed = if self.ping(&peer.silo, options.probe_timeout).await {
                self.missed_probes.remove(&peer.silo);
                0
            } else {
                let missed = self.missed_probes.entry(peer.silo.clone()).or_insert(0);
                *missed += 1;
                tracing::debug!("Probe of {} failed ({} in a row)", peer.silo, missed);
                *missed
            };

            let stale = peer.is_stale(Utc::now(), expiration);
            if missed >= options.num_missed_probes_limit || stale {
                self.suspect(&peer.silo, active, expiration).await?;
            }
        }
        Ok(())
    }

    async fn suspect(
        &mut self,
        peer: &SiloAddress,
        active: usize,
        expiration: chrono::Duration,
    ) -> Result<(), SiloError> {
        let now = Utc::now();
        let suspicion = Suspicion {
            by: self.silo().clone(),
            at: now,
        };
        let entry = self.table.add_suspicion(peer, &suspicion).await?;
        if entry.status == SiloStatus::Dead {
            return Ok(());
        }

        let votes = entry.fresh_suspecters(now, expiration).len();
        let required = votes_required(self.runtime.config.membership.num_votes_for_death, active);
        tracing::warn!("Suspecting {} ({}/{} votes)", peer, votes, required);
        if votes < required {
            return Ok(());
        }

        self.table.set_status(peer, SiloStatus::Dead).await?;
        tracing::warn!("Declared silo {} dead", peer);
        self.runtime.emit(SiloEvent::SiloDeclaredDead {
            silo: peer.clone(),
            by: self.silo().clone(),
            timestamp: now,
        });
        self.runtime.emit(SiloEvent::SiloStatusChanged {
            silo: peer.clone(),
            old_status: entry.status,
            new_status: SiloStatus::Dead,
            timestamp: now,
        });
        self.refresh_view().await?;
        Ok(())
    }

    /// Stop serving after the cluster voted this silo dead.
    fn stop_declared_dead(&mut self, myself: &ActorRef<MembershipMessage>) {
        tracing::error!("Silo {} was declared dead by the cluster", self.silo());
        self.status = SiloStatus::Dead;
        self.runtime.emit(SiloEvent::SiloStatusChanged {
            silo: self.silo().clone(),
            old_status: SiloStatus::Active,
            new_status: SiloStatus::Dead,
            timestamp: Utc::now(),
        });

        if let Some(endpoint) = self.runtime.fabric.get(self.silo()) {
            self.runtime.fabric.unregister(self.silo());
            endpoint.reminders.stop(Some("declared dead".to_string()));
            endpoint.catalog.stop(Some("declared dead".to_string()));
        }
        self.declared_dead.send_replace(true);
        myself.stop(Some("declared dead".to_string()));
    }
}

fn spawn_ticker(myself: ActorRef<MembershipMessage>, period: Duration, message: fn() -> MembershipMessage) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            if myself.send_message(message()).is_err() {
                break;
            }
        }
    });
}

/// The membership agent.
pub(crate) struct MembershipAgent;

impl Actor for MembershipAgent {
    type Msg = MembershipMessage;
    type State = MembershipState;
    type Arguments = MembershipArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let options = &args.runtime.config.membership;
        spawn_ticker(myself.clone(), options.i_am_alive_period, || MembershipMessage::Heartbeat);
        spawn_ticker(myself, options.probe_period, || MembershipMessage::Probe);

        Ok(MembershipState {
            runtime: args.runtime,
            table: args.table,
            view_tx: args.view_tx,
            declared_dead: args.declared_dead,
            status: SiloStatus::Created,
            missed_probes: HashMap::new(),
            cleaned: HashSet::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            MembershipMessage::Join { reply } => {
                let _ = reply.send(state.join().await);
            }

            MembershipMessage::Heartbeat => {
                if !state.status.is_active() {
                    return Ok(());
                }
                match state.heartbeat().await {
                    Ok(true) => state.stop_declared_dead(&myself),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Heartbeat of {} failed: {}", state.silo(), e),
                }
            }

            MembershipMessage::Probe => {
                if !state.status.is_active() {
                    return Ok(());
                }
                if let Err(e) = state.probe().await {
                    tracing::warn!("Probing from {} failed: {}", state.silo(), e);
                }
            }

            MembershipMessage::SetStatus { status, reply } => {
                let result = match state.table.set_status(state.silo(), status).await {
                    Ok(_) => {
                        state.change_status(status).await;
                        state.refresh_view().await.map(|_| ())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
        }

        Ok(())
    }
}
