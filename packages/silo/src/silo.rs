//! Silo builder and running silo handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ractor::concurrency::JoinHandle;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};
use silo_core::{
    DeactivationReason, GrainId, MembershipView, SiloAddress, SiloEvent, SiloStatus, StreamItem,
};
use tokio::sync::{broadcast, watch};

use crate::catalog::Catalog;
use crate::client::GrainClient;
use crate::config::SiloConfig;
use crate::directory::{GrainDirectory, InMemoryGrainDirectory};
use crate::error::SiloError;
use crate::fabric::{Fabric, SiloEndpoint};
use crate::grain::Grain;
use crate::membership::{InMemoryMembershipTable, MembershipAgent, MembershipArgs, MembershipTable};
use crate::messages::{CatalogMessage, CatalogStats, MembershipMessage, ReminderMessage};
use crate::persistence::{DEFAULT_STORAGE_PROVIDER, GrainStorage, MemoryGrainStorage, StorageProviders};
use crate::registry::GrainRegistry;
use crate::reminders::{InMemoryReminderTable, ReminderService, ReminderTable};
use crate::runtime::SiloRuntime;
use crate::streams::{InMemoryStreamPubSub, StreamProvider, StreamPubSub};

/// Configures and starts a silo.
///
/// Tables default to fresh in-memory instances, which is only useful for a
/// single silo. Silos of one cluster must share the directory, membership
/// table, reminder table, stream subscriptions and fabric.
pub struct SiloBuilder {
    config: SiloConfig,
    fabric: Option<Arc<Fabric>>,
    directory: Option<Arc<dyn GrainDirectory>>,
    membership: Option<Arc<dyn MembershipTable>>,
    reminder_table: Option<Arc<dyn ReminderTable>>,
    pubsub: Option<Arc<dyn StreamPubSub>>,
    storage: StorageProviders,
    registry: GrainRegistry,
}

impl SiloBuilder {
    pub fn new(config: SiloConfig) -> Self {
        Self {
            config,
            fabric: None,
            directory: None,
            membership: None,
            reminder_table: None,
            pubsub: None,
            storage: StorageProviders::new(),
            registry: GrainRegistry::new(),
        }
    }

    /// Use `fabric` instead of the process-wide one.
    pub fn with_fabric(mut self, fabric: Arc<Fabric>) -> Self {
        self.fabric = Some(fabric);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn GrainDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_membership_table(mut self, table: Arc<dyn MembershipTable>) -> Self {
        self.membership = Some(table);
        self
    }

    pub fn with_reminder_table(mut self, table: Arc<dyn ReminderTable>) -> Self {
        self.reminder_table = Some(table);
        self
    }

    pub fn with_pubsub(mut self, pubsub: Arc<dyn StreamPubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Add a named storage provider.
    pub fn with_storage(mut self, name: impl Into<String>, storage: Arc<dyn GrainStorage>) -> Self {
        self.storage.insert(name, storage);
        self
    }

    /// Host grains of type `G`, built with `make`.
    pub fn with_grain<G, F>(mut self, make: F) -> Self
    where
        G: Grain,
        F: Fn(&GrainId) -> G + Send + Sync + 'static,
    {
        self.registry.register::<G, F>(make);
        self
    }

    /// Host grains of type `G`, built with `Default`.
    pub fn with_default_grain<G: Grain + Default>(mut self) -> Self {
        self.registry.register_default::<G>();
        self
    }

    /// Spawn the silo's actors and join the cluster.
    pub async fn start(self) -> Result<Silo, SiloError> {
        self.config.validate().map_err(SiloError::Config)?;

        let silo = SiloAddress::new(&self.config.endpoint.host, self.config.endpoint.port);
        let fabric = self.fabric.unwrap_or_else(Fabric::global);
        let mut storage = self.storage;
        if !storage.contains(DEFAULT_STORAGE_PROVIDER) {
            storage.insert(DEFAULT_STORAGE_PROVIDER, Arc::new(MemoryGrainStorage::new()));
        }
        let membership_table = self
            .membership
            .unwrap_or_else(|| Arc::new(InMemoryMembershipTable::new()));

        let (view_tx, view_rx) = watch::channel(MembershipView::default());
        let runtime = Arc::new(SiloRuntime::new(
            silo.clone(),
            self.config,
            fabric.clone(),
            self.registry,
            self.directory
                .unwrap_or_else(|| Arc::new(InMemoryGrainDirectory::new())),
            storage,
            self.reminder_table
                .unwrap_or_else(|| Arc::new(InMemoryReminderTable::new())),
            self.pubsub
                .unwrap_or_else(|| Arc::new(InMemoryStreamPubSub::new())),
            view_rx,
        ));

        tracing::info!(
            "Starting silo {} with grain types {:?}",
            silo,
            runtime.registry.grain_types()
        );

        let (catalog, catalog_handle) =
            Actor::spawn(Some(format!("catalog-{silo}")), Catalog, runtime.clone())
                .await
                .map_err(|e| SiloError::spawn("catalog", e))?;

        let (reminders, reminders_handle) = match Actor::spawn(
            Some(format!("reminders-{silo}")),
            ReminderService,
            runtime.clone(),
        )
        .await
        {
            Ok(spawned) => spawned,
            Err(e) => {
                catalog.stop(None);
                return Err(SiloError::spawn("reminder service", e));
            }
        };

        fabric.register(
            silo.clone(),
            SiloEndpoint {
                catalog: catalog.clone(),
                reminders: reminders.clone(),
            },
        );

        let (dead_tx, dead_rx) = watch::channel(false);
        let args = MembershipArgs {
            runtime: runtime.clone(),
            table: membership_table,
            view_tx,
            declared_dead: dead_tx,
        };
        let spawned = Actor::spawn(Some(format!("membership-{silo}")), MembershipAgent, args).await;
        let (membership, membership_handle) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                fabric.unregister(&silo);
                reminders.stop(None);
                catalog.stop(None);
                return Err(SiloError::spawn("membership agent", e));
            }
        };

        let silo = Silo {
            runtime,
            catalog,
            reminders,
            membership,
            handles: vec![catalog_handle, reminders_handle, membership_handle],
            declared_dead: dead_rx,
            started: Instant::now(),
        };

        if let Err(e) = silo.join().await {
            tracing::error!("Silo {} failed to join: {}", silo.address(), e);
            silo.kill().await;
            return Err(e);
        }

        let _ = silo.reminders.send_message(ReminderMessage::Refresh);
        tracing::info!("Silo {} is active", silo.address());
        Ok(silo)
    }
}

/// A running silo.
pub struct Silo {
    runtime: Arc<SiloRuntime>,
    catalog: ActorRef<CatalogMessage>,
    reminders: ActorRef<ReminderMessage>,
    membership: ActorRef<MembershipMessage>,
    handles: Vec<JoinHandle<()>>,
    declared_dead: watch::Receiver<bool>,
    started: Instant,
}

impl Silo {
    pub fn address(&self) -> &SiloAddress {
        &self.runtime.silo
    }

    pub fn config(&self) -> &SiloConfig {
        &self.runtime.config
    }

    /// Client that routes calls through this silo.
    pub fn client(&self) -> GrainClient {
        GrainClient::new(self.runtime.clone())
    }

    /// Stream publishing and subscription management.
    pub fn streams(&self) -> StreamProvider {
        StreamProvider::new(self.runtime.clone())
    }

    /// Subscribe to this silo's events.
    pub fn events(&self) -> broadcast::Receiver<SiloEvent> {
        self.runtime.events.subscribe()
    }

    /// Subscribe to stream items published from this silo.
    pub fn stream_items(&self) -> broadcast::Receiver<StreamItem> {
        self.runtime.stream_items.subscribe()
    }

    /// Latest membership view seen by this silo.
    pub fn membership_view(&self) -> MembershipView {
        self.runtime.view()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn timeout(&self) -> Duration {
        self.runtime.config.messaging.response_timeout
    }

    /// Cloneable read-only view of this silo, for status reporting.
    pub fn monitor(&self) -> SiloMonitor {
        SiloMonitor {
            runtime: self.runtime.clone(),
            catalog: self.catalog.clone(),
            started: self.started,
        }
    }

    /// Activation counts of this silo.
    pub async fn stats(&self) -> Result<CatalogStats, SiloError> {
        self.monitor().stats().await
    }

    /// Number of activations on this silo.
    pub async fn active_grains(&self) -> Result<usize, SiloError> {
        Ok(self.stats().await?.activations)
    }

    /// Number of reminders this silo currently fires.
    pub async fn running_reminders(&self) -> Result<usize, SiloError> {
        match ractor::rpc::call(
            &self.reminders,
            |reply| ReminderMessage::RunningCount { reply },
            Some(self.timeout()),
        )
        .await
        {
            Ok(CallResult::Success(count)) => Ok(count),
            Ok(CallResult::Timeout) => Err(SiloError::Timeout("reminder count".into())),
            _ => Err(SiloError::NotRunning),
        }
    }

    async fn join(&self) -> Result<(), SiloError> {
        match ractor::rpc::call(&self.membership, |reply| MembershipMessage::Join { reply }, Some(self.timeout()))
            .await
        {
            Ok(CallResult::Success(result)) => result,
            Ok(CallResult::Timeout) => Err(SiloError::Timeout("membership join".into())),
            _ => Err(SiloError::NotRunning),
        }
    }

    async fn set_status(&self, status: SiloStatus) -> Result<(), SiloError> {
        match ractor::rpc::call(
            &self.membership,
            |reply| MembershipMessage::SetStatus { status, reply },
            Some(self.timeout()),
        )
        .await
        {
            Ok(CallResult::Success(result)) => result,
            Ok(CallResult::Timeout) => Err(SiloError::Timeout(format!("status {status}"))),
            _ => Err(SiloError::NotRunning),
        }
    }

    /// Leave the cluster gracefully.
    ///
    /// Deactivates every grain (removing its directory entry), stops the
    /// reminder service, marks the silo `Dead` and leaves the fabric.
    pub async fn shutdown(self) -> Result<(), SiloError> {
        if *self.declared_dead.borrow() {
            let silo = self.address().clone();
            self.kill().await;
            return Err(SiloError::DeclaredDead(silo));
        }

        tracing::info!("Shutting down silo {}", self.address());
        if let Err(e) = self.set_status(SiloStatus::ShuttingDown).await {
            tracing::warn!("Failed to mark {} as shutting down: {}", self.address(), e);
        }

        let deactivate = ractor::rpc::call(
            &self.catalog,
            |reply| CatalogMessage::DeactivateAll {
                reason: DeactivationReason::SiloShutdown,
                reply,
            },
            Some(self.timeout() * 2),
        )
        .await;
        match deactivate {
            Ok(CallResult::Success(count)) => {
                tracing::info!("Deactivated {} grains on {}", count, self.address())
            }
            _ => tracing::warn!("Deactivation on {} did not complete", self.address()),
        }

        self.reminders.stop(None);
        if let Err(e) = self.set_status(SiloStatus::Dead).await {
            tracing::warn!("Failed to mark {} as dead: {}", self.address(), e);
        }
        self.runtime.fabric.unregister(self.address());

        self.membership.stop(None);
        self.catalog.stop(None);
        let silo = self.address().clone();
        let uptime = self.uptime();
        self.wait_stopped().await;

        tracing::info!("Silo {} stopped after {:?}", silo, uptime);
        Ok(())
    }

    /// Stop without leaving the cluster, as if the process crashed.
    ///
    /// Peers find out through failed probes.
    pub async fn kill(self) {
        tracing::warn!("Killing silo {}", self.address());
        self.runtime.fabric.unregister(self.address());
        self.membership.stop(None);
        self.reminders.stop(None);
        self.catalog.stop(None);
        self.wait_stopped().await;
    }

    async fn wait_stopped(self) {
        let timeout = self.timeout();
        if tokio::time::timeout(timeout, futures_util::future::join_all(self.handles))
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for actors of {} to stop", self.runtime.silo);
        }
    }

    /// Resolve when the silo stops on its own.
    ///
    /// Returns `DeclaredDead` when the cluster voted this silo out.
    pub async fn terminated(&self) -> SiloError {
        let mut declared_dead = self.declared_dead.clone();
        loop {
            if *declared_dead.borrow_and_update() {
                return SiloError::DeclaredDead(self.address().clone());
            }
            if declared_dead.changed().await.is_err() {
                if *declared_dead.borrow() {
                    return SiloError::DeclaredDead(self.address().clone());
                }
                return SiloError::NotRunning;
            }
        }
    }
}

/// Status probe that outlives borrows of the [`Silo`].
#[derive(Clone)]
pub struct SiloMonitor {
    runtime: Arc<SiloRuntime>,
    catalog: ActorRef<CatalogMessage>,
    started: Instant,
}

impl SiloMonitor {
    pub fn address(&self) -> &SiloAddress {
        &self.runtime.silo
    }

    /// This silo's status in its latest membership view.
    pub fn status(&self) -> SiloStatus {
        self.runtime
            .view()
            .status_of(&self.runtime.silo)
            .unwrap_or(SiloStatus::Created)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn stats(&self) -> Result<CatalogStats, SiloError> {
        let timeout = self.runtime.config.messaging.response_timeout;
        match ractor::rpc::call(&self.catalog, |reply| CatalogMessage::Stats { reply }, Some(timeout)).await {
            Ok(CallResult::Success(stats)) => Ok(stats),
            Ok(CallResult::Timeout) => Err(SiloError::Timeout("catalog stats".into())),
            _ => Err(SiloError::NotRunning),
        }
    }
}
