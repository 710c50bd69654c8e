//! Services shared by every actor of one silo.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use silo_core::{MembershipView, SiloAddress, SiloEvent, StreamId, StreamItem};
use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};

use crate::config::SiloConfig;
use crate::directory::{DirectoryCache, GrainDirectory};
use crate::fabric::Fabric;
use crate::persistence::StorageProviders;
use crate::registry::GrainRegistry;
use crate::reminders::ReminderTable;
use crate::streams::StreamPubSub;

/// Per-silo runtime services.
///
/// Created by the builder and shared by the catalog, every activation,
/// grain clients and the background services.
pub(crate) struct SiloRuntime {
    pub silo: SiloAddress,
    pub config: SiloConfig,
    pub fabric: Arc<Fabric>,
    pub registry: GrainRegistry,
    pub directory: Arc<dyn GrainDirectory>,
    pub cache: DirectoryCache,
    pub storage: StorageProviders,
    pub reminder_table: Arc<dyn ReminderTable>,
    pub pubsub: Arc<dyn StreamPubSub>,
    /// Publish lane per stream, holding its last sequence number.
    ///
    /// One entry per stream ever published from this silo; entries live as
    /// long as the silo so sequences never restart.
    pub stream_lanes: Mutex<HashMap<StreamId, Arc<AsyncMutex<u64>>>>,
    /// Every item published from this silo.
    pub stream_items: broadcast::Sender<StreamItem>,
    pub events: broadcast::Sender<SiloEvent>,
    view: watch::Receiver<MembershipView>,
}

/// Capacity of the event and stream observer channels.
const CHANNEL_CAPACITY: usize = 1024;

impl SiloRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        silo: SiloAddress,
        config: SiloConfig,
        fabric: Arc<Fabric>,
        registry: GrainRegistry,
        directory: Arc<dyn GrainDirectory>,
        storage: StorageProviders,
        reminder_table: Arc<dyn ReminderTable>,
        pubsub: Arc<dyn StreamPubSub>,
        view: watch::Receiver<MembershipView>,
    ) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stream_items, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            silo,
            config,
            fabric,
            registry,
            directory,
            cache: DirectoryCache::new(),
            storage,
            reminder_table,
            pubsub,
            stream_lanes: Mutex::new(HashMap::new()),
            stream_items,
            events,
            view,
        }
    }

    /// Current membership view.
    pub fn view(&self) -> MembershipView {
        self.view.borrow().clone()
    }

    /// Active silos, sorted.
    pub fn active_silos(&self) -> Vec<SiloAddress> {
        self.view.borrow().active_silos()
    }

    pub fn is_active(&self, silo: &SiloAddress) -> bool {
        self.view.borrow().is_active(silo)
    }

    /// The publish lane of `stream`.
    pub fn stream_lane(&self, stream: &StreamId) -> Arc<AsyncMutex<u64>> {
        self.stream_lanes
            .lock()
            .entry(stream.clone())
            .or_default()
            .clone()
    }

    /// Broadcast an event to observers.
    pub fn emit(&self, event: SiloEvent) {
        tracing::debug!("{}", event.description());
        let _ = self.events.send(event);
    }
}
