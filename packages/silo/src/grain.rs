//! The grain programming model.
//!
//! A grain is a virtual actor: it is addressed by a [`GrainId`] whether or
//! not it is in memory, and the runtime activates it on the first message.
//! Each activation processes one message at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ractor::ActorRef;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use silo_core::{
    ActivationId, DeactivationReason, GrainAddress, GrainId, ReminderEntry, SiloAddress,
    StreamId, StreamItem, TickStatus,
};
use tokio::task::AbortHandle;

use crate::client::GrainClient;
use crate::error::GrainError;
use crate::messages::GrainMessage;
use crate::persistence::PersistentState;
use crate::placement::PlacementStrategy;
use crate::reminders;
use crate::runtime::SiloRuntime;
use crate::streams::StreamProvider;

/// Name of the state slot used by [`GrainContext::state`].
pub const DEFAULT_STATE_NAME: &str = "state";

/// Behavior of a grain type.
///
/// # Example
///
/// ```ignore
/// #[derive(Default)]
/// struct Counter { count: i64 }
///
/// impl Grain for Counter {
///     fn grain_type() -> &'static str { "counter" }
///
///     async fn invoke(&mut self, ctx: &mut GrainContext, method: &str, payload: Value)
///         -> Result<Value, GrainError>
///     {
///         match method {
///             "add" => { self.count += payload.as_i64().unwrap_or(1); Ok(self.count.into()) }
///             _ => Err(GrainError::unknown_method(ctx.id(), method)),
///         }
///     }
/// }
/// ```
pub trait Grain: Send + Sized + 'static {
    /// Registered type name; the first half of every id of this type.
    fn grain_type() -> &'static str;

    /// Where new activations of this type are placed.
    fn placement() -> PlacementStrategy {
        PlacementStrategy::Random
    }

    /// Called before the first message. An error fails the activation.
    fn on_activate(
        &mut self,
        ctx: &mut GrainContext,
    ) -> impl Future<Output = Result<(), GrainError>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// Called before the activation leaves memory.
    fn on_deactivate(
        &mut self,
        ctx: &mut GrainContext,
        reason: DeactivationReason,
    ) -> impl Future<Output = ()> + Send {
        let _ = (ctx, reason);
        async {}
    }

    /// Handle a call. The returned value is sent back to the caller.
    fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Value, GrainError>> + Send;

    /// Handle a reminder tick.
    fn receive_reminder(
        &mut self,
        ctx: &mut GrainContext,
        name: &str,
        status: TickStatus,
    ) -> impl Future<Output = Result<(), GrainError>> + Send {
        let _ = (ctx, status);
        let name = name.to_string();
        async move {
            tracing::warn!("Grain type {} ignores reminder {}", Self::grain_type(), name);
            Ok(())
        }
    }

    /// Handle a timer tick.
    fn on_timer(
        &mut self,
        ctx: &mut GrainContext,
        name: &str,
    ) -> impl Future<Output = Result<(), GrainError>> + Send {
        let _ = (ctx, name);
        async { Ok(()) }
    }

    /// Handle an item from a subscribed stream.
    fn on_stream_item(
        &mut self,
        ctx: &mut GrainContext,
        item: StreamItem,
    ) -> impl Future<Output = Result<(), GrainError>> + Send {
        let _ = (ctx, item);
        async { Ok(()) }
    }
}

/// A timer task and the generation its ticks carry.
struct RunningTimer {
    generation: u64,
    task: AbortHandle,
}

/// Runtime services available to a grain during a turn.
pub struct GrainContext {
    address: GrainAddress,
    runtime: Arc<SiloRuntime>,
    myself: ActorRef<GrainMessage>,
    timers: HashMap<String, RunningTimer>,
    timer_generation: u64,
    deactivate_requested: bool,
}

impl GrainContext {
    pub(crate) fn new(
        address: GrainAddress,
        runtime: Arc<SiloRuntime>,
        myself: ActorRef<GrainMessage>,
    ) -> Self {
        Self {
            address,
            runtime,
            myself,
            timers: HashMap::new(),
            timer_generation: 0,
            deactivate_requested: false,
        }
    }

    pub fn id(&self) -> &GrainId {
        &self.address.grain
    }

    pub fn activation_id(&self) -> ActivationId {
        self.address.activation
    }

    /// The silo hosting this activation.
    pub fn silo(&self) -> &SiloAddress {
        &self.address.silo
    }

    pub fn address(&self) -> &GrainAddress {
        &self.address
    }

    /// Client for calling other grains.
    pub fn client(&self) -> GrainClient {
        GrainClient::new(self.runtime.clone())
    }

    /// Load this grain's state from the named storage provider.
    pub async fn state<T>(&self, provider: &str) -> Result<PersistentState<T>, GrainError>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync,
    {
        self.named_state(provider, DEFAULT_STATE_NAME).await
    }

    /// Load a named state slot from the named storage provider.
    pub async fn named_state<T>(
        &self,
        provider: &str,
        state_name: &str,
    ) -> Result<PersistentState<T>, GrainError>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync,
    {
        let storage = self.runtime.storage.get(provider)?;
        let mut state: PersistentState<T> = PersistentState::new(storage, state_name, self.id().clone());
        state.read().await?;
        Ok(state)
    }

    /// Register or replace a durable reminder.
    pub async fn register_reminder(
        &self,
        name: &str,
        due: Duration,
        period: Duration,
    ) -> Result<ReminderEntry, GrainError> {
        reminders::register(&self.runtime, self.id(), name, due, period).await
    }

    /// Remove a reminder. Returns whether it existed.
    pub async fn unregister_reminder(&self, name: &str) -> Result<bool, GrainError> {
        reminders::unregister(&self.runtime, self.id(), name).await
    }

    /// Reminders registered by this grain.
    pub async fn reminders(&self) -> Result<Vec<ReminderEntry>, GrainError> {
        self.runtime.reminder_table.read_for_grain(self.id()).await
    }

    /// Start or replace a volatile timer.
    ///
    /// The first tick comes after `due`, then every `period`. Ticks are
    /// delivered as turns and stop when the activation is deactivated.
    pub fn register_timer(&mut self, name: &str, due: Duration, period: Duration) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let myself = self.myself.clone();
        let timer_name = name.to_string();
        let period = period.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            tokio::time::sleep(due).await;
            loop {
                let tick = GrainMessage::Timer {
                    name: timer_name.clone(),
                    generation,
                };
                if myself.send_message(tick).is_err() {
                    break;
                }
                tokio::time::sleep(period).await;
            }
        });

        let running = RunningTimer {
            generation,
            task: task.abort_handle(),
        };
        if let Some(previous) = self.timers.insert(name.to_string(), running) {
            previous.task.abort();
        }
    }

    /// Stop a timer. Returns whether it was running.
    pub fn cancel_timer(&mut self, name: &str) -> bool {
        match self.timers.remove(name) {
            Some(running) => {
                running.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_timer(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    /// Check a tick against the timer currently registered under `name`.
    pub(crate) fn is_current_tick(&self, name: &str, generation: u64) -> bool {
        self.timers
            .get(name)
            .is_some_and(|running| running.generation == generation)
    }

    /// Subscribe this grain to a stream.
    pub async fn subscribe(&self, stream: &StreamId) -> Result<(), GrainError> {
        self.streams().subscribe(stream, self.id()).await
    }

    /// Unsubscribe this grain from a stream.
    pub async fn unsubscribe(&self, stream: &StreamId) -> Result<bool, GrainError> {
        self.streams().unsubscribe(stream, self.id()).await
    }

    /// Publish an item to a stream.
    pub async fn publish(&self, stream: &StreamId, payload: Value) -> Result<StreamItem, GrainError> {
        self.streams().publish(stream, payload).await
    }

    fn streams(&self) -> StreamProvider {
        StreamProvider::new(self.runtime.clone())
    }

    /// Deactivate once the current turn completes.
    pub fn deactivate_on_idle(&mut self) {
        self.deactivate_requested = true;
    }

    pub(crate) fn runtime(&self) -> &Arc<SiloRuntime> {
        &self.runtime
    }

    pub(crate) fn take_deactivation_request(&mut self) -> bool {
        std::mem::take(&mut self.deactivate_requested)
    }

    pub(crate) fn cancel_all_timers(&mut self) {
        for (_, running) in self.timers.drain() {
            running.task.abort();
        }
    }
}
