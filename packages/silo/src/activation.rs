//! Grain activation actor.
//!
//! One actor per activation. The actor mailbox is the grain's message
//! queue, so turns never interleave.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use silo_core::{DeactivationReason, GrainAddress, SiloEvent};
use tokio::sync::watch;

use crate::error::GrainError;
use crate::grain::{Grain, GrainContext};
use crate::messages::GrainMessage;
use crate::runtime::SiloRuntime;

/// Outcome of `on_activate`; `None` while it is still running.
pub(crate) type ActivationOutcome = Option<Result<(), GrainError>>;

/// Activation bookkeeping shared with the catalog.
#[derive(Debug)]
pub(crate) struct ActivationHandle {
    last_used_ms: AtomicI64,
    deactivating: AtomicBool,
    outcome: watch::Sender<ActivationOutcome>,
}

impl ActivationHandle {
    pub fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            last_used_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            deactivating: AtomicBool::new(false),
            outcome,
        }
    }

    pub fn touch(&self) {
        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_used_ms.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    pub fn mark_deactivating(&self) {
        self.deactivating.store(true, Ordering::Release);
    }

    pub fn is_deactivating(&self) -> bool {
        self.deactivating.load(Ordering::Acquire)
    }

    pub fn activated(&self) {
        self.settle(Ok(()));
    }

    /// Record a failed activation. No-op once an outcome is known.
    pub fn failed(&self, error: GrainError) {
        self.settle(Err(error));
    }

    fn settle(&self, result: Result<(), GrainError>) {
        self.outcome.send_if_modified(|outcome| {
            if outcome.is_some() {
                return false;
            }
            *outcome = Some(result);
            true
        });
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.borrow().is_none()
    }

    /// Snapshot of the activation outcome.
    pub fn outcome(&self) -> ActivationOutcome {
        self.outcome.borrow().clone()
    }

    pub fn failure(&self) -> Option<GrainError> {
        match &*self.outcome.borrow() {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Wait until `on_activate` has finished.
    pub async fn ready(&self) -> Result<(), GrainError> {
        let mut outcome = self.outcome.subscribe();
        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map(|settled| (*settled).clone());
        // The sender lives in `self`, so the wait cannot fail
        settled.ok().flatten().unwrap_or(Ok(()))
    }
}

/// Everything an activation needs besides the grain itself.
pub(crate) struct ActivationSeed {
    pub address: GrainAddress,
    pub runtime: Arc<SiloRuntime>,
    pub handle: Arc<ActivationHandle>,
}

/// Activation actor arguments.
pub(crate) struct ActivationArgs<G> {
    pub grain: G,
    pub seed: ActivationSeed,
}

/// State for the activation actor.
pub(crate) struct ActivationState<G> {
    grain: G,
    ctx: GrainContext,
    handle: Arc<ActivationHandle>,
    /// Set when `on_activate` failed; every call is answered with it.
    failure: Option<GrainError>,
    deactivation: Option<DeactivationReason>,
}

/// Activation actor for grains of type `G`.
pub(crate) struct GrainActivation<G>(PhantomData<fn() -> G>);

impl<G> GrainActivation<G> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<G: Grain> ActivationState<G> {
    async fn deactivate(&mut self, myself: &ActorRef<GrainMessage>, reason: DeactivationReason) {
        self.handle.mark_deactivating();
        self.deactivation = Some(reason);
        self.ctx.cancel_all_timers();

        if self.failure.is_none() {
            self.grain.on_deactivate(&mut self.ctx, reason).await;
        }

        tracing::info!(
            "Deactivating {} ({}): {}",
            self.ctx.id(),
            self.ctx.activation_id(),
            reason
        );
        myself.stop(Some(reason.to_string()));
    }
}

impl<G: Grain> Actor for GrainActivation<G> {
    type Msg = GrainMessage;
    type State = ActivationState<G>;
    type Arguments = ActivationArgs<G>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let ActivationArgs { grain, seed } = args;
        tracing::debug!(
            "Starting activation {} of {}",
            seed.address.activation,
            seed.address.grain
        );

        Ok(ActivationState {
            grain,
            ctx: GrainContext::new(seed.address, seed.runtime, myself),
            handle: seed.handle,
            failure: None,
            deactivation: None,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match state.grain.on_activate(&mut state.ctx).await {
            Ok(()) => {
                tracing::info!("Activated {} on {}", state.ctx.id(), state.ctx.silo());
                state.ctx.runtime().emit(SiloEvent::GrainActivated {
                    address: state.ctx.address().clone(),
                    timestamp: Utc::now(),
                });
                state.handle.activated();
            }
            Err(e) => {
                tracing::warn!("Activation of {} failed: {}", state.ctx.id(), e);
                state.ctx.runtime().emit(SiloEvent::ActivationFailed {
                    grain: state.ctx.id().clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                let failure = GrainError::ActivationFailed {
                    grain: state.ctx.id().clone(),
                    reason: e.to_string(),
                };
                state.handle.failed(failure.clone());
                state.failure = Some(failure);
                state.handle.mark_deactivating();
                // Calls queued during on_activate are answered before this
                myself.send_message(GrainMessage::Deactivate {
                    reason: DeactivationReason::ActivationFailed,
                })?;
            }
        }
        state.handle.touch();
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if state.deactivation.is_some() {
            // Stop is pending; calls still queued learn why, the rest is dropped
            if let (GrainMessage::Invoke { reply, .. }, Some(failure)) = (message, &state.failure) {
                let _ = reply.send(Err(failure.clone()));
            }
            return Ok(());
        }

        match message {
            GrainMessage::Invoke {
                method,
                payload,
                reply,
            } => {
                if let Some(failure) = &state.failure {
                    let _ = reply.send(Err(failure.clone()));
                    return Ok(());
                }

                state.handle.touch();
                let result = state.grain.invoke(&mut state.ctx, &method, payload).await;
                state.handle.touch();

                if let Err(e) = &result {
                    tracing::debug!("{}::{} failed: {}", state.ctx.id(), method, e);
                }
                let _ = reply.send(result);
            }

            GrainMessage::OneWay { method, payload } => {
                if state.failure.is_some() {
                    return Ok(());
                }

                state.handle.touch();
                let result = state.grain.invoke(&mut state.ctx, &method, payload).await;
                state.handle.touch();

                if let Err(e) = result {
                    tracing::warn!("One-way {}::{} failed: {}", state.ctx.id(), method, e);
                }
            }

            GrainMessage::Reminder { name, status } => {
                if state.failure.is_some() {
                    return Ok(());
                }

                state.handle.touch();
                if let Err(e) = state
                    .grain
                    .receive_reminder(&mut state.ctx, &name, status)
                    .await
                {
                    tracing::warn!("Reminder {} on {} failed: {}", name, state.ctx.id(), e);
                }
                state.handle.touch();
            }

            GrainMessage::Timer { name, generation } => {
                // Ticks queued before the timer was cancelled or replaced are skipped
                if state.failure.is_some() || !state.ctx.is_current_tick(&name, generation) {
                    return Ok(());
                }

                if let Err(e) = state.grain.on_timer(&mut state.ctx, &name).await {
                    tracing::warn!("Timer {} on {} failed: {}", name, state.ctx.id(), e);
                }
            }

            GrainMessage::StreamItem { item } => {
                if state.failure.is_some() {
                    return Ok(());
                }

                state.handle.touch();
                let stream = item.stream.clone();
                if let Err(e) = state.grain.on_stream_item(&mut state.ctx, item).await {
                    tracing::warn!(
                        "Stream item from {} on {} failed: {}",
                        stream,
                        state.ctx.id(),
                        e
                    );
                }
                state.handle.touch();
            }

            GrainMessage::Deactivate { reason } => {
                state.deactivate(&myself, reason).await;
                return Ok(());
            }

            GrainMessage::IdleSince { reply } => {
                let _ = reply.send(state.handle.last_used());
            }
        }

        if state.ctx.take_deactivation_request() {
            state
                .deactivate(&myself, DeactivationReason::Requested)
                .await;
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.ctx.cancel_all_timers();
        state.handle.mark_deactivating();
        state
            .handle
            .failed(GrainError::Deactivating(state.ctx.id().clone()));

        let reason = state
            .deactivation
            .unwrap_or(DeactivationReason::SiloShutdown);
        state.ctx.runtime().emit(SiloEvent::GrainDeactivated {
            address: state.ctx.address().clone(),
            reason,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
