//! Grain client: routes calls to wherever a grain is activated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ractor::ActorRef;
use ractor::rpc::CallResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use silo_core::{GrainId, SiloAddress, SiloStatus};
use tokio::time::Instant;

use crate::error::GrainError;
use crate::messages::{ActivationTarget, CatalogMessage, GrainMessage};
use crate::placement::PlacementDirector;
use crate::runtime::SiloRuntime;

/// Redirects followed before a call fails with `TooManyForwards`.
pub const MAX_FORWARD_COUNT: u8 = 2;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Handle for calling grains through a silo.
#[derive(Clone)]
pub struct GrainClient {
    runtime: Arc<SiloRuntime>,
}

impl GrainClient {
    pub(crate) fn new(runtime: Arc<SiloRuntime>) -> Self {
        Self { runtime }
    }

    /// The silo this client routes through.
    pub fn silo(&self) -> &SiloAddress {
        &self.runtime.silo
    }

    /// Call `method` on `grain` and wait for the result.
    pub async fn call(&self, grain: &GrainId, method: &str, payload: Value) -> Result<Value, GrainError> {
        let deadline = Instant::now() + self.runtime.config.messaging.response_timeout;
        let mut retried = false;

        loop {
            let actor = self.resolve(grain, deadline).await?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = ractor::rpc::call(
                &actor,
                |reply| GrainMessage::Invoke {
                    method: method.to_string(),
                    payload: payload.clone(),
                    reply,
                },
                Some(remaining),
            )
            .await;

            match result {
                Ok(CallResult::Success(result)) => return result,
                Ok(CallResult::Timeout) => return Err(GrainError::Timeout(grain.clone())),
                // The activation stopped before answering
                Ok(CallResult::SenderError) | Err(_) => {
                    self.runtime.cache.invalidate(grain);
                    if retried {
                        return Err(GrainError::Deactivating(grain.clone()));
                    }
                    retried = true;
                }
            }
        }
    }

    /// Call with typed request and response.
    pub async fn invoke<Req, Resp>(
        &self,
        grain: &GrainId,
        method: &str,
        request: &Req,
    ) -> Result<Resp, GrainError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        let value = self.call(grain, method, payload).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fire-and-forget call. Returns once the message is queued.
    pub async fn send(&self, grain: &GrainId, method: &str, payload: Value) -> Result<(), GrainError> {
        self.deliver(grain, || GrainMessage::OneWay {
            method: method.to_string(),
            payload: payload.clone(),
        })
        .await
    }

    /// When the activation of `grain` last finished a turn.
    ///
    /// Activates the grain if it is not active; the query itself is not a turn.
    pub async fn idle_since(&self, grain: &GrainId) -> Result<DateTime<Utc>, GrainError> {
        let deadline = Instant::now() + self.runtime.config.messaging.response_timeout;
        let actor = self.resolve(grain, deadline).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match ractor::rpc::call(&actor, |reply| GrainMessage::IdleSince { reply }, Some(remaining)).await {
            Ok(CallResult::Success(at)) => Ok(at),
            Ok(CallResult::Timeout) => Err(GrainError::Timeout(grain.clone())),
            Ok(CallResult::SenderError) | Err(_) => {
                self.runtime.cache.invalidate(grain);
                Err(GrainError::Deactivating(grain.clone()))
            }
        }
    }

    /// Queue a message on the activation of `grain`, activating it if needed.
    pub(crate) async fn deliver<F>(&self, grain: &GrainId, message: F) -> Result<(), GrainError>
    where
        F: Fn() -> GrainMessage,
    {
        let deadline = Instant::now() + self.runtime.config.messaging.response_timeout;
        for _ in 0..2 {
            let actor = self.resolve(grain, deadline).await?;
            if actor.send_message(message()).is_ok() {
                return Ok(());
            }
            self.runtime.cache.invalidate(grain);
        }
        Err(GrainError::Deactivating(grain.clone()))
    }

    /// Find the activation, waiting out deactivations until `deadline`.
    async fn resolve(&self, grain: &GrainId, deadline: Instant) -> Result<ActorRef<GrainMessage>, GrainError> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.locate(grain).await {
                Err(GrainError::Deactivating(_) | GrainError::SiloUnavailable(_)) => {
                    if Instant::now() + backoff >= deadline {
                        return Err(GrainError::Timeout(grain.clone()));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                other => return other,
            }
        }
    }

    /// One resolution pass: pick a silo, then follow redirects.
    async fn locate(&self, grain: &GrainId) -> Result<ActorRef<GrainMessage>, GrainError> {
        let timeout = self.runtime.config.messaging.response_timeout;
        let mut target = self.target_silo(grain).await?;
        let mut forward_count: u8 = 0;

        loop {
            let Some(endpoint) = self.runtime.fabric.get(&target) else {
                self.runtime.cache.invalidate(grain);
                return Err(GrainError::SiloUnavailable(target));
            };

            let answer = ractor::rpc::call(
                &endpoint.catalog,
                |reply| CatalogMessage::GetOrActivate {
                    grain: grain.clone(),
                    forward_count,
                    reply,
                },
                Some(timeout),
            )
            .await;

            match answer {
                Ok(CallResult::Success(Ok(ActivationTarget::Local { actor, address }))) => {
                    self.runtime.cache.put(address);
                    return Ok(actor);
                }
                Ok(CallResult::Success(Ok(ActivationTarget::Redirect(address)))) => {
                    forward_count += 1;
                    if forward_count > MAX_FORWARD_COUNT {
                        return Err(GrainError::TooManyForwards(grain.clone()));
                    }
                    tracing::trace!("{} redirected to {}", grain, address.silo);
                    target = address.silo.clone();
                    self.runtime.cache.put(address);
                }
                Ok(CallResult::Success(Err(e))) => {
                    self.runtime.cache.invalidate(grain);
                    return Err(e);
                }
                Ok(CallResult::Timeout) => return Err(GrainError::Timeout(grain.clone())),
                Ok(CallResult::SenderError) | Err(_) => {
                    self.runtime.cache.invalidate(grain);
                    return Err(GrainError::SiloUnavailable(target));
                }
            }
        }
    }

    /// Silo to ask first: cache, then directory, then placement.
    async fn target_silo(&self, grain: &GrainId) -> Result<SiloAddress, GrainError> {
        if let Some(cached) = self.runtime.cache.get(grain) {
            if self.is_reachable(&cached.silo) {
                return Ok(cached.silo);
            }
            self.runtime.cache.invalidate(grain);
        }

        if let Some(entry) = self.runtime.directory.lookup(grain).await?
            && self.runtime.is_active(&entry.silo)
            && self.runtime.fabric.contains(&entry.silo)
        {
            let silo = entry.silo.clone();
            self.runtime.cache.put(entry);
            return Ok(silo);
        }

        let strategy = self
            .runtime
            .registry
            .placement(&grain.grain_type)
            .unwrap_or_default();
        let director = PlacementDirector::new(
            self.runtime.silo.clone(),
            self.runtime.fabric.clone(),
            self.runtime.config.messaging.response_timeout,
        );
        director
            .place(strategy, grain, &self.runtime.active_silos())
            .await
    }

    fn is_reachable(&self, silo: &SiloAddress) -> bool {
        self.runtime.fabric.contains(silo)
            && self.runtime.view().status_of(silo) != Some(SiloStatus::Dead)
    }
}
