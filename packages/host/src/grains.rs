//! Grain types hosted by the binary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use silo::{DEFAULT_STORAGE_PROVIDER, Grain, GrainContext, GrainError, PersistentState, SiloBuilder};
use silo_core::{Human, HumanInput, HumanRepository};

/// Register every hosted grain type on `builder`.
pub fn register<R>(builder: SiloBuilder, humans: Arc<R>) -> SiloBuilder
where
    R: HumanRepository + 'static,
{
    builder
        .with_default_grain::<CounterGrain>()
        .with_grain(move |_| HumanGrain {
            repository: humans.clone(),
        })
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CounterState {
    pub value: i64,
}

/// Durable counter: `add`, `get` and `reset`.
#[derive(Default)]
pub struct CounterGrain {
    state: Option<PersistentState<CounterState>>,
}

impl CounterGrain {
    fn state(&mut self) -> Result<&mut PersistentState<CounterState>, GrainError> {
        self.state
            .as_mut()
            .ok_or_else(|| GrainError::application("counter state not loaded"))
    }
}

impl Grain for CounterGrain {
    fn grain_type() -> &'static str {
        "counter"
    }

    async fn on_activate(&mut self, ctx: &mut GrainContext) -> Result<(), GrainError> {
        self.state = Some(ctx.state(DEFAULT_STORAGE_PROVIDER).await?);
        Ok(())
    }

    async fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        payload: Value,
    ) -> Result<Value, GrainError> {
        let state = self.state()?;
        match method {
            "add" => {
                let by = payload.as_i64().unwrap_or(1);
                state.value = state.value.saturating_add(by);
                state.write().await?;
                Ok(json!(state.value))
            }
            "get" => Ok(json!(state.value)),
            "reset" => {
                state.clear().await?;
                Ok(json!(0))
            }
            other => Err(GrainError::unknown_method(ctx.id(), other)),
        }
    }
}

/// Front for a [`HumanRepository`], keyed by tenant.
pub struct HumanGrain<R> {
    repository: Arc<R>,
}

impl<R> HumanGrain<R>
where
    R: HumanRepository,
{
    async fn friends(&self, id: String) -> Result<Value, GrainError> {
        let found: Vec<Human> = self
            .repository
            .get_humans(&[id.clone()])
            .await
            .map_err(repository_error)?;
        let human = found
            .into_iter()
            .next()
            .ok_or_else(|| GrainError::InvalidArgument(format!("no human with id {id}")))?;
        let friends = self
            .repository
            .get_friends(&human)
            .await
            .map_err(repository_error)?;
        Ok(serde_json::to_value(friends)?)
    }
}

impl<R> Grain for HumanGrain<R>
where
    R: HumanRepository + 'static,
{
    fn grain_type() -> &'static str {
        "human"
    }

    async fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        payload: Value,
    ) -> Result<Value, GrainError> {
        match method {
            "create" => {
                let input: HumanInput = serde_json::from_value(payload)?;
                let human = self
                    .repository
                    .create_human(input)
                    .await
                    .map_err(repository_error)?;
                Ok(serde_json::to_value(human)?)
            }
            "get" => {
                let ids: Vec<String> = serde_json::from_value(payload)?;
                let humans = self
                    .repository
                    .get_humans(&ids)
                    .await
                    .map_err(repository_error)?;
                Ok(serde_json::to_value(humans)?)
            }
            "friends" => {
                let id: String = serde_json::from_value(payload)?;
                self.friends(id).await
            }
            other => Err(GrainError::unknown_method(ctx.id(), other)),
        }
    }
}

fn repository_error(error: impl std::error::Error) -> GrainError {
    GrainError::Storage(error.to_string())
}
