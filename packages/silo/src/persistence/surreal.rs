use db::DbError;
use db::repositories::GrainStateRepository;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use silo_core::{GrainId, GrainState};

use super::{GrainStorage, state_key};
use crate::error::GrainError;

/// Grain state stored in the `grain_state` table.
///
/// Requires `db::init` to have been called.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealGrainStorage;

impl SurrealGrainStorage {
    pub fn new() -> Self {
        Self
    }
}

fn storage_error(key: &str, err: DbError) -> GrainError {
    match err {
        DbError::Conflict(message) => GrainError::InconsistentState {
            key: key.to_string(),
            message,
        },
        other => GrainError::Storage(other.to_string()),
    }
}

impl GrainStorage for SurrealGrainStorage {
    fn read_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<GrainState<Value>, GrainError>> {
        async move {
            let key = state_key(state_name, grain);
            let stored = GrainStateRepository::read(&key)
                .await
                .map_err(|e| storage_error(&key, e))?;
            Ok(stored.unwrap_or_else(|| GrainState::new(Value::Null)))
        }
        .boxed()
    }

    fn write_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
        data: &'a Value,
        expected_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, GrainError>> {
        async move {
            let key = state_key(state_name, grain);
            GrainStateRepository::write(&key, data, expected_etag)
                .await
                .map_err(|e| storage_error(&key, e))
        }
        .boxed()
    }

    fn clear_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
        expected_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), GrainError>> {
        async move {
            let key = state_key(state_name, grain);
            GrainStateRepository::clear(&key, expected_etag)
                .await
                .map_err(|e| storage_error(&key, e))
        }
        .boxed()
    }
}
