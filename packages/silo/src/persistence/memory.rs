use std::collections::HashMap;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use silo_core::{GrainId, GrainState};

use super::{GrainStorage, etag_mismatch, state_key};
use crate::error::GrainError;

/// Grain state held in memory. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryGrainStorage {
    records: Mutex<HashMap<String, GrainState<Value>>>,
}

impl MemoryGrainStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(
        &self,
        key: String,
        data: &Value,
        expected_etag: Option<&str>,
    ) -> Result<String, GrainError> {
        let mut records = self.records.lock();
        let stored = records.get(&key).and_then(|r| r.etag.clone());
        if stored.as_deref() != expected_etag {
            return Err(etag_mismatch(&key, expected_etag, stored.as_deref()));
        }

        let etag = GrainState::<Value>::next_etag();
        records.insert(
            key,
            GrainState {
                etag: Some(etag.clone()),
                data: data.clone(),
            },
        );
        Ok(etag)
    }

    fn clear(&self, key: String, expected_etag: Option<&str>) -> Result<(), GrainError> {
        let mut records = self.records.lock();
        let stored = records.get(&key).and_then(|r| r.etag.clone());
        if stored.as_deref() != expected_etag {
            return Err(etag_mismatch(&key, expected_etag, stored.as_deref()));
        }
        records.remove(&key);
        Ok(())
    }
}

impl GrainStorage for MemoryGrainStorage {
    fn read_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<GrainState<Value>, GrainError>> {
        let key = state_key(state_name, grain);
        let state = self
            .records
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| GrainState::new(Value::Null));
        futures_util::future::ready(Ok(state)).boxed()
    }

    fn write_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
        data: &'a Value,
        expected_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, GrainError>> {
        let result = self.write(state_key(state_name, grain), data, expected_etag);
        futures_util::future::ready(result).boxed()
    }

    fn clear_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
        expected_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), GrainError>> {
        let result = self.clear(state_key(state_name, grain), expected_etag);
        futures_util::future::ready(result).boxed()
    }
}
