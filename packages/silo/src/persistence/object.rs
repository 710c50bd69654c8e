use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use silo_core::{GrainId, GrainState};
use storage::{Storage, StorageError};
use tokio::sync::Mutex;

use super::{GrainStorage, etag_mismatch, state_key};
use crate::error::GrainError;

#[derive(Debug, Serialize, Deserialize)]
struct StateObject {
    etag: String,
    data: Value,
}

/// Grain state stored as JSON objects in an object store.
///
/// First writes use create-if-absent. Updates compare the stored etag under
/// a per-instance lock, so concurrent writers in other processes are not
/// detected.
#[derive(Debug)]
pub struct ObjectStoreGrainStorage {
    storage: Storage,
    lock: Mutex<()>,
}

impl ObjectStoreGrainStorage {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    fn object_key(state_name: &str, grain: &GrainId) -> String {
        format!("grain-state/{}.json", state_key(state_name, grain))
    }

    async fn load(&self, key: &str) -> Result<Option<StateObject>, GrainError> {
        self.storage.read_json(key).await.map_err(storage_error)
    }
}

fn storage_error(err: StorageError) -> GrainError {
    GrainError::Storage(err.to_string())
}

impl GrainStorage for ObjectStoreGrainStorage {
    fn read_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<GrainState<Value>, GrainError>> {
        async move {
            let key = Self::object_key(state_name, grain);
            Ok(match self.load(&key).await? {
                Some(object) => GrainState {
                    etag: Some(object.etag),
                    data: object.data,
                },
                None => GrainState::new(Value::Null),
            })
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
            let key = Self::object_key(state_name, grain);
            let object = StateObject {
                etag: GrainState::<Value>::next_etag(),
                data: data.clone(),
            };

            let _guard = self.lock.lock().await;
            match expected_etag {
                None => match self.storage.create_json(&key, &object).await {
                    Ok(()) => {}
                    Err(StorageError::AlreadyExists(_)) => {
                        let stored = self.load(&key).await?.map(|o| o.etag);
                        return Err(etag_mismatch(&key, None, stored.as_deref()));
                    }
                    Err(e) => return Err(storage_error(e)),
                },
                Some(expected) => {
                    let stored = self.load(&key).await?.map(|o| o.etag);
                    if stored.as_deref() != Some(expected) {
                        return Err(etag_mismatch(&key, Some(expected), stored.as_deref()));
                    }
                    self.storage
                        .write_json(&key, &object)
                        .await
                        .map_err(storage_error)?;
                }
            }
            Ok(object.etag)
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
            let key = Self::object_key(state_name, grain);
            let _guard = self.lock.lock().await;

            let stored = self.load(&key).await?.map(|o| o.etag);
            if stored.as_deref() != expected_etag {
                return Err(etag_mismatch(&key, expected_etag, stored.as_deref()));
            }
            if stored.is_some() {
                self.storage.delete(&key).await.map_err(storage_error)?;
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storage::StorageConfig;

    use super::*;

    #[tokio::test]
    async fn create_then_update_with_etag() -> Result<(), Box<dyn std::error::Error>> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let provider = ObjectStoreGrainStorage::new(storage);
        let grain = GrainId::new("cart", "42");

        let first = provider
            .write_state("state", &grain, &json!(["apple"]), None)
            .await?;
        let again = provider
            .write_state("state", &grain, &json!(["pear"]), None)
            .await;
        assert!(matches!(again, Err(GrainError::InconsistentState { .. })));

        let second = provider
            .write_state("state", &grain, &json!(["apple", "pear"]), Some(&first))
            .await?;
        assert_ne!(first, second);

        let state = provider.read_state("state", &grain).await?;
        assert_eq!(state.etag.as_deref(), Some(second.as_str()));
        assert_eq!(state.data, json!(["apple", "pear"]));
        Ok(())
    }
}
