//! Grain state persistence.
//!
//! Every provider stores one JSON document per `(state name, grain)` pair,
//! guarded by an etag. A write or clear is accepted only when the caller
//! presents the etag currently stored (`None` when nothing is stored).

mod file;
mod memory;
mod object;
mod surreal;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use silo_core::{GrainId, GrainState};

use crate::error::GrainError;

pub use file::FileGrainStorage;
pub use memory::MemoryGrainStorage;
pub use object::ObjectStoreGrainStorage;
pub use surreal::SurrealGrainStorage;

/// Name of the provider used when none is configured explicitly.
pub const DEFAULT_STORAGE_PROVIDER: &str = "Default";

/// A grain state backend.
pub trait GrainStorage: Send + Sync {
    /// Read the stored state. Missing state reads as `etag: None, data: Null`.
    fn read_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<GrainState<Value>, GrainError>>;

    /// Store `data` and return the new etag.
    fn write_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
        data: &'a Value,
        expected_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, GrainError>>;

    /// Remove the stored state.
    fn clear_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
        expected_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), GrainError>>;
}

/// Storage key shared by every provider.
pub(crate) fn state_key(state_name: &str, grain: &GrainId) -> String {
    format!("{state_name}/{grain}")
}

pub(crate) fn etag_mismatch(key: &str, expected: Option<&str>, stored: Option<&str>) -> GrainError {
    GrainError::InconsistentState {
        key: key.to_string(),
        message: format!(
            "expected etag {}, stored etag {}",
            expected.unwrap_or("<none>"),
            stored.unwrap_or("<none>")
        ),
    }
}

/// Named storage providers of one silo.
#[derive(Clone, Default)]
pub struct StorageProviders {
    providers: HashMap<String, Arc<dyn GrainStorage>>,
}

impl StorageProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, storage: Arc<dyn GrainStorage>) {
        self.providers.insert(name.into(), storage);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Provider registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn GrainStorage>, GrainError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| GrainError::UnknownStorageProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Typed view of one grain state slot.
///
/// Dereferences to the state data. Call [`PersistentState::write`] to
/// persist changes.
pub struct PersistentState<T> {
    storage: Arc<dyn GrainStorage>,
    state_name: String,
    grain: GrainId,
    state: GrainState<T>,
}

impl<T> PersistentState<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync,
{
    pub(crate) fn new(storage: Arc<dyn GrainStorage>, state_name: &str, grain: GrainId) -> Self {
        Self {
            storage,
            state_name: state_name.to_string(),
            grain,
            state: GrainState::new(T::default()),
        }
    }

    /// Reload from storage, replacing in-memory data.
    pub async fn read(&mut self) -> Result<(), GrainError> {
        let stored = self
            .storage
            .read_state(&self.state_name, &self.grain)
            .await?;

        self.state = match stored.etag {
            Some(etag) => GrainState {
                etag: Some(etag),
                data: serde_json::from_value(stored.data)?,
            },
            None => GrainState::new(T::default()),
        };
        Ok(())
    }

    /// Persist the current data.
    pub async fn write(&mut self) -> Result<(), GrainError> {
        let data = serde_json::to_value(&self.state.data)?;
        let etag = self
            .storage
            .write_state(&self.state_name, &self.grain, &data, self.state.etag.as_deref())
            .await?;
        self.state.etag = Some(etag);
        Ok(())
    }

    /// Delete the stored state and reset data to its default.
    pub async fn clear(&mut self) -> Result<(), GrainError> {
        self.storage
            .clear_state(&self.state_name, &self.grain, self.state.etag.as_deref())
            .await?;
        self.state = GrainState::new(T::default());
        Ok(())
    }

    pub fn etag(&self) -> Option<&str> {
        self.state.etag.as_deref()
    }

    /// Check if the state has been persisted.
    pub fn record_exists(&self) -> bool {
        self.state.record_exists()
    }
}

impl<T> Deref for PersistentState<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state.data
    }
}

impl<T> DerefMut for PersistentState<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state.data
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Balance {
        amount: i64,
    }

    fn providers() -> StorageProviders {
        let mut providers = StorageProviders::new();
        providers.insert(DEFAULT_STORAGE_PROVIDER, Arc::new(MemoryGrainStorage::new()));
        providers
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let providers = providers();
        assert!(providers.get(DEFAULT_STORAGE_PROVIDER).is_ok());
        assert!(matches!(
            providers.get("Archive"),
            Err(GrainError::UnknownStorageProvider(name)) if name == "Archive"
        ));
    }

    #[tokio::test]
    async fn stale_copy_cannot_overwrite() -> Result<(), GrainError> {
        let storage = providers().get(DEFAULT_STORAGE_PROVIDER)?;
        let grain = GrainId::new("account", "alice");

        let mut first = PersistentState::<Balance>::new(storage.clone(), "state", grain.clone());
        first.read().await?;
        assert!(!first.record_exists());

        let mut second = PersistentState::<Balance>::new(storage.clone(), "state", grain.clone());
        second.read().await?;

        first.amount = 10;
        first.write().await?;

        second.amount = 99;
        assert!(matches!(
            second.write().await,
            Err(GrainError::InconsistentState { .. })
        ));

        second.read().await?;
        assert_eq!(second.amount, 10);
        second.clear().await?;
        assert!(second.etag().is_none());

        assert!(first.clear().await.is_err());
        Ok(())
    }
}
