use std::path::{Path, PathBuf};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use silo_core::{GrainId, GrainState};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{GrainStorage, etag_mismatch, state_key};
use crate::error::GrainError;

/// On-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    etag: String,
    data: Value,
}

/// Grain state stored as one JSON file per grain and state name.
///
/// Writes go to a temp file first, then rename over the old one. Only one
/// process may use a directory at a time.
#[derive(Debug)]
pub struct FileGrainStorage {
    base_dir: PathBuf,
    /// Serializes compare-and-write.
    lock: Mutex<()>,
}

impl FileGrainStorage {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Create the base directory if needed.
    pub async fn init(&self) -> Result<(), GrainError> {
        fs::create_dir_all(&self.base_dir).await.map_err(io_error)?;
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", file_name(key)))
    }

    async fn load(&self, path: &Path) -> Result<Option<StateFile>, GrainError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn save(&self, path: &Path, file: &StateFile) -> Result<(), GrainError> {
        let json = serde_json::to_vec_pretty(file)?;

        let temp_path = path.with_extension("json.tmp");
        let mut temp = fs::File::create(&temp_path).await.map_err(io_error)?;
        temp.write_all(&json).await.map_err(io_error)?;
        temp.sync_all().await.map_err(io_error)?;
        fs::rename(&temp_path, path).await.map_err(io_error)?;

        tracing::debug!("Saved state to {:?}", path);
        Ok(())
    }
}

/// Keep `[A-Za-z0-9._-]` and hex-escape everything else.
fn file_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'_' => name.push(byte as char),
            other => name.push_str(&format!("%{other:02X}")),
        }
    }
    name
}

fn io_error(err: std::io::Error) -> GrainError {
    GrainError::Storage(err.to_string())
}

impl GrainStorage for FileGrainStorage {
    fn read_state<'a>(
        &'a self,
        state_name: &'a str,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<GrainState<Value>, GrainError>> {
        async move {
            let path = self.path_for(&state_key(state_name, grain));
            Ok(match self.load(&path).await? {
                Some(file) => GrainState {
                    etag: Some(file.etag),
                    data: file.data,
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
            let key = state_key(state_name, grain);
            let path = self.path_for(&key);
            let _guard = self.lock.lock().await;

            let stored = self.load(&path).await?.map(|f| f.etag);
            if stored.as_deref() != expected_etag {
                return Err(etag_mismatch(&key, expected_etag, stored.as_deref()));
            }

            fs::create_dir_all(&self.base_dir).await.map_err(io_error)?;
            let etag = GrainState::<Value>::next_etag();
            let file = StateFile {
                etag: etag.clone(),
                data: data.clone(),
            };
            self.save(&path, &file).await?;
            Ok(etag)
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
            let path = self.path_for(&key);
            let _guard = self.lock.lock().await;

            let stored = self.load(&path).await?.map(|f| f.etag);
            if stored.as_deref() != expected_etag {
                return Err(etag_mismatch(&key, expected_etag, stored.as_deref()));
            }

            if stored.is_some() {
                fs::remove_file(&path).await.map_err(io_error)?;
                tracing::debug!("Deleted state file {:?}", path);
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use serde_json::json;

    use super::*;

    #[test]
    fn file_names_escape_separators() {
        assert_eq!(file_name("state/counter/a b"), "state%2Fcounter%2Fa%20b");
        assert_eq!(file_name("plain-key_1.x"), "plain-key_1.x");
    }

    #[tokio::test]
    async fn state_survives_a_new_instance() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let grain = GrainId::new("counter", "a");

        let storage = FileGrainStorage::new(dir.path());
        storage.init().await?;
        let etag = storage
            .write_state("state", &grain, &json!({"count": 3}), None)
            .await?;

        let reopened = FileGrainStorage::new(dir.path());
        let state = reopened.read_state("state", &grain).await?;
        assert_eq!(state.etag.as_deref(), Some(etag.as_str()));
        assert_eq!(state.data, json!({"count": 3}));

        let stale = reopened
            .write_state("state", &grain, &json!({"count": 0}), None)
            .await;
        assert!(matches!(stale, Err(GrainError::InconsistentState { .. })));

        reopened.clear_state("state", &grain, Some(&etag)).await?;
        let cleared = reopened.read_state("state", &grain).await?;
        assert!(cleared.etag.is_none());
        Ok(())
    }
}
