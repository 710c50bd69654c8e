//! Object storage for grain state blobs.
//!
//! Wraps `object_store` so the silo can keep grain state in S3-compatible
//! buckets, on the local filesystem, or in memory for tests. Values are JSON
//! documents addressed by `/`-separated keys under an optional prefix.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutMode, PutOptions, PutPayload};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

impl S3Config {
    /// S3 settings for `bucket`, with the rest taken from the environment.
    ///
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (default: true when the endpoint is `http://`)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`
    pub fn from_env(bucket: impl Into<String>) -> Result<Self, StorageError> {
        let region = env_non_empty("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = env_non_empty("S3_ENDPOINT");
        let allow_http = match parse_bool_env("S3_ALLOW_HTTP")? {
            Some(v) => v,
            None => endpoint
                .as_deref()
                .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
        };

        Ok(Self {
            bucket: bucket.into(),
            region,
            endpoint,
            allow_http,
            access_key_id: env_non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_non_empty("AWS_SECRET_ACCESS_KEY"),
            session_token: env_non_empty("AWS_SESSION_TOKEN"),
            virtual_hosted_style: parse_bool_env("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from a connection string.
    ///
    /// - `memory` or `mem://`
    /// - `fs://<root>` or `file://<root>`
    /// - `s3://<bucket>[/<prefix>]`, remaining settings from [`S3Config::from_env`]
    pub fn from_connection_string(connection: &str) -> Result<Self, StorageError> {
        let connection = connection.trim();
        match connection.split_once("://") {
            None if connection.eq_ignore_ascii_case("memory") => Ok(Self::memory()),
            Some(("mem" | "memory", _)) => Ok(Self::memory()),
            Some(("fs" | "file", root)) if !root.is_empty() => Ok(Self::filesystem(root)),
            Some(("s3", rest)) => {
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() {
                    return Err(StorageError::InvalidConfig(format!(
                        "missing bucket in '{connection}'"
                    )));
                }
                Ok(Self::s3(S3Config::from_env(bucket)?).with_prefix(prefix))
            }
            _ => Err(StorageError::InvalidConfig(format!(
                "unsupported storage connection '{connection}' (expected memory|fs://path|s3://bucket)"
            ))),
        }
    }
}

/// Handle to a configured object store.
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?) as _),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        tracing::debug!("Opened {} object store", kind.as_str());

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub async fn from_connection_string(connection: &str) -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_connection_string(connection)?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}"),
            _ => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    /// Read an object, or `None` if it does not exist.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.to_path(key)?;
        match self.store.get(&path).await {
            Ok(res) => Ok(Some(res.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.put(&path, PutPayload::from(bytes)).await?;
        Ok(())
    }

    /// Write an object only if nothing exists at `key`.
    pub async fn create_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        let opts = PutOptions::from(PutMode::Create);
        match self.store.put_opts(&path, PutPayload::from(bytes), opts).await {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(StorageError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an object. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.to_path(key)?;
        if self.get_bytes(key).await?.is_none() {
            return Ok(false);
        }
        match self.store.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.put_bytes(key, Bytes::from(bytes)).await
    }

    /// Like [`Storage::write_json`] but fails with `AlreadyExists` if `key` is taken.
    pub async fn create_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.create_bytes(key, Bytes::from(bytes)).await
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_non_empty(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().and_then(non_empty)
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
    };

    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(StorageError::InvalidConfig(format!(
            "invalid boolean for {var_name}={v} (expected true/false)"
        ))),
    }
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    #[tokio::test]
    async fn missing_object_reads_as_none() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        assert!(storage.get_bytes("counter/a").await?.is_none());
        assert!(storage.read_json::<Counter>("counter/a").await?.is_none());
        assert!(!storage.delete("counter/a").await?);
        Ok(())
    }

    #[tokio::test]
    async fn create_refuses_existing_key() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        storage.create_json("counter/a", &Counter { count: 1 }).await?;
        let second = storage.create_json("counter/a", &Counter { count: 2 }).await;
        assert!(matches!(second, Err(StorageError::AlreadyExists(_))));
        assert_eq!(
            storage.read_json::<Counter>("counter/a").await?,
            Some(Counter { count: 1 })
        );
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_json_with_prefix() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let cfg = StorageConfig::filesystem(dir.path()).with_prefix("grains/");
        let storage = Storage::new(cfg).await?;

        storage.write_json("counter/a", &Counter { count: 7 }).await?;
        assert!(dir.path().join("grains/counter/a").exists());
        assert_eq!(
            storage.read_json::<Counter>("counter/a").await?,
            Some(Counter { count: 7 })
        );

        assert!(storage.delete("counter/a").await?);
        assert!(storage.read_json::<Counter>("counter/a").await?.is_none());
        Ok(())
    }

    #[test]
    fn parses_connection_strings() {
        assert!(matches!(
            StorageConfig::from_connection_string("memory").map(|c| c.backend),
            Ok(StorageBackendConfig::Memory)
        ));
        match StorageConfig::from_connection_string("fs://./data/state").map(|c| c.backend) {
            Ok(StorageBackendConfig::Filesystem { root }) => {
                assert_eq!(root, PathBuf::from("./data/state"))
            }
            other => panic!("unexpected backend: {other:?}"),
        }
        assert!(matches!(
            StorageConfig::from_connection_string("ftp://host"),
            Err(StorageError::InvalidConfig(_))
        ));
        assert!(matches!(
            StorageConfig::from_connection_string("s3://"),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
