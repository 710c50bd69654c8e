//! Database connection management with lazy initialization.

use std::sync::LazyLock;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Global database instance shared by every silo in the process.
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: `mem://`, `rocksdb://path`, `file://path` or a remote URL
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "silo".to_string(),
            database: "cluster".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for file-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Build a config from a connection string.
    ///
    /// Accepts a bare endpoint (`mem://`, `rocksdb://data/silo`) or
    /// `;`-separated `key=value` pairs: `endpoint`, `namespace`, `database`,
    /// `username`, `password`.
    pub fn from_connection_string(connection: &str) -> Result<Self, DbError> {
        let connection = connection.trim();
        if connection.is_empty() {
            return Err(DbError::Config("empty connection string".into()));
        }
        if !connection.contains('=') {
            return Ok(Self {
                endpoint: connection.to_string(),
                ..Default::default()
            });
        }

        let mut config = Self::default();
        let mut username = None;
        let mut password = None;
        for pair in connection.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| DbError::Config(format!("expected key=value, got '{pair}'")))?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => config.endpoint = value,
                "namespace" | "ns" => config.namespace = value,
                "database" | "db" => config.database = value,
                "username" | "user" => username = Some(value),
                "password" | "pass" => password = Some(value),
                other => {
                    return Err(DbError::Config(format!("unknown connection key '{other}'")));
                }
            }
        }
        match (username, password) {
            (Some(user), Some(pass)) => config.credentials = Some((user, pass)),
            (None, None) => {}
            _ => {
                return Err(DbError::Config(
                    "username and password must be given together".into(),
                ));
            }
        }
        Ok(config)
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Invalid database config: {0}")]
    Config(String),
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Version conflict: {0}")]
    Conflict(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Initialize the database connection.
///
/// The first call connects; later calls return the existing connection
/// regardless of `config`.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        // Authenticate if credentials provided
        if let Some((username, password)) = &config.credentials {
            db.signin(Root {
                username,
                password,
            })
            .await?;
        }

        db.use_ns(&config.namespace).use_db(&config.database).await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(db)
    })
    .await
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}

/// Try to get the database connection.
///
/// Returns None if the database hasn't been initialized yet.
pub fn try_get_db() -> Option<&'static Database> {
    DB.get()
}
