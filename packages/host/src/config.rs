//! Host configuration.
//!
//! Loaded from a TOML file overlaid by `SILO__`-prefixed environment
//! variables, with double underscores separating nested keys
//! (`SILO__CLUSTER__CLUSTER_ID` sets `cluster.cluster_id`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use silo::SiloConfig;
use silo::config::{
    ClusterOptions, CollectionOptions, EndpointOptions, MembershipOptions, MessagingOptions,
    ReminderOptions,
};

use crate::error::HostError;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "silo.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SILO";

/// Command line of the host binary.
#[derive(Debug, Parser)]
#[command(name = "silo-host", version, about = "Runs one silo of a grain cluster")]
pub struct Args {
    /// Path to the TOML config file
    #[arg(long, short, env = "SILO_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Everything the host reads at startup.
///
/// `cluster` and `storage` have no defaults; a config without them is
/// rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub cluster: ClusterOptions,
    pub storage: StorageOptions,
    #[serde(default)]
    pub endpoint: EndpointOptions,
    #[serde(default)]
    pub membership: MembershipOptions,
    #[serde(default)]
    pub collection: CollectionOptions,
    #[serde(default)]
    pub reminders: ReminderOptions,
    #[serde(default)]
    pub messaging: MessagingOptions,
    #[serde(default)]
    pub telemetry: TelemetryOptions,
    #[serde(default)]
    pub health: HealthOptions,
}

/// Which backend holds grain state and the cluster tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProvider {
    /// Everything in process memory.
    Memory,
    /// Every table and grain state in SurrealDB.
    Surrealdb,
    /// Grain state as JSON files; tables in memory.
    File,
    /// Grain state in an object store; tables in memory.
    ObjectStore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageOptions {
    pub provider: StorageProvider,
    /// Provider-specific: a SurrealDB endpoint, a directory, or an object
    /// store connection string.
    #[serde(default)]
    pub connection: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryOptions {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON lines; needs the `json-logs` feature.
    pub json: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthOptions {
    pub enabled: bool,
    pub address: SocketAddr,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl HostConfig {
    /// Load from `path` (or `silo.toml`) and the environment.
    ///
    /// An explicitly named file must exist. The default file is optional,
    /// so a host can be configured from the environment alone.
    pub fn load(path: Option<&Path>) -> Result<Self, HostError> {
        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        tracing::debug!("Loading config from {}", file.display());

        let builder = Config::builder()
            .add_source(File::from(file.as_path()).format(FileFormat::Toml).required(required))
            .add_source(Self::environment());
        Self::from_config(builder.build()?)
    }

    /// Parse a TOML document overlaid by the environment.
    pub fn from_toml(toml: &str) -> Result<Self, HostError> {
        let built = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(Self::environment())
            .build()?;
        Self::from_config(built)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn from_config(built: Config) -> Result<Self, HostError> {
        let config: HostConfig = built.try_deserialize()?;
        config.silo_config().validate().map_err(HostError::InvalidConfig)?;
        Ok(config)
    }

    /// Options handed to the silo builder.
    pub fn silo_config(&self) -> SiloConfig {
        SiloConfig {
            cluster: self.cluster.clone(),
            endpoint: self.endpoint.clone(),
            membership: self.membership.clone(),
            collection: self.collection.clone(),
            reminders: self.reminders.clone(),
            messaging: self.messaging.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn parses_required_and_optional_sections() {
        let config = HostConfig::from_toml(
            r#"
            [cluster]
            cluster_id = "prod"
            service_id = "orders"

            [storage]
            provider = "file"
            connection = "/var/lib/silo"

            [endpoint]
            port = 30000

            [membership]
            probe_period_ms = 500

            [telemetry]
            log_level = "debug"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.cluster.cluster_id, "prod");
        assert_eq!(config.storage.provider, StorageProvider::File);
        assert_eq!(config.storage.connection, "/var/lib/silo");
        assert_eq!(config.endpoint.port, 30000);
        assert_eq!(config.endpoint.host, "127.0.0.1");
        assert_eq!(config.membership.probe_period, Duration::from_millis(500));
        assert_eq!(config.telemetry.log_level, "debug");
        assert!(config.health.enabled);

        let silo = config.silo_config();
        assert_eq!(silo.cluster.service_id, "orders");
        assert_eq!(silo.endpoint.port, 30000);
    }

    #[test]
    fn missing_required_sections_fail() {
        let no_storage = HostConfig::from_toml(
            r#"
            [cluster]
            cluster_id = "prod"
            "#,
        );
        assert!(matches!(no_storage, Err(HostError::Config(_))));

        let no_cluster = HostConfig::from_toml(
            r#"
            [storage]
            provider = "memory"
            "#,
        );
        assert!(matches!(no_cluster, Err(HostError::Config(_))));
    }

    #[test]
    fn rejects_unknown_provider_and_invalid_values() {
        let unknown = HostConfig::from_toml(
            r#"
            [cluster]
            cluster_id = "prod"
            [storage]
            provider = "floppy"
            "#,
        );
        assert!(unknown.is_err());

        let zero_votes = HostConfig::from_toml(
            r#"
            [cluster]
            cluster_id = "prod"
            [storage]
            provider = "memory"
            [membership]
            num_votes_for_death = 0
            "#,
        );
        assert!(matches!(zero_votes, Err(HostError::InvalidConfig(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = HostConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(HostError::Config(_))));
    }
}
