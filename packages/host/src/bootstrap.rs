//! Wires a silo from host configuration.

use std::sync::Arc;

use db::DbConfig;
use db::repositories::SurrealHumanRepository;
use silo::directory::SurrealGrainDirectory;
use silo::membership::SurrealMembershipTable;
use silo::persistence::{FileGrainStorage, ObjectStoreGrainStorage, SurrealGrainStorage};
use silo::reminders::SurrealReminderTable;
use silo::streams::SurrealStreamPubSub;
use silo::{DEFAULT_STORAGE_PROVIDER, SiloBuilder};

use crate::config::{HostConfig, StorageProvider};
use crate::error::HostError;
use crate::grains;
use crate::humans::InMemoryHumanRepository;

/// Default directory for the `file` provider.
const DEFAULT_STATE_DIR: &str = "./data/grain-state";

/// Build a silo from `config`, connecting the configured storage first.
///
/// `memory`, `file` and `object_store` keep the cluster tables in process,
/// which only suits a single silo. `surrealdb` puts every table in the
/// database so silos sharing it form one cluster.
pub async fn build(config: &HostConfig) -> Result<SiloBuilder, HostError> {
    let builder = SiloBuilder::new(config.silo_config());
    let connection = config.storage.connection.trim();

    tracing::info!("Using {:?} storage", config.storage.provider);
    let builder = match config.storage.provider {
        StorageProvider::Memory => {
            grains::register(builder, Arc::new(InMemoryHumanRepository::new()))
        }
        StorageProvider::Surrealdb => {
            let db_config = if connection.is_empty() {
                DbConfig::memory()
            } else {
                DbConfig::from_connection_string(connection)?
            };
            db::init(db_config).await?;

            let builder = builder
                .with_directory(Arc::new(SurrealGrainDirectory::new()))
                .with_membership_table(Arc::new(SurrealMembershipTable::new()))
                .with_reminder_table(Arc::new(SurrealReminderTable::new()))
                .with_pubsub(Arc::new(SurrealStreamPubSub::new()))
                .with_storage(DEFAULT_STORAGE_PROVIDER, Arc::new(SurrealGrainStorage::new()));
            grains::register(builder, Arc::new(SurrealHumanRepository::new()))
        }
        StorageProvider::File => {
            let dir = if connection.is_empty() {
                DEFAULT_STATE_DIR
            } else {
                connection
            };
            let storage = FileGrainStorage::new(dir);
            storage.init().await?;
            let builder = builder.with_storage(DEFAULT_STORAGE_PROVIDER, Arc::new(storage));
            grains::register(builder, Arc::new(InMemoryHumanRepository::new()))
        }
        StorageProvider::ObjectStore => {
            if connection.is_empty() {
                return Err(HostError::InvalidConfig(
                    "storage.connection is required for object_store".into(),
                ));
            }
            let store = storage::Storage::from_connection_string(connection).await?;
            let builder = builder.with_storage(
                DEFAULT_STORAGE_PROVIDER,
                Arc::new(ObjectStoreGrainStorage::new(store)),
            );
            grains::register(builder, Arc::new(InMemoryHumanRepository::new()))
        }
    };
    Ok(builder)
}
