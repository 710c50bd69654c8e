//! Grain directory repository.

use serde::{Deserialize, Serialize};
use silo_core::{ActivationId, GrainAddress, GrainId, SiloAddress};
use surrealdb::sql::Thing;

use crate::{get_db, DbError};

/// Repository for grain directory records.
///
/// Registration is first-writer-wins: the record id is the grain id, so a
/// second `create` for the same grain fails and the existing record is
/// returned instead.
pub struct DirectoryRepository;

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct DirectoryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    grain: GrainId,
    silo: SiloAddress,
    silo_key: String,
    activation: ActivationId,
}

impl From<&GrainAddress> for DirectoryRecord {
    fn from(address: &GrainAddress) -> Self {
        Self {
            id: None,
            grain: address.grain.clone(),
            silo: address.silo.clone(),
            silo_key: address.silo.to_string(),
            activation: address.activation,
        }
    }
}

impl From<DirectoryRecord> for GrainAddress {
    fn from(record: DirectoryRecord) -> Self {
        Self {
            grain: record.grain,
            silo: record.silo,
            activation: record.activation,
        }
    }
}

impl DirectoryRepository {
    /// Register `address`, returning whichever record owns the grain.
    pub async fn register(address: &GrainAddress) -> Result<GrainAddress, DbError> {
        let db = get_db()?;

        let created: Result<Option<DirectoryRecord>, surrealdb::Error> = db
            .create(("grain_directory", address.grain.to_string()))
            .content(DirectoryRecord::from(address))
            .await;

        match created {
            Ok(Some(record)) => Ok(record.into()),
            Ok(None) => Err(DbError::Query(format!(
                "Failed to register {}",
                address.grain
            ))),
            Err(err) => match Self::lookup(&address.grain).await? {
                Some(existing) => Ok(existing),
                None => Err(err.into()),
            },
        }
    }

    /// Look up the current activation of `grain`.
    pub async fn lookup(grain: &GrainId) -> Result<Option<GrainAddress>, DbError> {
        let db = get_db()?;

        let record: Option<DirectoryRecord> =
            db.select(("grain_directory", grain.to_string())).await?;

        Ok(record.map(GrainAddress::from))
    }

    /// Remove the record only if it still names `address.activation`.
    pub async fn unregister(address: &GrainAddress) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                "DELETE type::thing('grain_directory', $key) WHERE activation = $activation RETURN BEFORE",
            )
            .bind(("key", address.grain.to_string()))
            .bind(("activation", address.activation.to_string()))
            .await?;

        let removed: Vec<DirectoryRecord> = result.take(0)?;
        Ok(!removed.is_empty())
    }

    /// Remove every record hosted on `silo`.
    pub async fn unregister_silo(silo: &SiloAddress) -> Result<usize, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("DELETE grain_directory WHERE silo_key = $silo RETURN BEFORE")
            .bind(("silo", silo.to_string()))
            .await?;

        let removed: Vec<DirectoryRecord> = result.take(0)?;
        Ok(removed.len())
    }

    /// Count records hosted on `silo`.
    pub async fn count_for_silo(silo: &SiloAddress) -> Result<usize, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT count() AS count FROM grain_directory WHERE silo_key = $silo GROUP ALL")
            .bind(("silo", silo.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct Count {
            count: i64,
        }

        let counts: Vec<Count> = result.take(0)?;
        Ok(counts.first().map(|c| c.count.max(0) as usize).unwrap_or(0))
    }
}
