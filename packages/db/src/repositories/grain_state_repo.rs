//! Grain state repository with etag-checked writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use silo_core::GrainState;
use surrealdb::sql::Thing;

use crate::{get_db, to_millis, DbError};

/// Repository for persisted grain state.
///
/// Keys are opaque to the repository; callers scope them by provider and
/// grain. The payload is stored as a JSON string.
pub struct GrainStateRepository;

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct GrainStateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    data: String,
    etag: String,
    updated_at: i64,
}

impl GrainStateRecord {
    fn into_state(self) -> Result<GrainState<Value>, DbError> {
        let data = serde_json::from_str(&self.data)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        Ok(GrainState {
            etag: Some(self.etag),
            data,
        })
    }
}

impl GrainStateRepository {
    /// Read the state stored under `key`.
    pub async fn read(key: &str) -> Result<Option<GrainState<Value>>, DbError> {
        let db = get_db()?;

        let record: Option<GrainStateRecord> = db.select(("grain_state", key.to_string())).await?;

        record.map(GrainStateRecord::into_state).transpose()
    }

    /// Write `data` if the stored etag equals `expected_etag`.
    ///
    /// `None` means the caller believes no record exists. Returns the new
    /// etag, or `DbError::Conflict` when the stored version differs.
    pub async fn write(
        key: &str,
        data: &Value,
        expected_etag: Option<&str>,
    ) -> Result<String, DbError> {
        let db = get_db()?;

        let data = serde_json::to_string(data).map_err(|e| DbError::Serialization(e.to_string()))?;
        let etag = GrainState::<Value>::next_etag();
        let now = to_millis(chrono::Utc::now());

        match expected_etag {
            None => {
                let created: Result<Option<GrainStateRecord>, surrealdb::Error> = db
                    .create(("grain_state", key.to_string()))
                    .content(GrainStateRecord {
                        id: None,
                        data,
                        etag: etag.clone(),
                        updated_at: now,
                    })
                    .await;
                match created {
                    Ok(_) => Ok(etag),
                    Err(err) => match Self::read(key).await? {
                        Some(existing) => Err(DbError::Conflict(format!(
                            "State {} already exists with etag {}",
                            key,
                            existing.etag.unwrap_or_default()
                        ))),
                        None => Err(err.into()),
                    },
                }
            }
            Some(expected) => {
                let mut result = db
                    .query(
                        r#"
                        UPDATE type::thing('grain_state', $key)
                        SET data = $data, etag = $etag, updated_at = $now
                        WHERE etag = $expected
                        RETURN AFTER
                        "#,
                    )
                    .bind(("key", key.to_string()))
                    .bind(("data", data))
                    .bind(("etag", etag.clone()))
                    .bind(("now", now))
                    .bind(("expected", expected.to_string()))
                    .await?;

                let updated: Vec<GrainStateRecord> = result.take(0)?;
                if updated.is_empty() {
                    return Err(DbError::Conflict(format!(
                        "State {} is not at etag {}",
                        key, expected
                    )));
                }
                Ok(etag)
            }
        }
    }

    /// Delete the state under `key` if the stored etag equals `expected_etag`.
    pub async fn clear(key: &str, expected_etag: Option<&str>) -> Result<(), DbError> {
        let db = get_db()?;

        match expected_etag {
            None => {
                if Self::read(key).await?.is_some() {
                    return Err(DbError::Conflict(format!(
                        "State {} exists but no etag was given",
                        key
                    )));
                }
                Ok(())
            }
            Some(expected) => {
                let mut result = db
                    .query("DELETE type::thing('grain_state', $key) WHERE etag = $expected RETURN BEFORE")
                    .bind(("key", key.to_string()))
                    .bind(("expected", expected.to_string()))
                    .await?;

                let removed: Vec<GrainStateRecord> = result.take(0)?;
                if removed.is_empty() {
                    return Err(DbError::Conflict(format!(
                        "State {} is not at etag {}",
                        key, expected
                    )));
                }
                Ok(())
            }
        }
    }
}
