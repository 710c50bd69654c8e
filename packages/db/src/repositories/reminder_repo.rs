//! Reminder table repository.

use serde::{Deserialize, Serialize};
use silo_core::{GrainId, ReminderEntry};
use surrealdb::sql::Thing;

use crate::{from_millis, get_db, to_millis, DbError};

/// Repository for durable reminders.
pub struct ReminderRepository;

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct ReminderRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    grain: GrainId,
    grain_key: String,
    name: String,
    start_at: i64,
    period_ms: u64,
    etag: String,
}

impl From<ReminderRecord> for ReminderEntry {
    fn from(record: ReminderRecord) -> Self {
        Self {
            grain: record.grain,
            name: record.name,
            start_at: from_millis(record.start_at),
            period_ms: record.period_ms,
            etag: record.etag,
        }
    }
}

fn record_key(grain: &GrainId, name: &str) -> String {
    format!("{}#{}", grain, name)
}

impl ReminderRepository {
    /// Insert or replace a reminder, returning its new etag.
    pub async fn upsert(entry: &ReminderEntry) -> Result<String, DbError> {
        let db = get_db()?;

        let etag = ulid::Ulid::new().to_string();
        let record: Option<ReminderRecord> = db
            .upsert(("reminder", record_key(&entry.grain, &entry.name)))
            .content(ReminderRecord {
                id: None,
                grain: entry.grain.clone(),
                grain_key: entry.grain.to_string(),
                name: entry.name.clone(),
                start_at: to_millis(entry.start_at),
                period_ms: entry.period_ms,
                etag: etag.clone(),
            })
            .await?;

        record
            .map(|r| r.etag)
            .ok_or_else(|| DbError::Query(format!("Failed to write reminder {}", entry.name)))
    }

    /// Get one reminder.
    pub async fn get(grain: &GrainId, name: &str) -> Result<Option<ReminderEntry>, DbError> {
        let db = get_db()?;

        let record: Option<ReminderRecord> = db.select(("reminder", record_key(grain, name))).await?;

        Ok(record.map(ReminderEntry::from))
    }

    /// All reminders registered by `grain`.
    pub async fn read_for_grain(grain: &GrainId) -> Result<Vec<ReminderEntry>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM reminder WHERE grain_key = $grain ORDER BY name ASC")
            .bind(("grain", grain.to_string()))
            .await?;

        let records: Vec<ReminderRecord> = result.take(0)?;
        Ok(records.into_iter().map(ReminderEntry::from).collect())
    }

    /// Every reminder in the cluster.
    pub async fn read_all() -> Result<Vec<ReminderEntry>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM reminder ORDER BY grain_key ASC, name ASC")
            .await?;

        let records: Vec<ReminderRecord> = result.take(0)?;
        Ok(records.into_iter().map(ReminderEntry::from).collect())
    }

    /// Remove a reminder, optionally only at `etag`. Returns whether a row was deleted.
    pub async fn remove(grain: &GrainId, name: &str, etag: Option<&str>) -> Result<bool, DbError> {
        let db = get_db()?;

        let query = match etag {
            Some(_) => "DELETE type::thing('reminder', $key) WHERE etag = $etag RETURN BEFORE",
            None => "DELETE type::thing('reminder', $key) RETURN BEFORE",
        };
        let mut result = db
            .query(query)
            .bind(("key", record_key(grain, name)))
            .bind(("etag", etag.unwrap_or_default().to_string()))
            .await?;

        let removed: Vec<ReminderRecord> = result.take(0)?;
        Ok(!removed.is_empty())
    }
}
