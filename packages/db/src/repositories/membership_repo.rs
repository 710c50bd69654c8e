//! Membership repository: the cluster's shared table of silos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use silo_core::{MembershipEntry, MembershipView, SiloAddress, SiloStatus, Suspicion};
use surrealdb::sql::Thing;

use crate::{from_millis, get_db, to_millis, DbError};

/// Repository for membership table operations.
pub struct MembershipRepository;

#[derive(Debug, Serialize, Deserialize)]
struct SuspicionRecord {
    by: SiloAddress,
    at: i64,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct MembershipRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    silo: SiloAddress,
    name: String,
    status: SiloStatus,
    start_time: i64,
    i_am_alive: i64,
    #[serde(default)]
    suspicions: Vec<SuspicionRecord>,
}

impl From<&MembershipEntry> for MembershipRecord {
    fn from(entry: &MembershipEntry) -> Self {
        Self {
            id: None,
            silo: entry.silo.clone(),
            name: entry.name.clone(),
            status: entry.status,
            start_time: to_millis(entry.start_time),
            i_am_alive: to_millis(entry.i_am_alive),
            suspicions: entry
                .suspicions
                .iter()
                .map(|s| SuspicionRecord {
                    by: s.by.clone(),
                    at: to_millis(s.at),
                })
                .collect(),
        }
    }
}

impl From<MembershipRecord> for MembershipEntry {
    fn from(record: MembershipRecord) -> Self {
        Self {
            silo: record.silo,
            name: record.name,
            status: record.status,
            start_time: from_millis(record.start_time),
            i_am_alive: from_millis(record.i_am_alive),
            suspicions: record
                .suspicions
                .into_iter()
                .map(|s| Suspicion {
                    by: s.by,
                    at: from_millis(s.at),
                })
                .collect(),
        }
    }
}

/// Bumps the table version; every change other than a heartbeat does this.
const BUMP_VERSION: &str = "UPSERT membership_version:current SET version += 1;";

impl MembershipRepository {
    /// Insert or replace the row for `entry.silo`.
    pub async fn upsert(entry: &MembershipEntry) -> Result<MembershipEntry, DbError> {
        let db = get_db()?;

        let record: Option<MembershipRecord> = db
            .upsert(("membership", entry.silo.to_string()))
            .content(MembershipRecord::from(entry))
            .await?;
        db.query(BUMP_VERSION).await?.check()?;

        record
            .map(MembershipEntry::from)
            .ok_or_else(|| DbError::Query(format!("Failed to write membership for {}", entry.silo)))
    }

    /// Get one silo's row.
    pub async fn get(silo: &SiloAddress) -> Result<Option<MembershipEntry>, DbError> {
        let db = get_db()?;

        let record: Option<MembershipRecord> = db.select(("membership", silo.to_string())).await?;

        Ok(record.map(MembershipEntry::from))
    }

    /// Read the whole table together with its version.
    pub async fn read_all() -> Result<MembershipView, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT * FROM membership ORDER BY silo.generation ASC;
                SELECT VALUE version FROM membership_version:current;
                "#,
            )
            .await?;

        let records: Vec<MembershipRecord> = result.take(0)?;
        let versions: Vec<i64> = result.take(1)?;

        Ok(MembershipView {
            version: versions.first().copied().unwrap_or_default().max(0) as u64,
            entries: records.into_iter().map(MembershipEntry::from).collect(),
        })
    }

    /// Record a heartbeat. Does not change the table version.
    pub async fn update_i_am_alive(silo: &SiloAddress, at: DateTime<Utc>) -> Result<(), DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPDATE type::thing('membership', $key) SET i_am_alive = $at RETURN AFTER")
            .bind(("key", silo.to_string()))
            .bind(("at", to_millis(at)))
            .await?;

        let records: Vec<MembershipRecord> = result.take(0)?;
        if records.is_empty() {
            return Err(DbError::NotFound(format!("Silo not found: {}", silo)));
        }
        Ok(())
    }

    /// Append a suspicion vote against `silo` and return the updated row.
    pub async fn add_suspicion(
        silo: &SiloAddress,
        suspicion: &Suspicion,
    ) -> Result<MembershipEntry, DbError> {
        let db = get_db()?;

        let vote = SuspicionRecord {
            by: suspicion.by.clone(),
            at: to_millis(suspicion.at),
        };
        let mut result = db
            .query("UPDATE type::thing('membership', $key) SET suspicions += $vote RETURN AFTER")
            .query(BUMP_VERSION)
            .bind(("key", silo.to_string()))
            .bind(("vote", vote))
            .await?;

        let records: Vec<MembershipRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .map(MembershipEntry::from)
            .ok_or_else(|| DbError::NotFound(format!("Silo not found: {}", silo)))
    }

    /// Change a silo's status.
    pub async fn set_status(silo: &SiloAddress, status: SiloStatus) -> Result<MembershipEntry, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPDATE type::thing('membership', $key) SET status = $status RETURN AFTER")
            .query(BUMP_VERSION)
            .bind(("key", silo.to_string()))
            .bind(("status", status))
            .await?;

        let records: Vec<MembershipRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .map(MembershipEntry::from)
            .ok_or_else(|| DbError::NotFound(format!("Silo not found: {}", silo)))
    }

    /// Delete `Dead` rows whose last heartbeat is older than `before`.
    pub async fn clean_dead(before: DateTime<Utc>) -> Result<usize, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("DELETE membership WHERE status = 'dead' AND i_am_alive < $before RETURN BEFORE")
            .bind(("before", to_millis(before)))
            .await?;

        let removed: Vec<MembershipRecord> = result.take(0)?;
        if !removed.is_empty() {
            db.query(BUMP_VERSION).await?.check()?;
            tracing::info!("Removed {} dead silos from membership", removed.len());
        }
        Ok(removed.len())
    }
}
