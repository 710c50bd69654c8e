//! Database schema definitions using SurrealQL.

use crate::{get_db, DbError};

/// Initialize the database schema.
///
/// Tables are schemaless; each repository owns the shape of its records.
/// Timestamps are stored as epoch milliseconds.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(MEMBERSHIP_SCHEMA).await?.check()?;
    db.query(DIRECTORY_SCHEMA).await?.check()?;
    db.query(GRAIN_STATE_SCHEMA).await?.check()?;
    db.query(REMINDER_SCHEMA).await?.check()?;
    db.query(STREAM_SCHEMA).await?.check()?;
    db.query(HUMAN_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Cluster membership table, one row per silo generation.
const MEMBERSHIP_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS membership SCHEMALESS;
DEFINE TABLE IF NOT EXISTS membership_version SCHEMALESS;

DEFINE INDEX IF NOT EXISTS membership_status ON membership FIELDS status;
"#;

/// Grain directory, keyed by grain id.
const DIRECTORY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS grain_directory SCHEMALESS;

DEFINE INDEX IF NOT EXISTS directory_silo ON grain_directory FIELDS silo_key;
"#;

/// Persisted grain state, keyed by provider-scoped grain id.
const GRAIN_STATE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS grain_state SCHEMALESS;
"#;

/// Durable reminders, keyed by grain id and reminder name.
const REMINDER_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS reminder SCHEMALESS;

DEFINE INDEX IF NOT EXISTS reminder_grain ON reminder FIELDS grain_key;
"#;

/// Stream subscriptions, one row per (stream, grain) pair.
const STREAM_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS stream_subscription SCHEMALESS;

DEFINE INDEX IF NOT EXISTS subscription_stream ON stream_subscription FIELDS stream_key;
"#;

/// Humans served by the repository contract.
const HUMAN_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS human SCHEMALESS;

DEFINE INDEX IF NOT EXISTS human_name ON human FIELDS name;
"#;
