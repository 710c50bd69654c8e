//! Stream subscription repository.

use serde::{Deserialize, Serialize};
use silo_core::{GrainId, StreamId};
use surrealdb::sql::Thing;

use crate::{get_db, to_millis, DbError};

/// Repository for stream pub/sub subscriptions.
pub struct StreamRepository;

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct SubscriptionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    stream: StreamId,
    stream_key: String,
    grain: GrainId,
    grain_key: String,
    subscribed_at: i64,
}

fn record_key(stream: &StreamId, grain: &GrainId) -> String {
    format!("{}|{}", stream, grain)
}

impl StreamRepository {
    /// Subscribe `grain` to `stream`. Subscribing twice is a no-op.
    pub async fn subscribe(stream: &StreamId, grain: &GrainId) -> Result<(), DbError> {
        let db = get_db()?;

        let created: Result<Option<SubscriptionRecord>, surrealdb::Error> = db
            .create(("stream_subscription", record_key(stream, grain)))
            .content(SubscriptionRecord {
                id: None,
                stream: stream.clone(),
                stream_key: stream.to_string(),
                grain: grain.clone(),
                grain_key: grain.to_string(),
                subscribed_at: to_millis(chrono::Utc::now()),
            })
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(err) => {
                let existing: Option<SubscriptionRecord> = db
                    .select(("stream_subscription", record_key(stream, grain)))
                    .await?;
                match existing {
                    Some(_) => Ok(()),
                    None => Err(err.into()),
                }
            }
        }
    }

    /// Remove a subscription. Returns whether one existed.
    pub async fn unsubscribe(stream: &StreamId, grain: &GrainId) -> Result<bool, DbError> {
        let db = get_db()?;

        let removed: Option<SubscriptionRecord> = db
            .delete(("stream_subscription", record_key(stream, grain)))
            .await?;

        Ok(removed.is_some())
    }

    /// Subscribers of `stream` in subscription order.
    pub async fn subscribers(stream: &StreamId) -> Result<Vec<GrainId>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                "SELECT * FROM stream_subscription WHERE stream_key = $stream ORDER BY subscribed_at ASC, grain_key ASC",
            )
            .bind(("stream", stream.to_string()))
            .await?;

        let records: Vec<SubscriptionRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.grain).collect())
    }
}
