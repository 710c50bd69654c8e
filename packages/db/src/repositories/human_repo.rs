//! SurrealDB implementation of the human repository contract.

use serde::{Deserialize, Serialize};
use silo_core::{Character, Episode, Human, HumanInput, HumanRepository};
use surrealdb::sql::Thing;
use tokio::sync::broadcast;

use crate::{get_db, DbError};

/// Capacity of the created-human broadcast channel.
const CREATED_CHANNEL_CAPACITY: usize = 64;

/// Human repository backed by the global database.
#[derive(Debug, Clone)]
pub struct SurrealHumanRepository {
    created: broadcast::Sender<Human>,
}

/// Internal record type for SurrealDB.
///
/// The human id doubles as the record key and is kept as a plain field so
/// it can be matched in `WHERE ... IN` queries.
#[derive(Debug, Serialize, Deserialize)]
struct HumanRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    human_id: String,
    name: String,
    #[serde(default)]
    home_planet: Option<String>,
    #[serde(default)]
    appears_in: Vec<Episode>,
    #[serde(default)]
    friends: Vec<String>,
}

impl From<&Human> for HumanRecord {
    fn from(human: &Human) -> Self {
        Self {
            id: None,
            human_id: human.id.clone(),
            name: human.name.clone(),
            home_planet: human.home_planet.clone(),
            appears_in: human.appears_in.clone(),
            friends: human.friends.clone(),
        }
    }
}

impl From<HumanRecord> for Human {
    fn from(record: HumanRecord) -> Self {
        Self {
            id: record.human_id,
            name: record.name,
            home_planet: record.home_planet,
            appears_in: record.appears_in,
            friends: record.friends,
        }
    }
}

impl SurrealHumanRepository {
    pub fn new() -> Self {
        let (created, _) = broadcast::channel(CREATED_CHANNEL_CAPACITY);
        Self { created }
    }
}

impl Default for SurrealHumanRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanRepository for SurrealHumanRepository {
    type Error = DbError;

    async fn create_human(&self, input: HumanInput) -> Result<Human, DbError> {
        let db = get_db()?;
        let human = Human::from_input(input);

        let record: Option<HumanRecord> = db
            .create(("human", human.id.clone()))
            .content(HumanRecord::from(&human))
            .await?;
        let created: Human = record
            .map(Human::from)
            .ok_or_else(|| DbError::Query(format!("Failed to create human {}", human.name)))?;

        tracing::debug!("Created human {} ({})", created.name, created.id);
        // No receivers is fine
        let _ = self.created.send(created.clone());

        Ok(created)
    }

    async fn get_friends(&self, human: &Human) -> Result<Vec<Character>, DbError> {
        let friends = self.get_humans(&human.friends).await?;

        // Keep the order of the friends list
        Ok(human
            .friends
            .iter()
            .filter_map(|id| friends.iter().find(|f| &f.id == id))
            .map(Character::from)
            .collect())
    }

    async fn get_humans(&self, ids: &[String]) -> Result<Vec<Human>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM human WHERE human_id IN $ids")
            .bind(("ids", ids.to_vec()))
            .await?;

        let records: Vec<HumanRecord> = result.take(0)?;
        Ok(records.into_iter().map(Human::from).collect())
    }

    fn subscribe_created(&self) -> broadcast::Receiver<Human> {
        self.created.subscribe()
    }
}
