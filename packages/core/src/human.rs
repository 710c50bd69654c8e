//! Human/character repository contract.
//!
//! The runtime does not depend on this contract; it is the data-access
//! surface that application grains are written against. The `db` crate
//! provides a SurrealDB implementation.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// Film a character appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Episode {
    NewHope,
    Empire,
    Jedi,
}

/// Payload for creating a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_planet: Option<String>,
    #[serde(default)]
    pub appears_in: Vec<Episode>,
    /// Ids of existing characters.
    #[serde(default)]
    pub friends: Vec<String>,
}

/// A persisted human record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Human {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_planet: Option<String>,
    #[serde(default)]
    pub appears_in: Vec<Episode>,
    #[serde(default)]
    pub friends: Vec<String>,
}

impl Human {
    /// Build a record from input with a fresh id.
    pub fn from_input(input: HumanInput) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            name: input.name,
            home_planet: input.home_planet,
            appears_in: input.appears_in,
            friends: input.friends,
        }
    }
}

/// Summary of any character, as returned in friends lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
}

impl From<&Human> for Character {
    fn from(human: &Human) -> Self {
        Self {
            id: human.id.clone(),
            name: human.name.clone(),
        }
    }
}

/// Data-access contract for humans and their friends.
pub trait HumanRepository: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a new human and return the stored record.
    fn create_human(
        &self,
        input: HumanInput,
    ) -> impl Future<Output = Result<Human, Self::Error>> + Send;

    /// Resolve the friends of `human`; unknown ids are skipped.
    fn get_friends(
        &self,
        human: &Human,
    ) -> impl Future<Output = Result<Vec<Character>, Self::Error>> + Send;

    /// Fetch the humans matching `ids`, in no particular order.
    fn get_humans(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<Human>, Self::Error>> + Send;

    /// Receive every human created after subscribing.
    #[cfg(feature = "subscriptions")]
    fn subscribe_created(&self) -> tokio::sync::broadcast::Receiver<Human>;
}
