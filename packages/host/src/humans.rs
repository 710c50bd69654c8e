//! In-process implementation of the human repository.

use std::collections::HashMap;
use std::convert::Infallible;

use parking_lot::RwLock;
use silo_core::{Character, Human, HumanInput, HumanRepository};
use tokio::sync::broadcast;

const CREATED_CHANNEL_CAPACITY: usize = 64;

/// Human repository kept in memory, for hosts without a database.
pub struct InMemoryHumanRepository {
    humans: RwLock<HashMap<String, Human>>,
    created: broadcast::Sender<Human>,
}

impl InMemoryHumanRepository {
    pub fn new() -> Self {
        let (created, _) = broadcast::channel(CREATED_CHANNEL_CAPACITY);
        Self {
            humans: RwLock::new(HashMap::new()),
            created,
        }
    }
}

impl Default for InMemoryHumanRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanRepository for InMemoryHumanRepository {
    type Error = Infallible;

    async fn create_human(&self, input: HumanInput) -> Result<Human, Infallible> {
        let human = Human::from_input(input);
        self.humans.write().insert(human.id.clone(), human.clone());
        let _ = self.created.send(human.clone());
        Ok(human)
    }

    async fn get_friends(&self, human: &Human) -> Result<Vec<Character>, Infallible> {
        let humans = self.humans.read();
        Ok(human
            .friends
            .iter()
            .filter_map(|id| humans.get(id))
            .map(Character::from)
            .collect())
    }

    async fn get_humans(&self, ids: &[String]) -> Result<Vec<Human>, Infallible> {
        let humans = self.humans.read();
        Ok(ids.iter().filter_map(|id| humans.get(id).cloned()).collect())
    }

    fn subscribe_created(&self) -> broadcast::Receiver<Human> {
        self.created.subscribe()
    }
}
