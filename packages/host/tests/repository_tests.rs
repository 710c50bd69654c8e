#![allow(clippy::disallowed_methods)]

use std::error::Error;
use std::sync::Arc;

use serde_json::{Value, json};
use silo::{GrainId, SiloBuilder, SiloConfig};
use silo_core::{Character, Episode, Human, HumanInput, HumanRepository};

use host::humans::InMemoryHumanRepository;

/// Compiles only if `R` satisfies the repository contract.
fn assert_repository<R: HumanRepository + 'static>() {}

#[test]
fn test_repository_contract_is_implemented() {
    assert_repository::<InMemoryHumanRepository>();
    assert_repository::<db::repositories::SurrealHumanRepository>();
}

fn input(name: &str, friends: Vec<String>) -> HumanInput {
    HumanInput {
        name: name.to_string(),
        home_planet: Some("Tatooine".to_string()),
        appears_in: vec![Episode::NewHope],
        friends,
    }
}

#[tokio::test]
async fn test_memory_repository_round_trip() -> Result<(), Box<dyn Error>> {
    let repository = InMemoryHumanRepository::new();
    let mut created = repository.subscribe_created();

    let leia = repository.create_human(input("Leia", vec![])).await?;
    let han = repository.create_human(input("Han", vec![])).await?;
    let luke = repository
        .create_human(input("Luke", vec![han.id.clone(), "missing".into(), leia.id.clone()]))
        .await?;

    assert_eq!(created.recv().await?.name, "Leia");
    assert_eq!(created.recv().await?.name, "Han");
    assert_eq!(created.recv().await?, luke);

    let friends = repository.get_friends(&luke).await?;
    assert_eq!(
        friends,
        vec![Character::from(&han), Character::from(&leia)]
    );

    let found = repository
        .get_humans(&[luke.id.clone(), "missing".into()])
        .await?;
    assert_eq!(found, vec![luke]);
    Ok(())
}

#[tokio::test]
async fn test_human_grain_fronts_repository() -> Result<(), Box<dyn Error>> {
    let repository = Arc::new(InMemoryHumanRepository::new());
    let builder = SiloBuilder::new(SiloConfig::default().with_endpoint("127.0.0.1", 25101));
    let silo = host::grains::register(builder, repository.clone()).start().await?;
    let client = silo.client();
    let grain = GrainId::new("human", "rebels");

    let leia: Human = client.invoke(&grain, "create", &input("Leia", vec![])).await?;
    let luke: Human = client
        .invoke(&grain, "create", &input("Luke", vec![leia.id.clone()]))
        .await?;

    let friends: Vec<Character> = client.invoke(&grain, "friends", &luke.id).await?;
    assert_eq!(friends, vec![Character::from(&leia)]);

    let humans: Vec<Human> = client.invoke(&grain, "get", &[leia.id.clone()]).await?;
    assert_eq!(humans, vec![leia]);

    let missing = client.call(&grain, "friends", json!("nobody")).await;
    assert!(missing.is_err());
    let unknown = client.call(&grain, "delete", Value::Null).await;
    assert!(unknown.is_err());

    silo.shutdown().await?;
    Ok(())
}
