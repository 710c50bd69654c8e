#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use db::DbConfig;
use serde_json::{Value, json};
use silo::directory::{GrainDirectory, SurrealGrainDirectory};
use silo::membership::SurrealMembershipTable;
use silo::persistence::SurrealGrainStorage;
use silo::reminders::SurrealReminderTable;
use silo::streams::{StreamPubSub, SurrealStreamPubSub};
use silo::{DEFAULT_STORAGE_PROVIDER, Fabric, GrainId, Silo, SiloBuilder, SiloError, StreamId};

use common::{CounterGrain, eventually, fast_config};

async fn start_surreal_silo(fabric: &Arc<Fabric>, port: u16) -> Result<Silo, SiloError> {
    SiloBuilder::new(fast_config(port))
        .with_fabric(fabric.clone())
        .with_directory(Arc::new(SurrealGrainDirectory::new()))
        .with_membership_table(Arc::new(SurrealMembershipTable::new()))
        .with_reminder_table(Arc::new(SurrealReminderTable::new()))
        .with_pubsub(Arc::new(SurrealStreamPubSub::new()))
        .with_storage(DEFAULT_STORAGE_PROVIDER, Arc::new(SurrealGrainStorage::new()))
        .with_default_grain::<CounterGrain>()
        .start()
        .await
}

// One test per binary: the global connection belongs to this test's runtime.
#[tokio::test]
async fn test_silos_sharing_surreal_tables() -> Result<(), Box<dyn Error>> {
    db::init(DbConfig::memory()).await?;
    let fabric = Arc::new(Fabric::new());
    let silos = vec![
        start_surreal_silo(&fabric, 26001).await?,
        start_surreal_silo(&fabric, 26002).await?,
    ];

    let joined = eventually(Duration::from_secs(3), || async {
        silos
            .iter()
            .all(|silo| silo.membership_view().active_silos().len() == 2)
    })
    .await;
    assert!(joined, "both silos should see each other through the table");

    // Single activation across the silos
    let grain = GrainId::new("counter", "surreal");
    let mut calls = Vec::new();
    for silo in &silos {
        let client = silo.client();
        let grain = grain.clone();
        calls.push(tokio::spawn(async move {
            client.call(&grain, "whoami", Value::Null).await
        }));
    }
    let mut answers = Vec::new();
    for call in calls {
        answers.push(call.await??);
    }
    assert_eq!(answers[0], answers[1]);
    let registered = SurrealGrainDirectory::new()
        .lookup(&grain)
        .await?
        .ok_or("not registered")?;
    assert_eq!(json!(registered.activation.to_string()), answers[0]["activation"]);

    // State survives reactivation
    let client = silos[1].client();
    assert_eq!(client.call(&grain, "add", json!(2)).await?, json!(2));
    client.call(&grain, "deactivate", Value::Null).await?;
    let gone = eventually(Duration::from_secs(2), || async {
        SurrealGrainDirectory::new().lookup(&grain).await.ok() == Some(None)
    })
    .await;
    assert!(gone, "deactivation should remove the directory entry");

    let again = silos[0].client().call(&grain, "whoami", Value::Null).await?;
    assert_ne!(again["activation"], answers[0]["activation"]);
    assert_eq!(silos[0].client().call(&grain, "get", Value::Null).await?, json!(2));

    // Subscriptions written by one silo are seen by the other
    let stream = StreamId::new("chat", "surreal");
    silos[0].streams().subscribe(&stream, &grain).await?;
    let item = silos[1].streams().publish(&stream, json!("hi")).await?;
    assert_eq!(item.sequence, 1);
    assert_eq!(SurrealStreamPubSub::new().subscribers(&stream).await?, vec![grain]);

    for silo in silos {
        silo.shutdown().await?;
    }
    Ok(())
}
