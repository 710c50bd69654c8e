#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use serde_json::{Value, json};
use silo::reminders::ReminderTable;
use silo::{GrainError, GrainId, SiloEvent};

use common::{Cluster, eventually};

#[tokio::test]
async fn test_reminder_fires_and_stops() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(23001).await?;
    let client = silo.client();
    let grain = GrainId::new("reminder", "r1");
    let mut events = silo.events();

    client.call(&grain, "start", Value::Null).await?;
    let entries = cluster.reminders.read_for_grain(&grain).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "wake");

    assert!(eventually(Duration::from_secs(3), || async { cluster.ticks() >= 3 }).await);
    assert_eq!(silo.running_reminders().await?, 1);

    let fired = tokio::time::timeout(Duration::from_secs(1), async {
        while let Ok(event) = events.recv().await {
            if let SiloEvent::ReminderFired { grain, name, .. } = event {
                return Some((grain, name));
            }
        }
        None
    })
    .await?;
    assert_eq!(fired, Some((grain.clone(), "wake".to_string())));

    assert_eq!(client.call(&grain, "stop", Value::Null).await?, Value::Bool(true));
    assert!(cluster.reminders.read_for_grain(&grain).await?.is_empty());
    assert!(
        eventually(Duration::from_secs(1), || async {
            silo.running_reminders().await.ok() == Some(0)
        })
        .await
    );

    let settled = cluster.ticks();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cluster.ticks(), settled);

    silo.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_reminder_reactivates_grain() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(23002).await?;
    let client = silo.client();
    let grain = GrainId::new("reminder", "sleepy");

    client.call(&grain, "start", Value::Null).await?;
    client.call(&grain, "deactivate", Value::Null).await?;
    assert!(
        eventually(Duration::from_secs(1), || async {
            silo.active_grains().await.ok() == Some(0)
        })
        .await
    );

    // The next tick brings the grain back
    let before = cluster.ticks();
    assert!(eventually(Duration::from_secs(3), || async { cluster.ticks() > before }).await);
    assert_eq!(silo.active_grains().await?, 1);

    client.call(&grain, "stop", Value::Null).await?;
    silo.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_reminder_period_below_minimum_is_rejected() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(23003).await?;
    let grain = GrainId::new("reminder", "eager");

    let result = silo.client().call(&grain, "too_fast", Value::Null).await;
    assert!(matches!(result, Err(GrainError::InvalidArgument(_))), "got {result:?}");
    assert!(cluster.reminders.read_for_grain(&grain).await?.is_empty());

    silo.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unrepresentable_reminder_schedules_are_rejected() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(23004).await?;
    let client = silo.client();
    let grain = GrainId::new("reminder", "extreme");

    let result = client.call(&grain, "forever", Value::Null).await;
    assert!(matches!(result, Err(GrainError::InvalidArgument(_))), "got {result:?}");
    let result = client.call(&grain, "far_future", Value::Null).await;
    assert!(matches!(result, Err(GrainError::InvalidArgument(_))), "got {result:?}");

    // The activation survives both rejections
    assert_eq!(client.call(&grain, "stop", Value::Null).await?, json!(false));
    assert!(cluster.reminders.read_for_grain(&grain).await?.is_empty());
    assert_eq!(silo.running_reminders().await?, 0);

    silo.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_reminders_survive_their_owner() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let first = cluster.start(23011).await?;
    let second = cluster.start(23012).await?;
    let grain = GrainId::new("reminder", "portable");

    first.client().call(&grain, "start", Value::Null).await?;
    assert!(eventually(Duration::from_secs(3), || async { cluster.ticks() >= 1 }).await);

    // Whichever silo owned it, the reminder keeps firing on the survivor
    first.shutdown().await?;
    assert!(
        eventually(Duration::from_secs(3), || async {
            second.running_reminders().await.ok() == Some(1)
        })
        .await
    );
    let before = cluster.ticks();
    assert!(eventually(Duration::from_secs(3), || async { cluster.ticks() > before }).await);

    second.client().call(&grain, "stop", Value::Null).await?;
    second.shutdown().await?;
    Ok(())
}
