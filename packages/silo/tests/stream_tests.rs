#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use serde_json::json;
use silo::{GrainId, StreamId};

use common::{Cluster, eventually};

#[tokio::test]
async fn test_items_arrive_in_publish_order() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(24001).await?;
    let client = silo.client();

    for key in ["ann", "bob"] {
        client
            .call(&GrainId::new("listener", key), "join", json!("room"))
            .await?;
    }

    let streams = silo.streams();
    let stream = StreamId::new("chat", "room");
    for n in 0..10 {
        let item = streams.publish(&stream, json!(n)).await?;
        assert_eq!(item.sequence, n + 1);
    }

    let delivered = eventually(Duration::from_secs(2), || async {
        cluster.received.lock().len() == 20
    })
    .await;
    assert!(delivered);

    let received = cluster.received.lock().clone();
    for key in ["ann", "bob"] {
        let sequences: Vec<u64> = received
            .iter()
            .filter(|(listener, _, _)| listener == key)
            .map(|(_, sequence, _)| *sequence)
            .collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
    }

    silo.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unsubscribed_grains_stop_receiving() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(24002).await?;
    let listener = GrainId::new("listener", "carol");
    let stream = StreamId::new("chat", "quiet");

    silo.client().call(&listener, "join", json!("quiet")).await?;
    let streams = silo.streams();
    streams.publish(&stream, json!("hello")).await?;

    assert!(streams.unsubscribe(&stream, &listener).await?);
    assert!(!streams.unsubscribe(&stream, &listener).await?);
    streams.publish(&stream, json!("anyone?")).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let received = cluster.received.lock().clone();
    assert_eq!(received, vec![("carol".to_string(), 1, json!("hello"))]);

    silo.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_observers_see_items_without_subscribers() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(24003).await?;
    let mut items = silo.stream_items();
    let mut observed = silo.streams().observe();
    let stream = StreamId::new("metrics", "cpu");

    silo.streams().publish(&stream, json!({ "load": 0.5 })).await?;

    let item = tokio::time::timeout(Duration::from_secs(1), items.recv()).await??;
    assert_eq!(item.stream, stream);
    assert_eq!(item.sequence, 1);
    assert_eq!(item.payload, json!({ "load": 0.5 }));

    let same = tokio::time::timeout(Duration::from_secs(1), observed.recv()).await??;
    assert_eq!(same, item);

    // Nothing was activated to carry the item
    assert_eq!(silo.active_grains().await?, 0);
    assert_eq!(cluster.received.lock().len(), 0);

    silo.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_publishers_keep_sequence_order() -> Result<(), Box<dyn Error>> {
    let cluster = Cluster::new();
    let silo = cluster.start(24004).await?;
    silo.client()
        .call(&GrainId::new("listener", "dave"), "join", json!("busy"))
        .await?;
    let mut observed = silo.stream_items();

    let stream = StreamId::new("chat", "busy");
    let mut publishers = Vec::new();
    for n in 0..200 {
        let streams = silo.streams();
        let stream = stream.clone();
        publishers.push(tokio::spawn(async move { streams.publish(&stream, json!(n)).await }));
    }
    for publisher in publishers {
        publisher.await??;
    }

    let delivered = eventually(Duration::from_secs(5), || async {
        cluster.received.lock().len() == 200
    })
    .await;
    assert!(delivered);

    let expected: Vec<u64> = (1..=200).collect();
    let sequences: Vec<u64> = cluster
        .received
        .lock()
        .iter()
        .map(|(_, sequence, _)| *sequence)
        .collect();
    assert_eq!(sequences, expected);

    let mut local = Vec::new();
    while let Ok(item) = observed.try_recv() {
        local.push(item.sequence);
    }
    assert_eq!(local, expected);

    silo.shutdown().await?;
    Ok(())
}
