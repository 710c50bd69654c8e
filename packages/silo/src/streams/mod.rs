//! Pub/sub streams.
//!
//! Subscriptions are durable (kept in a [`StreamPubSub`] table); items are
//! not. Each published item is delivered to every subscribed grain as a
//! one-way turn and to local observers.

mod memory;
mod surreal;

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::Value;
use silo_core::{GrainId, SiloEvent, StreamId, StreamItem};
use tokio::sync::broadcast;

use crate::client::GrainClient;
use crate::error::GrainError;
use crate::messages::GrainMessage;
use crate::runtime::SiloRuntime;

pub use memory::InMemoryStreamPubSub;
pub use surreal::SurrealStreamPubSub;

/// Subscription table.
pub trait StreamPubSub: Send + Sync {
    /// Subscribe `grain`. Subscribing twice is a no-op.
    fn subscribe<'a>(
        &'a self,
        stream: &'a StreamId,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<(), GrainError>>;

    /// Returns whether a subscription existed.
    fn unsubscribe<'a>(
        &'a self,
        stream: &'a StreamId,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<bool, GrainError>>;

    /// Subscribers in subscription order.
    fn subscribers<'a>(
        &'a self,
        stream: &'a StreamId,
    ) -> BoxFuture<'a, Result<Vec<GrainId>, GrainError>>;
}

/// Publishes to and manages subscriptions of streams.
#[derive(Clone)]
pub struct StreamProvider {
    runtime: Arc<SiloRuntime>,
}

impl StreamProvider {
    pub(crate) fn new(runtime: Arc<SiloRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn subscribe(&self, stream: &StreamId, grain: &GrainId) -> Result<(), GrainError> {
        self.runtime.pubsub.subscribe(stream, grain).await?;
        tracing::debug!("{} subscribed to {}", grain, stream);
        Ok(())
    }

    pub async fn unsubscribe(&self, stream: &StreamId, grain: &GrainId) -> Result<bool, GrainError> {
        self.runtime.pubsub.unsubscribe(stream, grain).await
    }

    /// Publish `payload` to `stream`.
    ///
    /// Items published from one silo are delivered in publish order: the
    /// stream's lane is held from sequence assignment until every
    /// subscriber has the item queued.
    pub async fn publish(&self, stream: &StreamId, payload: Value) -> Result<StreamItem, GrainError> {
        let lane = self.runtime.stream_lane(stream);
        let mut last_sequence = lane.lock().await;

        let subscribers = self.runtime.pubsub.subscribers(stream).await?;
        *last_sequence += 1;
        let sequence = *last_sequence;
        let item = StreamItem {
            stream: stream.clone(),
            sequence,
            payload,
            published_at: Utc::now(),
        };

        let client = GrainClient::new(self.runtime.clone());
        for grain in &subscribers {
            let delivered = client
                .deliver(grain, || GrainMessage::StreamItem { item: item.clone() })
                .await;
            if let Err(e) = delivered {
                tracing::warn!("Failed to deliver {} #{} to {}: {}", stream, sequence, grain, e);
            }
        }

        let _ = self.runtime.stream_items.send(item.clone());
        drop(last_sequence);

        self.runtime.emit(SiloEvent::StreamItemPublished {
            stream: stream.clone(),
            sequence,
            subscribers: subscribers.len(),
            timestamp: item.published_at,
        });
        Ok(item)
    }

    /// Observe every item published from this silo.
    pub fn observe(&self) -> broadcast::Receiver<StreamItem> {
        self.runtime.stream_items.subscribe()
    }
}
