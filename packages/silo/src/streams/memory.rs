use std::collections::HashMap;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use silo_core::{GrainId, StreamId};

use super::StreamPubSub;
use crate::error::GrainError;

/// Subscription table held in memory.
#[derive(Debug, Default)]
pub struct InMemoryStreamPubSub {
    subscriptions: Mutex<HashMap<StreamId, Vec<GrainId>>>,
}

impl InMemoryStreamPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamPubSub for InMemoryStreamPubSub {
    fn subscribe<'a>(
        &'a self,
        stream: &'a StreamId,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<(), GrainError>> {
        let mut subscriptions = self.subscriptions.lock();
        let subscribers = subscriptions.entry(stream.clone()).or_default();
        if !subscribers.contains(grain) {
            subscribers.push(grain.clone());
        }
        futures_util::future::ready(Ok(())).boxed()
    }

    fn unsubscribe<'a>(
        &'a self,
        stream: &'a StreamId,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<bool, GrainError>> {
        let mut subscriptions = self.subscriptions.lock();
        let removed = match subscriptions.get_mut(stream) {
            Some(subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|g| g != grain);
                before != subscribers.len()
            }
            None => false,
        };
        futures_util::future::ready(Ok(removed)).boxed()
    }

    fn subscribers<'a>(
        &'a self,
        stream: &'a StreamId,
    ) -> BoxFuture<'a, Result<Vec<GrainId>, GrainError>> {
        let subscribers = self
            .subscriptions
            .lock()
            .get(stream)
            .cloned()
            .unwrap_or_default();
        futures_util::future::ready(Ok(subscribers)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_keep_subscription_order() -> Result<(), GrainError> {
        let pubsub = InMemoryStreamPubSub::new();
        let stream = StreamId::new("chat", "lobby");
        let b = GrainId::new("member", "b");
        let a = GrainId::new("member", "a");

        pubsub.subscribe(&stream, &b).await?;
        pubsub.subscribe(&stream, &a).await?;
        pubsub.subscribe(&stream, &b).await?;
        assert_eq!(pubsub.subscribers(&stream).await?, vec![b.clone(), a.clone()]);

        assert!(pubsub.unsubscribe(&stream, &b).await?);
        assert!(!pubsub.unsubscribe(&stream, &b).await?);
        assert_eq!(pubsub.subscribers(&stream).await?, vec![a]);
        Ok(())
    }
}
