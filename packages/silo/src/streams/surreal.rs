use db::repositories::StreamRepository;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use silo_core::{GrainId, StreamId};

use super::StreamPubSub;
use crate::error::GrainError;

/// Subscription table stored in the `stream_subscription` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealStreamPubSub;

impl SurrealStreamPubSub {
    pub fn new() -> Self {
        Self
    }
}

fn stream_error(err: db::DbError) -> GrainError {
    GrainError::Stream(err.to_string())
}

impl StreamPubSub for SurrealStreamPubSub {
    fn subscribe<'a>(
        &'a self,
        stream: &'a StreamId,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<(), GrainError>> {
        async move {
            StreamRepository::subscribe(stream, grain)
                .await
                .map_err(stream_error)
        }
        .boxed()
    }

    fn unsubscribe<'a>(
        &'a self,
        stream: &'a StreamId,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<bool, GrainError>> {
        async move {
            StreamRepository::unsubscribe(stream, grain)
                .await
                .map_err(stream_error)
        }
        .boxed()
    }

    fn subscribers<'a>(
        &'a self,
        stream: &'a StreamId,
    ) -> BoxFuture<'a, Result<Vec<GrainId>, GrainError>> {
        async move { StreamRepository::subscribers(stream).await.map_err(stream_error) }.boxed()
    }
}
