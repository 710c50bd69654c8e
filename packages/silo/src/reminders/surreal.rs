use db::repositories::ReminderRepository;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use silo_core::{GrainId, ReminderEntry};

use super::ReminderTable;
use crate::error::GrainError;

/// Reminder table stored in the `reminder` table.
///
/// Requires `db::init` to have been called.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealReminderTable;

impl SurrealReminderTable {
    pub fn new() -> Self {
        Self
    }
}

fn reminder_error(err: db::DbError) -> GrainError {
    GrainError::Reminder(err.to_string())
}

impl ReminderTable for SurrealReminderTable {
    fn upsert<'a>(&'a self, entry: &'a ReminderEntry) -> BoxFuture<'a, Result<String, GrainError>> {
        async move { ReminderRepository::upsert(entry).await.map_err(reminder_error) }.boxed()
    }

    fn read_for_grain<'a>(
        &'a self,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<Vec<ReminderEntry>, GrainError>> {
        async move {
            ReminderRepository::read_for_grain(grain)
                .await
                .map_err(reminder_error)
        }
        .boxed()
    }

    fn read_all(&self) -> BoxFuture<'_, Result<Vec<ReminderEntry>, GrainError>> {
        async move { ReminderRepository::read_all().await.map_err(reminder_error) }.boxed()
    }

    fn remove<'a>(
        &'a self,
        grain: &'a GrainId,
        name: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool, GrainError>> {
        async move {
            ReminderRepository::remove(grain, name, etag)
                .await
                .map_err(reminder_error)
        }
        .boxed()
    }
}
