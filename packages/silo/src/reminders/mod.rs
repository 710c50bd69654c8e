//! Durable reminders.
//!
//! Reminders live in a shared table. Each one is fired by exactly one silo:
//! the rendezvous-hash owner of the grain among the active silos.

mod memory;
mod service;
mod surreal;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use silo_core::{GrainId, ReminderEntry};

use crate::error::GrainError;
use crate::messages::ReminderMessage;
use crate::runtime::SiloRuntime;

pub use memory::InMemoryReminderTable;
pub(crate) use service::ReminderService;
pub use surreal::SurrealReminderTable;

/// Shared reminder storage.
pub trait ReminderTable: Send + Sync {
    /// Insert or replace a reminder and return its new etag.
    fn upsert<'a>(&'a self, entry: &'a ReminderEntry) -> BoxFuture<'a, Result<String, GrainError>>;

    fn read_for_grain<'a>(
        &'a self,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<Vec<ReminderEntry>, GrainError>>;

    fn read_all(&self) -> BoxFuture<'_, Result<Vec<ReminderEntry>, GrainError>>;

    /// Remove a reminder. With `Some(etag)`, only if the etag matches.
    fn remove<'a>(
        &'a self,
        grain: &'a GrainId,
        name: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool, GrainError>>;
}

/// Register or replace a reminder for `grain`.
pub(crate) async fn register(
    runtime: &Arc<SiloRuntime>,
    grain: &GrainId,
    name: &str,
    due: Duration,
    period: Duration,
) -> Result<ReminderEntry, GrainError> {
    let minimum = runtime.config.reminders.minimum_reminder_period;
    if period < minimum {
        return Err(GrainError::InvalidArgument(format!(
            "reminder period {:?} is below the minimum of {:?}",
            period, minimum
        )));
    }
    if name.is_empty() {
        return Err(GrainError::InvalidArgument("reminder name must not be empty".into()));
    }

    let mut entry = ReminderEntry::new(grain.clone(), name, due, period)
        .map_err(|e| GrainError::InvalidArgument(e.to_string()))?;
    entry.etag = runtime.reminder_table.upsert(&entry).await?;
    tracing::debug!("Registered reminder {} for {}", name, grain);

    notify_services(runtime);
    Ok(entry)
}

/// Remove a reminder of `grain`. Returns whether it existed.
pub(crate) async fn unregister(
    runtime: &Arc<SiloRuntime>,
    grain: &GrainId,
    name: &str,
) -> Result<bool, GrainError> {
    let removed = runtime.reminder_table.remove(grain, name, None).await?;
    if removed {
        tracing::debug!("Unregistered reminder {} for {}", name, grain);
        notify_services(runtime);
    }
    Ok(removed)
}

/// Ask every active silo to re-read the reminder table.
fn notify_services(runtime: &SiloRuntime) {
    for silo in runtime.active_silos() {
        if let Some(endpoint) = runtime.fabric.get(&silo) {
            let _ = endpoint.reminders.send_message(ReminderMessage::Refresh);
        }
    }
}
