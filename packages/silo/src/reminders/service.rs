//! Reminder service actor: runs the reminders this silo owns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use silo_core::{GrainId, ReminderEntry, SiloEvent, TickStatus};
use tokio::task::AbortHandle;

use crate::client::GrainClient;
use crate::hashing::rendezvous_owner;
use crate::messages::{GrainMessage, ReminderMessage};
use crate::runtime::SiloRuntime;

type ReminderKey = (GrainId, String);

/// A reminder scheduled on this silo.
struct RunningReminder {
    etag: String,
    task: AbortHandle,
}

/// State for the reminder service.
pub(crate) struct ReminderServiceState {
    runtime: Arc<SiloRuntime>,
    running: HashMap<ReminderKey, RunningReminder>,
}

impl ReminderServiceState {
    async fn refresh(&mut self) {
        let active = self.runtime.active_silos();
        if !active.contains(&self.runtime.silo) {
            self.stop_all();
            return;
        }

        let entries = match self.runtime.reminder_table.read_all().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read reminders on {}: {}", self.runtime.silo, e);
                return;
            }
        };

        let mut owned = HashSet::new();
        for entry in entries {
            let owner = rendezvous_owner(&entry.grain.to_string(), &active);
            if owner != Some(&self.runtime.silo) {
                continue;
            }

            let key = (entry.grain.clone(), entry.name.clone());
            owned.insert(key.clone());
            if let Some(running) = self.running.get(&key) {
                if running.etag == entry.etag {
                    continue;
                }
                running.task.abort();
            }

            let etag = entry.etag.clone();
            let task = tokio::spawn(run_reminder(self.runtime.clone(), entry));
            self.running.insert(
                key,
                RunningReminder {
                    etag,
                    task: task.abort_handle(),
                },
            );
        }

        self.running.retain(|key, running| {
            let keep = owned.contains(key);
            if !keep {
                running.task.abort();
            }
            keep
        });
    }

    fn stop_all(&mut self) {
        for (_, running) in self.running.drain() {
            running.task.abort();
        }
    }
}

/// Fire `entry` on schedule until aborted.
async fn run_reminder(runtime: Arc<SiloRuntime>, entry: ReminderEntry) {
    let client = GrainClient::new(runtime.clone());
    loop {
        let due = entry.next_tick_after(Utc::now());
        let wait = (due - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let status = TickStatus {
            first_tick: entry.start_at,
            period: entry.period(),
            current_tick_time: due,
        };
        let name = entry.name.clone();
        let delivered = client
            .deliver(&entry.grain, || GrainMessage::Reminder {
                name: name.clone(),
                status: status.clone(),
            })
            .await;

        match delivered {
            Ok(()) => runtime.emit(SiloEvent::ReminderFired {
                grain: entry.grain.clone(),
                name: entry.name.clone(),
                timestamp: Utc::now(),
            }),
            Err(e) => tracing::warn!(
                "Failed to deliver reminder {} to {}: {}",
                entry.name,
                entry.grain,
                e
            ),
        }
    }
}

/// The reminder service actor.
pub(crate) struct ReminderService;

impl Actor for ReminderService {
    type Msg = ReminderMessage;
    type State = ReminderServiceState;
    type Arguments = Arc<SiloRuntime>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        runtime: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let period = runtime.config.reminders.refresh_period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if myself.send_message(ReminderMessage::Refresh).is_err() {
                    break;
                }
            }
        });

        Ok(ReminderServiceState {
            runtime,
            running: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ReminderMessage::Refresh => state.refresh().await,
            ReminderMessage::RunningCount { reply } => {
                let _ = reply.send(state.running.len());
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.stop_all();
        tracing::info!("Reminder service for {} stopped", state.runtime.silo);
        Ok(())
    }
}
