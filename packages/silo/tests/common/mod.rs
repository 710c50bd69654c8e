#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use silo::directory::InMemoryGrainDirectory;
use silo::membership::InMemoryMembershipTable;
use silo::persistence::{GrainStorage, MemoryGrainStorage};
use silo::reminders::InMemoryReminderTable;
use silo::streams::InMemoryStreamPubSub;
use silo::{
    DEFAULT_STORAGE_PROVIDER, Fabric, Grain, GrainContext, GrainError, PersistentState, Silo,
    SiloBuilder, SiloConfig, SiloError, StreamId, StreamItem, TickStatus,
};

/// Config with short periods so failure detection runs in test time.
pub fn fast_config(port: u16) -> SiloConfig {
    let mut config = SiloConfig::default().with_endpoint("127.0.0.1", port);
    config.membership.i_am_alive_period = Duration::from_millis(100);
    config.membership.probe_period = Duration::from_millis(50);
    config.membership.probe_timeout = Duration::from_millis(50);
    config.membership.num_missed_probes_limit = 2;
    config.membership.num_votes_for_death = 2;
    config.reminders.refresh_period = Duration::from_millis(100);
    config.reminders.minimum_reminder_period = Duration::from_millis(50);
    config.messaging.response_timeout = Duration::from_secs(5);
    config
}

/// Tables shared by the silos of one test cluster.
#[derive(Clone)]
pub struct Cluster {
    pub fabric: Arc<Fabric>,
    pub directory: Arc<InMemoryGrainDirectory>,
    pub membership: Arc<InMemoryMembershipTable>,
    pub reminders: Arc<InMemoryReminderTable>,
    pub pubsub: Arc<InMemoryStreamPubSub>,
    pub storage: Arc<MemoryGrainStorage>,
    pub reminder_ticks: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<(String, u64, Value)>>>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            fabric: Arc::new(Fabric::new()),
            directory: Arc::new(InMemoryGrainDirectory::new()),
            membership: Arc::new(InMemoryMembershipTable::new()),
            reminders: Arc::new(InMemoryReminderTable::new()),
            pubsub: Arc::new(InMemoryStreamPubSub::new()),
            storage: Arc::new(MemoryGrainStorage::new()),
            reminder_ticks: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Builder wired to the shared tables with every test grain registered.
    pub fn builder(&self, config: SiloConfig) -> SiloBuilder {
        let ticks = self.reminder_ticks.clone();
        let received = self.received.clone();
        SiloBuilder::new(config)
            .with_fabric(self.fabric.clone())
            .with_directory(self.directory.clone())
            .with_membership_table(self.membership.clone())
            .with_reminder_table(self.reminders.clone())
            .with_pubsub(self.pubsub.clone())
            .with_storage(DEFAULT_STORAGE_PROVIDER, self.storage.clone() as Arc<dyn GrainStorage>)
            .with_default_grain::<CounterGrain>()
            .with_default_grain::<SlowCounterGrain>()
            .with_default_grain::<FailingGrain>()
            .with_default_grain::<TimerGrain>()
            .with_grain(move |_| ReminderGrain {
                ticks: ticks.clone(),
            })
            .with_grain(move |_| ListenerGrain {
                received: received.clone(),
            })
    }

    pub async fn start(&self, port: u16) -> Result<Silo, SiloError> {
        self.builder(fast_config(port)).start().await
    }

    pub fn ticks(&self) -> usize {
        self.reminder_ticks.load(Ordering::SeqCst)
    }
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterState {
    pub count: i64,
}

/// Counter persisted in the default provider.
#[derive(Default)]
pub struct CounterGrain {
    state: Option<PersistentState<CounterState>>,
}

impl Grain for CounterGrain {
    fn grain_type() -> &'static str {
        "counter"
    }

    async fn on_activate(&mut self, ctx: &mut GrainContext) -> Result<(), GrainError> {
        self.state = Some(ctx.state(DEFAULT_STORAGE_PROVIDER).await?);
        Ok(())
    }

    async fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        payload: Value,
    ) -> Result<Value, GrainError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| GrainError::application("state not loaded"))?;
        match method {
            "add" => {
                state.count += payload.as_i64().unwrap_or(1);
                state.write().await?;
                Ok(json!(state.count))
            }
            "get" => Ok(json!(state.count)),
            "whoami" => Ok(json!({
                "silo": ctx.silo(),
                "activation": ctx.activation_id().to_string(),
            })),
            "deactivate" => {
                ctx.deactivate_on_idle();
                Ok(Value::Null)
            }
            "missing_provider" => {
                let _: PersistentState<CounterState> = ctx.state("Missing").await?;
                Ok(Value::Null)
            }
            other => Err(GrainError::unknown_method(ctx.id(), other)),
        }
    }
}

/// Counter whose increments yield mid-turn.
#[derive(Default)]
pub struct SlowCounterGrain {
    count: u64,
    in_turn: bool,
    overlaps: u64,
}

impl Grain for SlowCounterGrain {
    fn grain_type() -> &'static str {
        "slow_counter"
    }

    async fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        _payload: Value,
    ) -> Result<Value, GrainError> {
        match method {
            "incr" => {
                if self.in_turn {
                    self.overlaps += 1;
                }
                self.in_turn = true;
                let before = self.count;
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.count = before + 1;
                self.in_turn = false;
                Ok(json!(self.count))
            }
            "get" => Ok(json!({ "count": self.count, "overlaps": self.overlaps })),
            other => Err(GrainError::unknown_method(ctx.id(), other)),
        }
    }
}

/// Grain whose activation always fails.
#[derive(Default)]
pub struct FailingGrain;

impl Grain for FailingGrain {
    fn grain_type() -> &'static str {
        "failing"
    }

    async fn on_activate(&mut self, _ctx: &mut GrainContext) -> Result<(), GrainError> {
        Err(GrainError::application("refusing to start"))
    }

    async fn invoke(
        &mut self,
        _ctx: &mut GrainContext,
        _method: &str,
        _payload: Value,
    ) -> Result<Value, GrainError> {
        Ok(Value::Null)
    }
}

/// Counts its timer ticks.
#[derive(Default)]
pub struct TimerGrain {
    ticks: u64,
}

impl Grain for TimerGrain {
    fn grain_type() -> &'static str {
        "timer"
    }

    async fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        _payload: Value,
    ) -> Result<Value, GrainError> {
        match method {
            "start" => {
                ctx.register_timer("tick", Duration::from_millis(10), Duration::from_millis(20));
                Ok(Value::Null)
            }
            "replace" => {
                // Let ticks of the first timer queue up behind this turn
                ctx.register_timer("tick", Duration::ZERO, Duration::from_millis(1));
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.register_timer("tick", Duration::from_secs(60), Duration::from_secs(60));
                Ok(Value::Null)
            }
            "stop" => Ok(json!(ctx.cancel_timer("tick"))),
            "ticks" => Ok(json!(self.ticks)),
            other => Err(GrainError::unknown_method(ctx.id(), other)),
        }
    }

    async fn on_timer(&mut self, _ctx: &mut GrainContext, _name: &str) -> Result<(), GrainError> {
        self.ticks += 1;
        Ok(())
    }
}

/// Registers a reminder and counts ticks in a shared counter.
pub struct ReminderGrain {
    ticks: Arc<AtomicUsize>,
}

impl Grain for ReminderGrain {
    fn grain_type() -> &'static str {
        "reminder"
    }

    async fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        _payload: Value,
    ) -> Result<Value, GrainError> {
        match method {
            "start" => {
                let entry = ctx
                    .register_reminder("wake", Duration::from_millis(50), Duration::from_millis(100))
                    .await?;
                Ok(json!(entry.etag))
            }
            "stop" => Ok(json!(ctx.unregister_reminder("wake").await?)),
            "too_fast" => {
                ctx.register_reminder("fast", Duration::ZERO, Duration::from_millis(1))
                    .await?;
                Ok(Value::Null)
            }
            "forever" => {
                ctx.register_reminder("forever", Duration::ZERO, Duration::MAX)
                    .await?;
                Ok(Value::Null)
            }
            "far_future" => {
                let due = Duration::from_secs(1_000_000_000_000_000);
                ctx.register_reminder("far", due, Duration::from_secs(60))
                    .await?;
                Ok(Value::Null)
            }
            "deactivate" => {
                ctx.deactivate_on_idle();
                Ok(Value::Null)
            }
            other => Err(GrainError::unknown_method(ctx.id(), other)),
        }
    }

    async fn receive_reminder(
        &mut self,
        _ctx: &mut GrainContext,
        name: &str,
        _status: TickStatus,
    ) -> Result<(), GrainError> {
        if name == "wake" {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Subscribes to a stream and records what it receives.
pub struct ListenerGrain {
    received: Arc<Mutex<Vec<(String, u64, Value)>>>,
}

impl Grain for ListenerGrain {
    fn grain_type() -> &'static str {
        "listener"
    }

    async fn invoke(
        &mut self,
        ctx: &mut GrainContext,
        method: &str,
        payload: Value,
    ) -> Result<Value, GrainError> {
        match method {
            "join" => {
                let key = payload.as_str().unwrap_or("lobby");
                ctx.subscribe(&StreamId::new("chat", key)).await?;
                Ok(Value::Null)
            }
            other => Err(GrainError::unknown_method(ctx.id(), other)),
        }
    }

    async fn on_stream_item(
        &mut self,
        ctx: &mut GrainContext,
        item: StreamItem,
    ) -> Result<(), GrainError> {
        self.received
            .lock()
            .push((ctx.id().key.clone(), item.sequence, item.payload));
        Ok(())
    }
}
