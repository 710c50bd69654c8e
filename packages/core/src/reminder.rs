//! Durable reminder types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::GrainId;

/// A durable, periodic callback registered by a grain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderEntry {
    pub grain: GrainId,
    pub name: String,
    /// First due time.
    pub start_at: DateTime<Utc>,
    /// Period between ticks in milliseconds.
    pub period_ms: u64,
    /// Version token, replaced on every upsert.
    pub etag: String,
}

/// Tick information passed to a grain when a reminder fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickStatus {
    pub first_tick: DateTime<Utc>,
    pub period: Duration,
    pub current_tick_time: DateTime<Utc>,
}

/// A reminder schedule that cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReminderRangeError {
    #[error("reminder due time {0:?} is out of range")]
    Due(Duration),

    #[error("reminder period {0:?} is out of range")]
    Period(Duration),
}

impl ReminderEntry {
    /// Schedule a reminder `due` from now, repeating every `period`.
    ///
    /// Both durations must fit in `i64` milliseconds and the first tick must
    /// be a representable timestamp.
    pub fn new(
        grain: GrainId,
        name: impl Into<String>,
        due: Duration,
        period: Duration,
    ) -> Result<Self, ReminderRangeError> {
        let period_ms = u64::try_from(period.as_millis())
            .ok()
            .filter(|ms| i64::try_from(*ms).is_ok())
            .ok_or(ReminderRangeError::Period(period))?;
        let start_at = chrono::Duration::from_std(due)
            .ok()
            .and_then(|due| Utc::now().checked_add_signed(due))
            .ok_or(ReminderRangeError::Due(due))?;

        Ok(Self {
            grain,
            name: name.into(),
            start_at,
            period_ms,
            etag: ulid::Ulid::new().to_string(),
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// First tick strictly after `now`.
    ///
    /// Saturates at the largest representable timestamp.
    pub fn next_tick_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if now < self.start_at {
            return self.start_at;
        }
        let period_ms = i64::try_from(self.period_ms.max(1)).unwrap_or(i64::MAX);
        let elapsed_ms = (now - self.start_at).num_milliseconds();
        (elapsed_ms / period_ms)
            .checked_add(1)
            .and_then(|ticks| ticks.checked_mul(period_ms))
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|offset| self.start_at.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
