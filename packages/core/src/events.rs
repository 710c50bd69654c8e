//! Event types for real-time observation of a silo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeactivationReason, GrainAddress, GrainId, SiloAddress, SiloStatus, StreamId};

/// Events emitted by a silo for real-time observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SiloEvent {
    // Membership events
    /// A silo's status changed in the membership table.
    SiloStatusChanged {
        silo: SiloAddress,
        old_status: SiloStatus,
        new_status: SiloStatus,
        timestamp: DateTime<Utc>,
    },
    /// A peer was voted dead.
    SiloDeclaredDead {
        silo: SiloAddress,
        by: SiloAddress,
        timestamp: DateTime<Utc>,
    },

    // Activation events
    /// A grain was activated on this silo.
    GrainActivated {
        address: GrainAddress,
        timestamp: DateTime<Utc>,
    },
    /// A grain left memory.
    GrainDeactivated {
        address: GrainAddress,
        reason: DeactivationReason,
        timestamp: DateTime<Utc>,
    },
    /// `on_activate` failed for a grain.
    ActivationFailed {
        grain: GrainId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    // Reminder and stream events
    /// A reminder tick was delivered.
    ReminderFired {
        grain: GrainId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// An item was published to a stream.
    StreamItemPublished {
        stream: StreamId,
        sequence: u64,
        subscribers: usize,
        timestamp: DateTime<Utc>,
    },
}

impl SiloEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SiloEvent::SiloStatusChanged { timestamp, .. } => *timestamp,
            SiloEvent::SiloDeclaredDead { timestamp, .. } => *timestamp,
            SiloEvent::GrainActivated { timestamp, .. } => *timestamp,
            SiloEvent::GrainDeactivated { timestamp, .. } => *timestamp,
            SiloEvent::ActivationFailed { timestamp, .. } => *timestamp,
            SiloEvent::ReminderFired { timestamp, .. } => *timestamp,
            SiloEvent::StreamItemPublished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the grain associated with this event, if any.
    pub fn grain(&self) -> Option<&GrainId> {
        match self {
            SiloEvent::GrainActivated { address, .. } => Some(&address.grain),
            SiloEvent::GrainDeactivated { address, .. } => Some(&address.grain),
            SiloEvent::ActivationFailed { grain, .. } => Some(grain),
            SiloEvent::ReminderFired { grain, .. } => Some(grain),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            SiloEvent::SiloStatusChanged {
                silo, new_status, ..
            } => format!("Silo {} -> {}", silo, new_status),
            SiloEvent::SiloDeclaredDead { silo, by, .. } => {
                format!("Silo {} declared dead by {}", silo, by)
            }
            SiloEvent::GrainActivated { address, .. } => {
                format!("Grain {} activated on {}", address.grain, address.silo)
            }
            SiloEvent::GrainDeactivated {
                address, reason, ..
            } => format!("Grain {} deactivated: {}", address.grain, reason),
            SiloEvent::ActivationFailed { grain, error, .. } => {
                format!("Grain {} failed to activate: {}", grain, error)
            }
            SiloEvent::ReminderFired { grain, name, .. } => {
                format!("Reminder {} fired for {}", name, grain)
            }
            SiloEvent::StreamItemPublished {
                stream,
                sequence,
                subscribers,
                ..
            } => format!(
                "Stream {} item #{} to {} subscribers",
                stream, sequence, subscribers
            ),
        }
    }
}
