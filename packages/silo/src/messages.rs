//! Message types for actor communication.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ractor::{ActorRef, RpcReplyPort};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use silo_core::{
    DeactivationReason, GrainAddress, GrainId, SiloAddress, SiloStatus, StreamItem, TickStatus,
};

use crate::error::{GrainError, SiloError};

/// Messages for a grain activation.
#[derive(Debug)]
pub enum GrainMessage {
    /// Request/response call.
    Invoke {
        method: String,
        payload: Value,
        reply: RpcReplyPort<Result<Value, GrainError>>,
    },

    /// Fire-and-forget call.
    OneWay { method: String, payload: Value },

    /// Reminder tick.
    Reminder { name: String, status: TickStatus },

    /// Timer tick.
    Timer { name: String, generation: u64 },

    /// Item from a subscribed stream.
    StreamItem { item: StreamItem },

    /// Leave memory after the current turn.
    Deactivate { reason: DeactivationReason },

    /// When the last turn finished.
    IdleSince { reply: RpcReplyPort<DateTime<Utc>> },
}

/// Answer to a `GetOrActivate` request.
#[derive(Debug, Clone)]
pub enum ActivationTarget {
    /// The grain is active on the answering silo.
    Local {
        actor: ActorRef<GrainMessage>,
        address: GrainAddress,
    },
    /// The grain lives elsewhere; ask that silo.
    Redirect(GrainAddress),
}

/// Snapshot of a catalog's activations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub activations: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// Messages for the Catalog.
#[derive(Debug)]
pub enum CatalogMessage {
    /// Find or create the activation of `grain`.
    GetOrActivate {
        grain: GrainId,
        forward_count: u8,
        reply: RpcReplyPort<Result<ActivationTarget, GrainError>>,
    },

    /// Activation counts.
    Stats { reply: RpcReplyPort<CatalogStats> },

    /// Liveness probe from a peer.
    Ping { reply: RpcReplyPort<SiloAddress> },

    /// Deactivate every activation and wait for them to stop.
    DeactivateAll {
        reason: DeactivationReason,
        reply: RpcReplyPort<usize>,
    },

    /// Drop activations that were idle too long.
    CollectIdle,
}

/// Messages for the MembershipAgent.
#[derive(Debug)]
pub enum MembershipMessage {
    /// Announce this silo and become `Active`.
    Join {
        reply: RpcReplyPort<Result<(), SiloError>>,
    },

    /// Write the I-am-alive timestamp and re-read the table.
    Heartbeat,

    /// Probe every active peer.
    Probe,

    /// Change this silo's status.
    SetStatus {
        status: SiloStatus,
        reply: RpcReplyPort<Result<(), SiloError>>,
    },
}

/// Messages for the ReminderService.
#[derive(Debug)]
pub enum ReminderMessage {
    /// Re-read the reminder table and adjust which reminders run here.
    Refresh,

    /// Number of reminders currently scheduled on this silo.
    RunningCount { reply: RpcReplyPort<usize> },
}
