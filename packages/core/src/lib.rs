//! Core domain types for the silo runtime.
//!
//! This crate contains shared types used across all packages:
//! - Grain identities and activation addresses
//! - Silo addresses and the membership model
//! - Reminders, streams and persisted state envelopes
//! - Events for real-time observation
//! - The human/character repository contract

mod events;
mod grain;
mod human;
mod reminder;
mod silo;
mod state;
mod stream;

pub use events::SiloEvent;
pub use grain::{ActivationId, DeactivationReason, GrainAddress, GrainId, GrainType, IdParseError};
pub use human::{Character, Episode, Human, HumanInput, HumanRepository};
pub use reminder::{ReminderEntry, ReminderRangeError, TickStatus};
pub use silo::{MembershipEntry, MembershipView, SiloAddress, SiloStatus, Suspicion};
pub use state::GrainState;
pub use stream::{StreamId, StreamItem};
