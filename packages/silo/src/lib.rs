//! Virtual-actor runtime built on ractor.
//!
//! A silo hosts grain activations. Grains are addressed by [`GrainId`] and
//! activated on demand on whichever silo placement picks; the directory
//! makes sure each grain has at most one activation in the cluster.
//!
//! # Architecture
//!
//! - `Catalog` - Per-silo actor owning the activation table
//! - `GrainActivation` - One actor per activation; its mailbox gives turn-based execution
//! - `MembershipAgent` - Heartbeats, probes peers and votes on dead silos
//! - `ReminderService` - Fires the durable reminders this silo owns
//!
//! # Usage
//!
//! ```ignore
//! use silo::{SiloBuilder, SiloConfig};
//!
//! let silo = SiloBuilder::new(SiloConfig::default())
//!     .with_default_grain::<Counter>()
//!     .start()
//!     .await?;
//!
//! let value = silo.client().call(&GrainId::new("counter", "a"), "add", json!(1)).await?;
//! silo.shutdown().await?;
//! ```
//!
//! [`GrainId`]: silo_core::GrainId

mod activation;
mod catalog;
mod client;
pub mod config;
pub mod directory;
mod error;
mod fabric;
mod grain;
mod hashing;
pub mod membership;
mod messages;
pub mod persistence;
mod placement;
mod registry;
pub mod reminders;
mod runtime;
mod silo;
pub mod streams;

pub use client::{GrainClient, MAX_FORWARD_COUNT};
pub use config::SiloConfig;
pub use error::{GrainError, SiloError};
pub use fabric::{Fabric, SiloEndpoint};
pub use grain::{DEFAULT_STATE_NAME, Grain, GrainContext};
pub use hashing::{rendezvous_owner, rendezvous_score};
pub use messages::{CatalogMessage, CatalogStats, ReminderMessage};
pub use persistence::{DEFAULT_STORAGE_PROVIDER, PersistentState};
pub use placement::PlacementStrategy;
pub use registry::GrainRegistry;
pub use silo::{Silo, SiloBuilder, SiloMonitor};

pub use silo_core::*;
