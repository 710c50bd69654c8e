//! Grain directory: where each grain is currently activated.

mod cache;
mod memory;
mod surreal;

use futures_util::future::BoxFuture;
use silo_core::{GrainAddress, GrainId, SiloAddress};

use crate::error::GrainError;

pub use cache::DirectoryCache;
pub use memory::InMemoryGrainDirectory;
pub use surreal::SurrealGrainDirectory;

/// Cluster-wide map from grain id to activation address.
///
/// Implementations must make `register` first-writer-wins: when a record
/// already exists, it is returned unchanged and the new address is dropped.
pub trait GrainDirectory: Send + Sync {
    /// Register `address` and return the record that owns the grain.
    fn register<'a>(
        &'a self,
        address: &'a GrainAddress,
    ) -> BoxFuture<'a, Result<GrainAddress, GrainError>>;

    /// Current record for `grain`.
    fn lookup<'a>(
        &'a self,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<Option<GrainAddress>, GrainError>>;

    /// Remove the record only if it names the same activation.
    fn unregister<'a>(&'a self, address: &'a GrainAddress) -> BoxFuture<'a, Result<bool, GrainError>>;

    /// Remove every record on `silo`, returning how many were removed.
    fn unregister_silo<'a>(&'a self, silo: &'a SiloAddress)
    -> BoxFuture<'a, Result<usize, GrainError>>;
}
