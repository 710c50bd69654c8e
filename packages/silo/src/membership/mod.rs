//! Cluster membership: which silos are alive.

mod agent;
mod memory;
mod surreal;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use silo_core::{MembershipEntry, MembershipView, SiloAddress, SiloStatus, Suspicion};

use crate::error::SiloError;

pub(crate) use agent::{MembershipAgent, MembershipArgs};
pub use memory::InMemoryMembershipTable;
pub use surreal::SurrealMembershipTable;

/// Shared membership table.
///
/// Every mutation except heartbeats bumps the table version.
pub trait MembershipTable: Send + Sync {
    fn read_all(&self) -> BoxFuture<'_, Result<MembershipView, SiloError>>;

    /// Insert or replace a row.
    fn upsert_entry<'a>(
        &'a self,
        entry: &'a MembershipEntry,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>>;

    fn update_i_am_alive<'a>(
        &'a self,
        silo: &'a SiloAddress,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), SiloError>>;

    /// Append a vote and return the updated row.
    fn add_suspicion<'a>(
        &'a self,
        silo: &'a SiloAddress,
        suspicion: &'a Suspicion,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>>;

    fn set_status<'a>(
        &'a self,
        silo: &'a SiloAddress,
        status: SiloStatus,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>>;

    /// Delete `Dead` rows whose last heartbeat is older than `before`.
    fn clean_dead(&self, before: DateTime<Utc>) -> BoxFuture<'_, Result<usize, SiloError>>;
}

/// Votes needed to declare a peer dead when `active` silos (the suspect
/// included) are in the view.
pub(crate) fn votes_required(num_votes_for_death: usize, active: usize) -> usize {
    num_votes_for_death.min(active.saturating_sub(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_clusters_need_fewer_votes() {
        assert_eq!(votes_required(2, 5), 2);
        assert_eq!(votes_required(2, 3), 2);
        assert_eq!(votes_required(2, 2), 1);
        assert_eq!(votes_required(3, 1), 1);
    }
}
