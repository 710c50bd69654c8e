use chrono::{DateTime, Utc};
use db::repositories::MembershipRepository;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use silo_core::{MembershipEntry, MembershipView, SiloAddress, SiloStatus, Suspicion};

use super::MembershipTable;
use crate::error::SiloError;

/// Membership table stored in the `membership` table.
///
/// Requires `db::init` to have been called.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealMembershipTable;

impl SurrealMembershipTable {
    pub fn new() -> Self {
        Self
    }
}

impl MembershipTable for SurrealMembershipTable {
    fn read_all(&self) -> BoxFuture<'_, Result<MembershipView, SiloError>> {
        async move { Ok(MembershipRepository::read_all().await?) }.boxed()
    }

    fn upsert_entry<'a>(
        &'a self,
        entry: &'a MembershipEntry,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>> {
        async move { Ok(MembershipRepository::upsert(entry).await?) }.boxed()
    }

    fn update_i_am_alive<'a>(
        &'a self,
        silo: &'a SiloAddress,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), SiloError>> {
        async move { Ok(MembershipRepository::update_i_am_alive(silo, at).await?) }.boxed()
    }

    fn add_suspicion<'a>(
        &'a self,
        silo: &'a SiloAddress,
        suspicion: &'a Suspicion,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>> {
        async move { Ok(MembershipRepository::add_suspicion(silo, suspicion).await?) }.boxed()
    }

    fn set_status<'a>(
        &'a self,
        silo: &'a SiloAddress,
        status: SiloStatus,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>> {
        async move { Ok(MembershipRepository::set_status(silo, status).await?) }.boxed()
    }

    fn clean_dead(&self, before: DateTime<Utc>) -> BoxFuture<'_, Result<usize, SiloError>> {
        async move { Ok(MembershipRepository::clean_dead(before).await?) }.boxed()
    }
}
