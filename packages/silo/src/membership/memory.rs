use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use silo_core::{MembershipEntry, MembershipView, SiloAddress, SiloStatus, Suspicion};

use super::MembershipTable;
use crate::error::SiloError;

/// Membership table held in memory.
///
/// Share one instance (behind an `Arc`) between the silos of a cluster.
#[derive(Debug, Default)]
pub struct InMemoryMembershipTable {
    view: Mutex<MembershipView>,
}

impl InMemoryMembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, silo: &SiloAddress, change: F) -> Result<MembershipEntry, SiloError>
    where
        F: FnOnce(&mut MembershipEntry),
    {
        let mut view = self.view.lock();
        let entry = view
            .entries
            .iter_mut()
            .find(|e| &e.silo == silo)
            .ok_or_else(|| not_found(silo))?;
        change(entry);
        let updated = entry.clone();
        view.version += 1;
        Ok(updated)
    }
}

fn not_found(silo: &SiloAddress) -> SiloError {
    SiloError::Membership(format!("Silo not found: {}", silo))
}

impl MembershipTable for InMemoryMembershipTable {
    fn read_all(&self) -> BoxFuture<'_, Result<MembershipView, SiloError>> {
        let view = self.view.lock().clone();
        futures_util::future::ready(Ok(view)).boxed()
    }

    fn upsert_entry<'a>(
        &'a self,
        entry: &'a MembershipEntry,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>> {
        let mut view = self.view.lock();
        match view.entries.iter_mut().find(|e| e.silo == entry.silo) {
            Some(existing) => *existing = entry.clone(),
            None => view.entries.push(entry.clone()),
        }
        view.version += 1;
        futures_util::future::ready(Ok(entry.clone())).boxed()
    }

    fn update_i_am_alive<'a>(
        &'a self,
        silo: &'a SiloAddress,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), SiloError>> {
        let mut view = self.view.lock();
        let result = match view.entries.iter_mut().find(|e| &e.silo == silo) {
            Some(entry) => {
                entry.i_am_alive = at;
                Ok(())
            }
            None => Err(not_found(silo)),
        };
        futures_util::future::ready(result).boxed()
    }

    fn add_suspicion<'a>(
        &'a self,
        silo: &'a SiloAddress,
        suspicion: &'a Suspicion,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>> {
        let result = self.update(silo, |entry| entry.suspicions.push(suspicion.clone()));
        futures_util::future::ready(result).boxed()
    }

    fn set_status<'a>(
        &'a self,
        silo: &'a SiloAddress,
        status: SiloStatus,
    ) -> BoxFuture<'a, Result<MembershipEntry, SiloError>> {
        let result = self.update(silo, |entry| entry.status = status);
        futures_util::future::ready(result).boxed()
    }

    fn clean_dead(&self, before: DateTime<Utc>) -> BoxFuture<'_, Result<usize, SiloError>> {
        let mut view = self.view.lock();
        let count = view.entries.len();
        view.entries
            .retain(|e| !(e.status == SiloStatus::Dead && e.i_am_alive < before));
        let removed = count - view.entries.len();
        if removed > 0 {
            view.version += 1;
        }
        futures_util::future::ready(Ok(removed)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutations_bump_the_version_but_heartbeats_do_not() -> Result<(), SiloError> {
        let table = InMemoryMembershipTable::new();
        let silo = SiloAddress::new("127.0.0.1", 11111).with_generation(1);
        let peer = SiloAddress::new("127.0.0.1", 11112).with_generation(1);

        table.upsert_entry(&MembershipEntry::new(silo.clone(), "a")).await?;
        let v1 = table.read_all().await?.version;

        table.update_i_am_alive(&silo, Utc::now()).await?;
        assert_eq!(table.read_all().await?.version, v1);

        let suspicion = Suspicion {
            by: peer.clone(),
            at: Utc::now(),
        };
        let entry = table.add_suspicion(&silo, &suspicion).await?;
        assert_eq!(entry.suspicions.len(), 1);

        table.set_status(&silo, SiloStatus::Dead).await?;
        let view = table.read_all().await?;
        assert_eq!(view.version, v1 + 2);
        assert_eq!(view.dead_silos(), vec![silo.clone()]);

        assert!(table.set_status(&peer, SiloStatus::Active).await.is_err());

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(table.clean_dead(later).await?, 1);
        assert!(table.read_all().await?.entries.is_empty());
        Ok(())
    }
}
