use std::collections::HashMap;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use silo_core::{GrainAddress, GrainId, SiloAddress};

use super::GrainDirectory;
use crate::error::GrainError;

/// Grain directory held in memory.
///
/// Share one instance (behind an `Arc`) between the silos of a cluster.
#[derive(Debug, Default)]
pub struct InMemoryGrainDirectory {
    entries: Mutex<HashMap<GrainId, GrainAddress>>,
}

impl InMemoryGrainDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl GrainDirectory for InMemoryGrainDirectory {
    fn register<'a>(
        &'a self,
        address: &'a GrainAddress,
    ) -> BoxFuture<'a, Result<GrainAddress, GrainError>> {
        let winner = self
            .entries
            .lock()
            .entry(address.grain.clone())
            .or_insert_with(|| address.clone())
            .clone();
        futures_util::future::ready(Ok(winner)).boxed()
    }

    fn lookup<'a>(
        &'a self,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<Option<GrainAddress>, GrainError>> {
        let found = self.entries.lock().get(grain).cloned();
        futures_util::future::ready(Ok(found)).boxed()
    }

    fn unregister<'a>(&'a self, address: &'a GrainAddress) -> BoxFuture<'a, Result<bool, GrainError>> {
        let mut entries = self.entries.lock();
        let matches = entries
            .get(&address.grain)
            .is_some_and(|current| current.activation == address.activation);
        let removed = matches && entries.remove(&address.grain).is_some();
        futures_util::future::ready(Ok(removed)).boxed()
    }

    fn unregister_silo<'a>(
        &'a self,
        silo: &'a SiloAddress,
    ) -> BoxFuture<'a, Result<usize, GrainError>> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, address| &address.silo != silo);
        let removed = before - entries.len();
        futures_util::future::ready(Ok(removed)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silo(port: u16) -> SiloAddress {
        SiloAddress::new("127.0.0.1", port).with_generation(1)
    }

    #[tokio::test]
    async fn first_writer_wins() -> Result<(), GrainError> {
        let directory = InMemoryGrainDirectory::new();
        let grain = GrainId::new("counter", "a");
        let first = GrainAddress::new_activation(grain.clone(), silo(1));
        let second = GrainAddress::new_activation(grain.clone(), silo(2));

        assert_eq!(directory.register(&first).await?, first);
        assert_eq!(directory.register(&second).await?, first);
        assert_eq!(directory.lookup(&grain).await?, Some(first.clone()));

        assert!(!directory.unregister(&second).await?);
        assert!(directory.unregister(&first).await?);
        assert_eq!(directory.lookup(&grain).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn unregister_silo_only_touches_that_silo() -> Result<(), GrainError> {
        let directory = InMemoryGrainDirectory::new();
        for key in ["a", "b", "c"] {
            let address = GrainAddress::new_activation(GrainId::new("counter", key), silo(1));
            directory.register(&address).await?;
        }
        let kept = GrainAddress::new_activation(GrainId::new("counter", "d"), silo(2));
        directory.register(&kept).await?;

        assert_eq!(directory.unregister_silo(&silo(1)).await?, 3);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.lookup(&kept.grain).await?, Some(kept));
        Ok(())
    }
}
