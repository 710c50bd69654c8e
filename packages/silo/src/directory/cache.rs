use std::collections::HashMap;

use parking_lot::RwLock;
use silo_core::{GrainAddress, GrainId, SiloAddress};

/// Local cache of directory lookups.
///
/// Entries are dropped when a send to them fails or their silo dies.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    entries: RwLock<HashMap<GrainId, GrainAddress>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, grain: &GrainId) -> Option<GrainAddress> {
        self.entries.read().get(grain).cloned()
    }

    pub fn put(&self, address: GrainAddress) {
        self.entries.write().insert(address.grain.clone(), address);
    }

    pub fn invalidate(&self, grain: &GrainId) -> bool {
        self.entries.write().remove(grain).is_some()
    }

    /// Drop every entry pointing at `silo`.
    pub fn invalidate_silo(&self, silo: &SiloAddress) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, address| &address.silo != silo);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_silo_drops_only_its_entries() {
        let cache = DirectoryCache::new();
        let a = SiloAddress::new("127.0.0.1", 1).with_generation(1);
        let b = SiloAddress::new("127.0.0.1", 2).with_generation(1);
        cache.put(GrainAddress::new_activation(GrainId::new("t", "1"), a.clone()));
        cache.put(GrainAddress::new_activation(GrainId::new("t", "2"), a.clone()));
        cache.put(GrainAddress::new_activation(GrainId::new("t", "3"), b.clone()));

        assert_eq!(cache.invalidate_silo(&a), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&GrainId::new("t", "3")).map(|e| e.silo), Some(b));
        assert!(cache.invalidate(&GrainId::new("t", "3")));
        assert!(cache.is_empty());
    }
}
