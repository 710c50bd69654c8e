use std::collections::BTreeMap;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use silo_core::{GrainId, ReminderEntry};

use super::ReminderTable;
use crate::error::GrainError;

/// Reminder table held in memory.
#[derive(Debug, Default)]
pub struct InMemoryReminderTable {
    entries: Mutex<BTreeMap<(GrainId, String), ReminderEntry>>,
}

impl InMemoryReminderTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReminderTable for InMemoryReminderTable {
    fn upsert<'a>(&'a self, entry: &'a ReminderEntry) -> BoxFuture<'a, Result<String, GrainError>> {
        let etag = ulid::Ulid::new().to_string();
        let mut stored = entry.clone();
        stored.etag = etag.clone();
        self.entries
            .lock()
            .insert((entry.grain.clone(), entry.name.clone()), stored);
        futures_util::future::ready(Ok(etag)).boxed()
    }

    fn read_for_grain<'a>(
        &'a self,
        grain: &'a GrainId,
    ) -> BoxFuture<'a, Result<Vec<ReminderEntry>, GrainError>> {
        let found = self
            .entries
            .lock()
            .values()
            .filter(|e| &e.grain == grain)
            .cloned()
            .collect();
        futures_util::future::ready(Ok(found)).boxed()
    }

    fn read_all(&self) -> BoxFuture<'_, Result<Vec<ReminderEntry>, GrainError>> {
        let all = self.entries.lock().values().cloned().collect();
        futures_util::future::ready(Ok(all)).boxed()
    }

    fn remove<'a>(
        &'a self,
        grain: &'a GrainId,
        name: &'a str,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool, GrainError>> {
        let mut entries = self.entries.lock();
        let key = (grain.clone(), name.to_string());
        let matches = entries
            .get(&key)
            .is_some_and(|existing| etag.is_none_or(|etag| existing.etag == etag));
        let removed = matches && entries.remove(&key).is_some();
        futures_util::future::ready(Ok(removed)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn upsert_replaces_and_remove_checks_etag() -> Result<(), Box<dyn std::error::Error>> {
        let table = InMemoryReminderTable::new();
        let grain = GrainId::new("counter", "a");
        let entry = ReminderEntry::new(grain.clone(), "tick", Duration::ZERO, Duration::from_secs(60))?;

        let first = table.upsert(&entry).await?;
        let second = table.upsert(&entry).await?;
        assert_ne!(first, second);
        assert_eq!(table.read_for_grain(&grain).await?.len(), 1);

        assert!(!table.remove(&grain, "tick", Some(&first)).await?);
        assert!(table.remove(&grain, "tick", Some(&second)).await?);
        assert!(!table.remove(&grain, "tick", None).await?);
        assert!(table.read_all().await?.is_empty());
        Ok(())
    }
}
