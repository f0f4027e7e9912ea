//! Durable outbox of external-facing events.

use std::collections::BTreeMap;
use std::sync::Mutex;

use case_core::{OutboxEntry, OutboxStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The outbox table: durable events awaiting acknowledgement by a
/// downstream adapter.
#[derive(Default)]
pub struct OutboxStore {
    entries: Mutex<BTreeMap<Uuid, OutboxEntry>>,
}

impl OutboxStore {
    /// An empty outbox store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new outbox entry.
    pub fn append(&self, entry: OutboxEntry) {
        self.entries.lock().expect("outbox mutex poisoned").insert(entry.id, entry);
    }

    /// Lists entries still [`OutboxStatus::Pending`], ordered by id.
    pub fn pending(&self) -> Vec<OutboxEntry> {
        self.entries
            .lock()
            .expect("outbox mutex poisoned")
            .values()
            .filter(|entry| entry.status == OutboxStatus::Pending)
            .cloned()
            .collect()
    }

    /// Marks an entry processed once the downstream adapter acknowledges.
    pub fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.lock().expect("outbox mutex poisoned").get_mut(&id) {
            entry.mark_processed(now);
        }
    }

    /// The number of entries still pending. Exposed for the
    /// outbox-backlog metric.
    pub fn backlog(&self) -> usize {
        self.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_core::OutboxEventType;

    #[test]
    fn pending_excludes_processed_entries() {
        let store = OutboxStore::new();
        let first = OutboxEntry::new(Uuid::new_v4(), Uuid::new_v4(), OutboxEventType::SalesorderCreated, serde_json::json!({}), Utc::now());
        let second_id = first.id;
        store.append(first);
        assert_eq!(store.backlog(), 1);

        store.mark_processed(second_id, Utc::now());
        assert_eq!(store.backlog(), 0);
    }
}
