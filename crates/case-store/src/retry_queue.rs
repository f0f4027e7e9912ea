//! Claim-with-visibility-timeout retry queue.

use std::collections::BTreeMap;
use std::sync::Mutex;

use case_core::RetryItem;
use chrono::{DateTime, Utc};
use uuid::Uuid;

struct Slot {
    item: RetryItem,
    claimed_until: Option<DateTime<Utc>>,
}

/// A claimed retry item, returned with a handle the claimant uses to
/// release, complete, or fail it back onto the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryClaim {
    /// The claimed item.
    pub item: RetryItem,
}

/// The durable retry queue.
///
/// Consumers claim an eligible item with a visibility timeout rather than
/// removing it outright, so a crashed consumer's claim eventually expires
/// and another consumer can retry the same item — mirroring the sidecar
/// pool's lease-and-reclaim pattern applied to queue items instead of
/// worker processes.
#[derive(Default)]
pub struct RetryQueue {
    items: Mutex<BTreeMap<Uuid, Slot>>,
}

impl RetryQueue {
    /// An empty retry queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues or replaces the retry item for `case_id`.
    pub fn enqueue(&self, item: RetryItem) {
        self.items.lock().expect("retry queue mutex poisoned").insert(
            item.case_id,
            Slot {
                item,
                claimed_until: None,
            },
        );
    }

    /// Claims one eligible item — `next_attempt_at <= now` and not
    /// currently claimed — holding it invisible to other claimants until
    /// `now + visibility_timeout`.
    pub fn claim_next(&self, now: DateTime<Utc>, visibility_timeout: chrono::Duration) -> Option<RetryClaim> {
        let mut items = self.items.lock().expect("retry queue mutex poisoned");
        let candidate = items.values_mut().find(|slot| {
            let visible = slot.claimed_until.is_none_or(|claimed_until| claimed_until <= now);
            visible && slot.item.next_attempt_at <= now
        })?;
        candidate.claimed_until = Some(now + visibility_timeout);
        Some(RetryClaim { item: candidate.item.clone() })
    }

    /// Removes the item for `case_id` entirely, on successful submission
    /// or non-transient failure.
    pub fn remove(&self, case_id: Uuid) {
        self.items.lock().expect("retry queue mutex poisoned").remove(&case_id);
    }

    /// Records another failed attempt and releases the claim, making the
    /// item visible again at its new `next_attempt_at`.
    pub fn release_after_failure(&self, case_id: Uuid, updated: RetryItem) {
        let mut items = self.items.lock().expect("retry queue mutex poisoned");
        items.insert(
            case_id,
            Slot {
                item: updated,
                claimed_until: None,
            },
        );
    }

    /// The number of items currently enqueued, claimed or not. Exposed for
    /// the retry-queue-depth metric.
    pub fn depth(&self) -> usize {
        self.items.lock().expect("retry queue mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(case_id: Uuid, next_attempt_at: DateTime<Utc>) -> RetryItem {
        RetryItem::first_attempt(case_id, serde_json::json!({}), next_attempt_at, "503")
    }

    #[test]
    fn claim_skips_not_yet_eligible_items() {
        let queue = RetryQueue::new();
        let now = Utc::now();
        queue.enqueue(item(Uuid::new_v4(), now + chrono::Duration::seconds(60)));
        assert!(queue.claim_next(now, chrono::Duration::seconds(30)).is_none());
    }

    #[test]
    fn claim_hides_item_until_visibility_timeout_elapses() {
        let queue = RetryQueue::new();
        let case_id = Uuid::new_v4();
        let now = Utc::now();
        queue.enqueue(item(case_id, now));
        let claim = queue.claim_next(now, chrono::Duration::seconds(30)).unwrap();
        assert_eq!(claim.item.case_id, case_id);

        assert!(queue.claim_next(now, chrono::Duration::seconds(30)).is_none());

        let after_timeout = now + chrono::Duration::seconds(31);
        let reclaimed = queue.claim_next(after_timeout, chrono::Duration::seconds(30)).unwrap();
        assert_eq!(reclaimed.item.case_id, case_id);
    }

    #[test]
    fn depth_counts_all_items_claimed_or_not() {
        let queue = RetryQueue::new();
        let now = Utc::now();
        queue.enqueue(item(Uuid::new_v4(), now));
        queue.enqueue(item(Uuid::new_v4(), now));
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn remove_drops_item_entirely() {
        let queue = RetryQueue::new();
        let case_id = Uuid::new_v4();
        queue.enqueue(item(case_id, Utc::now()));
        queue.remove(case_id);
        assert_eq!(queue.depth(), 0);
    }
}
