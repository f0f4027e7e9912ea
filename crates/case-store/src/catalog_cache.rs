//! Two-tier catalog cache with TTL and stale-on-failure fallback.

use std::sync::RwLock;

use case_core::{CatalogCustomer, CatalogItem};
use chrono::{DateTime, Utc};

/// Errors from the catalog cache.
#[derive(Debug, thiserror::Error)]
pub enum CatalogCacheError {
    /// Neither a fresh nor a stale snapshot is available; this only
    /// happens on the very first access before any refresh has ever
    /// succeeded.
    #[error("catalog cache has no data yet and the refresh callback failed: {reason}")]
    NoDataAvailable {
        /// The refresh callback's failure message.
        reason: String,
    },
}

struct Snapshot {
    customers: Vec<CatalogCustomer>,
    items: Vec<CatalogItem>,
    fetched_at: DateTime<Utc>,
}

/// A two-tier cache over the external catalog: an in-memory snapshot with
/// a TTL, refreshed on miss by a blocking fetch. A refresh failure falls
/// back to the last good snapshot with a `stale_cache` flag rather than
/// failing the caller outright.
pub struct CatalogCache {
    snapshot: RwLock<Option<Snapshot>>,
    ttl: chrono::Duration,
}

/// A catalog snapshot as handed to a caller, annotated with whether it was
/// served stale.
pub struct CatalogView<'a> {
    /// The cached customers.
    pub customers: &'a [CatalogCustomer],
    /// The cached items.
    pub items: &'a [CatalogItem],
    /// `true` if this snapshot is older than the configured TTL and was
    /// served anyway because a refresh attempt failed.
    pub stale: bool,
}

impl CatalogCache {
    /// Builds an empty cache with the given TTL.
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            snapshot: RwLock::new(None),
            ttl,
        }
    }

    /// Fetches a fresh view, refreshing via `fetch` if the cached snapshot
    /// is missing or older than the TTL.
    ///
    /// On refresh failure, returns the last good snapshot with
    /// `stale = true` if one exists; otherwise returns
    /// [`CatalogCacheError::NoDataAvailable`].
    pub fn get_or_refresh<E: ToString>(
        &self,
        now: DateTime<Utc>,
        fetch: impl FnOnce() -> Result<(Vec<CatalogCustomer>, Vec<CatalogItem>), E>,
    ) -> Result<(Vec<CatalogCustomer>, Vec<CatalogItem>, bool), CatalogCacheError> {
        let is_fresh = {
            let snapshot = self.snapshot.read().expect("catalog cache lock poisoned");
            snapshot.as_ref().is_some_and(|s| now - s.fetched_at < self.ttl)
        };
        if is_fresh {
            let snapshot = self.snapshot.read().expect("catalog cache lock poisoned");
            let snapshot = snapshot.as_ref().expect("checked fresh above");
            return Ok((snapshot.customers.clone(), snapshot.items.clone(), false));
        }

        match fetch() {
            Ok((customers, items)) => {
                let mut guard = self.snapshot.write().expect("catalog cache lock poisoned");
                *guard = Some(Snapshot {
                    customers: customers.clone(),
                    items: items.clone(),
                    fetched_at: now,
                });
                Ok((customers, items, false))
            }
            Err(error) => {
                let guard = self.snapshot.read().expect("catalog cache lock poisoned");
                match guard.as_ref() {
                    Some(snapshot) => Ok((snapshot.customers.clone(), snapshot.items.clone(), true)),
                    None => Err(CatalogCacheError::NoDataAvailable { reason: error.to_string() }),
                }
            }
        }
    }
}
