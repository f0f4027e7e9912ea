//! Atomic insert-or-conflict fingerprint table.

use std::collections::BTreeMap;
use std::sync::Mutex;

use case_core::Fingerprint;

/// Errors from the fingerprint store.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintStoreError {
    /// No fingerprint record is keyed by the given hex digest.
    #[error("fingerprint {fingerprint_hex} not found")]
    NotFound {
        /// The digest that was looked up.
        fingerprint_hex: String,
    },
}

/// The fingerprint table. Its only write path is
/// [`FingerprintStore::insert_or_conflict`]: there is no update-in-place
/// for the claiming case id, only settling an already-claimed fingerprint
/// with its external order id via [`FingerprintStore::settle`].
#[derive(Default)]
pub struct FingerprintStore {
    fingerprints: Mutex<BTreeMap<String, Fingerprint>>,
}

/// Outcome of an idempotent-insert attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// This call won the insert; the caller may proceed with submission.
    Inserted,
    /// Another case already claimed this fingerprint; here is its current
    /// record.
    Conflict(Fingerprint),
}

impl FingerprintStore {
    /// An empty fingerprint store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to atomically claim `fingerprint`.
    ///
    /// On conflict, returns the existing record rather than an error: per
    /// the submitter's contract, the caller inspects
    /// `external_order_id` — if set, it returns a `duplicate` result with
    /// that id; if unset, a sibling submission is in flight and the caller
    /// performs a bounded wait-and-retry on the lookup.
    pub fn insert_or_conflict(&self, fingerprint: Fingerprint) -> InsertOutcome {
        let mut fingerprints = self.fingerprints.lock().expect("fingerprint store mutex poisoned");
        if let Some(existing) = fingerprints.get(&fingerprint.fingerprint_hex) {
            return InsertOutcome::Conflict(existing.clone());
        }
        let hex = fingerprint.fingerprint_hex.clone();
        fingerprints.insert(hex, fingerprint.clone());
        InsertOutcome::Inserted
    }

    /// Looks up a fingerprint record by its digest, for the
    /// wait-and-retry path on conflict.
    pub fn get(&self, fingerprint_hex: &str) -> Result<Fingerprint, FingerprintStoreError> {
        self.fingerprints
            .lock()
            .expect("fingerprint store mutex poisoned")
            .get(fingerprint_hex)
            .cloned()
            .ok_or_else(|| FingerprintStoreError::NotFound {
                fingerprint_hex: fingerprint_hex.to_string(),
            })
    }

    /// Records the external order id once the claiming case's submission
    /// completes. This is the submitter's exclusive write path for
    /// settling a fingerprint; no other caller may mutate
    /// `external_order_id`.
    pub fn settle(&self, fingerprint_hex: &str, external_order_id: impl Into<String>) -> Result<(), FingerprintStoreError> {
        let mut fingerprints = self.fingerprints.lock().expect("fingerprint store mutex poisoned");
        let record = fingerprints.get_mut(fingerprint_hex).ok_or_else(|| FingerprintStoreError::NotFound {
            fingerprint_hex: fingerprint_hex.to_string(),
        })?;
        record.external_order_id = Some(external_order_id.into());
        Ok(())
    }
}
