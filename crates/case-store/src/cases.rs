//! Case rows, keyed by `case_id`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use case_core::{Case, CaseStatus};
use uuid::Uuid;

/// Errors from the case store.
#[derive(Debug, thiserror::Error)]
pub enum CaseStoreError {
    /// No case exists with the given id.
    #[error("case {case_id} not found")]
    NotFound {
        /// The id that was looked up.
        case_id: Uuid,
    },
    /// A case with this id already exists (two concurrent `file-uploaded`
    /// events for the same case id).
    #[error("case {case_id} already exists")]
    AlreadyExists {
        /// The id that collided.
        case_id: Uuid,
    },
}

/// Filter parameters for listing cases, mirroring the case browser's
/// `GET /cases` query parameters.
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    /// Restrict to this status, if set.
    pub status: Option<CaseStatus>,
    /// Restrict to cases under this tenant, if set.
    pub tenant_id: Option<String>,
    /// Restrict to cases uploaded by this user, if set.
    pub uploader_id: Option<String>,
    /// Skip this many matches before collecting results.
    pub offset: usize,
    /// Collect at most this many results.
    pub limit: usize,
}

/// The in-memory case table.
///
/// A production deployment backs this with a transactional external store;
/// this type models the same insert/read/update/list contract so the
/// orchestrator and daemon can be exercised without one.
#[derive(Default)]
pub struct CaseStore {
    cases: Mutex<BTreeMap<Uuid, Case>>,
}

impl CaseStore {
    /// An empty case store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a newly created case.
    ///
    /// Two concurrent `file-uploaded` requests for the same case id are
    /// resolved here: only the first insert succeeds; the second observes
    /// [`CaseStoreError::AlreadyExists`] and should read back the winner's
    /// state instead of creating a duplicate.
    pub fn insert(&self, case: Case) -> Result<(), CaseStoreError> {
        let mut cases = self.cases.lock().expect("case store mutex poisoned");
        if cases.contains_key(&case.case_id) {
            return Err(CaseStoreError::AlreadyExists { case_id: case.case_id });
        }
        cases.insert(case.case_id, case);
        Ok(())
    }

    /// Reads a case by id.
    pub fn get(&self, case_id: Uuid) -> Result<Case, CaseStoreError> {
        self.cases
            .lock()
            .expect("case store mutex poisoned")
            .get(&case_id)
            .cloned()
            .ok_or(CaseStoreError::NotFound { case_id })
    }

    /// Applies `update` to the stored case and persists the result.
    ///
    /// The closure receives a mutable reference so callers can call
    /// [`Case::transition_to`] and similar mutators without a read-modify-
    /// write race window.
    pub fn update<F>(&self, case_id: Uuid, update: F) -> Result<Case, CaseStoreError>
    where
        F: FnOnce(&mut Case),
    {
        let mut cases = self.cases.lock().expect("case store mutex poisoned");
        let case = cases.get_mut(&case_id).ok_or(CaseStoreError::NotFound { case_id })?;
        update(case);
        Ok(case.clone())
    }

    /// Lists cases matching `filter`, ordered by `case_id`.
    pub fn list(&self, filter: &CaseFilter) -> Vec<Case> {
        let cases = self.cases.lock().expect("case store mutex poisoned");
        cases
            .values()
            .filter(|case| filter.status.is_none_or(|s| case.status == s))
            .filter(|case| filter.tenant_id.as_deref().is_none_or(|t| case.tenant_id == t))
            .filter(|case| filter.uploader_id.as_deref().is_none_or(|u| case.uploader_id == u))
            .skip(filter.offset)
            .take(if filter.limit == 0 { usize::MAX } else { filter.limit })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_case(case_id: Uuid) -> Case {
        Case::new(case_id, "tenant-1", "user-1", "conv-1", "orders.xlsx", "a".repeat(64), Utc::now())
    }

    #[test]
    fn second_concurrent_insert_for_same_id_is_rejected() {
        let store = CaseStore::new();
        let case_id = Uuid::new_v4();
        store.insert(sample_case(case_id)).unwrap();
        let err = store.insert(sample_case(case_id)).unwrap_err();
        assert!(matches!(err, CaseStoreError::AlreadyExists { .. }));

        let observed = store.get(case_id).unwrap();
        assert_eq!(observed.status, CaseStatus::Created);
    }

    #[test]
    fn update_mutates_in_place() {
        let store = CaseStore::new();
        let case_id = Uuid::new_v4();
        store.insert(sample_case(case_id)).unwrap();
        let updated = store
            .update(case_id, |case| {
                case.transition_to(CaseStatus::StoringFile, Utc::now()).unwrap();
            })
            .unwrap();
        assert_eq!(updated.status, CaseStatus::StoringFile);
        assert_eq!(store.get(case_id).unwrap().status, CaseStatus::StoringFile);
    }

    #[test]
    fn list_filters_by_status_and_tenant() {
        let store = CaseStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.insert(sample_case(a)).unwrap();
        let mut other_tenant = sample_case(b);
        other_tenant.tenant_id = "tenant-2".to_string();
        store.insert(other_tenant).unwrap();

        let filtered = store.list(&CaseFilter {
            tenant_id: Some("tenant-1".to_string()),
            ..Default::default()
        });
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].case_id, a);
    }

    #[test]
    fn get_missing_case_reports_not_found() {
        let store = CaseStore::new();
        let err = store.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CaseStoreError::NotFound { .. }));
    }
}
