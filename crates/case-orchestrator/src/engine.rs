//! The case state machine: drives a [`Case`] through extraction,
//! committee review, resolution, human approval, and submission,
//! recording every transition to the append-only event log.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use case_committee::calibrate::WeightsFile;
use case_committee::provider::ProviderBackend;
use case_committee::{run_committee, CommitteeResult};
use case_config::CaseEngineConfig;
use case_core::{
    sha256_hex, Actor, AuditEvent, CanonicalOrder, Case, CaseStatus, CatalogCustomer, CatalogItem, RetryItem,
};
use case_evidence::{ArtifactKind, EvidenceError, EvidenceStore};
use case_extractor::sheet::{Workbook, WorkbookDecoder};
use case_extractor::{extract, ExtractConfig, ExtractError};
use case_resolver::{resolve_order, ResolverConfig};
use case_retry::RetryPolicy;
use case_store::{CaseStore, CaseStoreError, CatalogCache, CatalogCacheError, EventStore, EventStoreError, FingerprintStore, LeaseError, LeaseTable, OutboxStore, RetryQueue};
use case_submitter::client::BookkeepingClient;
use case_submitter::token::{TokenCache, TokenRefresher};
use case_submitter::{submit_case, SubmissionResult, SubmitError};

use crate::evidence_pack::build_evidence_pack;

/// The worker identity this process's engine presents to the lease table.
const LEASE_WORKER_ID: &str = "orchestrator";

/// Releases `case_id`'s lease on drop, so an early `?` return out of a
/// stage method releases it the same as the happy path.
struct LeaseGuard<'a> {
    leases: &'a LeaseTable,
    case_id: Uuid,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.leases.release(self.case_id, LEASE_WORKER_ID);
    }
}

/// Fetches the current customer/item catalog, as the engine's sole
/// external collaborator for catalog data.
pub trait CatalogSource: Send + Sync {
    /// Fetches the full customer and item catalog.
    fn fetch(&self) -> anyhow::Result<(Vec<CatalogCustomer>, Vec<CatalogItem>)>;
}

/// Errors from driving a case through the engine.
#[derive(Debug, thiserror::Error)]
pub enum CaseEngineError {
    /// The case is not in the status this stage requires.
    #[error("case {case_id} is in status {status:?}, not the status this operation requires")]
    WrongStatus {
        /// The case in question.
        case_id: Uuid,
        /// Its current status.
        status: CaseStatus,
    },
    /// A stage tried to advance a case to a status its current status
    /// cannot legally transition to.
    #[error("cannot transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// The status the case was actually in.
        from: CaseStatus,
        /// The status the transition attempted to reach.
        to: CaseStatus,
    },
    /// Another worker holds this case's lease, or this worker's lease on
    /// it was lost to expiry.
    #[error(transparent)]
    Lease(#[from] LeaseError),
    /// The case store rejected the operation.
    #[error(transparent)]
    CaseStore(#[from] CaseStoreError),
    /// The event store rejected the append.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
    /// The evidence store rejected the write.
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    /// The extractor hit an unrecoverable workbook decode failure.
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    /// The catalog cache had no data available.
    #[error(transparent)]
    CatalogCache(#[from] CatalogCacheError),
    /// The order was not ready for submission.
    #[error(transparent)]
    Submission(#[from] SubmitError),
    /// The workbook decoder rejected the uploaded file's bytes.
    #[error("workbook decode failed: {0}")]
    Decode(String),
}

/// Ties the extractor, committee, resolver, and submitter together into
/// one case lifecycle, backed by the durable stores in [`case_store`].
pub struct CaseEngine<D: WorkbookDecoder, R: TokenRefresher> {
    cases: Arc<CaseStore>,
    events: Arc<EventStore>,
    leases: Arc<LeaseTable>,
    evidence: Arc<EvidenceStore>,
    catalog_cache: Arc<CatalogCache>,
    catalog_source: Arc<dyn CatalogSource>,
    fingerprints: Arc<FingerprintStore>,
    outbox: Arc<OutboxStore>,
    retry_queue: Arc<RetryQueue>,
    decoder: D,
    providers: Vec<Arc<dyn ProviderBackend>>,
    weights: WeightsFile,
    client: Arc<dyn BookkeepingClient>,
    tokens: TokenCache<R>,
    config: CaseEngineConfig,
}

#[allow(clippy::too_many_arguments)]
impl<D: WorkbookDecoder, R: TokenRefresher> CaseEngine<D, R> {
    /// Assembles a case engine from its collaborators.
    pub fn new(
        cases: Arc<CaseStore>,
        events: Arc<EventStore>,
        leases: Arc<LeaseTable>,
        evidence: Arc<EvidenceStore>,
        catalog_cache: Arc<CatalogCache>,
        catalog_source: Arc<dyn CatalogSource>,
        fingerprints: Arc<FingerprintStore>,
        outbox: Arc<OutboxStore>,
        retry_queue: Arc<RetryQueue>,
        decoder: D,
        providers: Vec<Arc<dyn ProviderBackend>>,
        weights: WeightsFile,
        client: Arc<dyn BookkeepingClient>,
        tokens: TokenCache<R>,
        config: CaseEngineConfig,
    ) -> Self {
        Self {
            cases,
            events,
            leases,
            evidence,
            catalog_cache,
            catalog_source,
            fingerprints,
            outbox,
            retry_queue,
            decoder,
            providers,
            weights,
            client,
            tokens,
            config,
        }
    }

    fn append(&self, case_id: Uuid, event_type: &str, actor: Actor, status_after: CaseStatus, data: serde_json::Value, now: DateTime<Utc>) -> Result<(), CaseEngineError> {
        let sequence = self.events.next_sequence(case_id);
        let event = AuditEvent::new(Uuid::new_v4(), case_id, sequence, now, event_type, actor).with_status_after(format!("{status_after:?}")).with_data(data);
        self.events.append(event)?;
        Ok(())
    }

    fn transition(&self, case_id: Uuid, next: CaseStatus, now: DateTime<Utc>) -> Result<Case, CaseEngineError> {
        let mut transitioned = Ok(());
        let case = self.cases.update(case_id, |case| {
            transitioned = case.transition_to(next, now);
        })?;
        transitioned.map_err(|from| CaseEngineError::IllegalTransition { from, to: next })?;
        Ok(case)
    }

    fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.lease_ttl_secs as i64)
    }

    /// Claims `case_id`'s lease for the duration of a stage, releasing it
    /// when the returned guard drops (including on an early `?` return).
    fn acquire_lease(&self, case_id: Uuid, now: DateTime<Utc>) -> Result<LeaseGuard<'_>, CaseEngineError> {
        self.leases.acquire(case_id, LEASE_WORKER_ID, now, self.lease_ttl())?;
        Ok(LeaseGuard { leases: &self.leases, case_id })
    }

    fn require_status(&self, case: &Case, expected: CaseStatus) -> Result<(), CaseEngineError> {
        if case.status != expected {
            return Err(CaseEngineError::WrongStatus { case_id: case.case_id, status: case.status });
        }
        Ok(())
    }

    /// Creates a case from an uploaded file, stores the original bytes in
    /// the evidence store, and advances it to [`CaseStatus::Parsing`].
    pub fn intake(
        &self,
        tenant_id: impl Into<String>,
        uploader_id: impl Into<String>,
        conversation_handle: impl Into<String>,
        filename: impl Into<String>,
        extension: &str,
        file_bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Case, CaseEngineError> {
        let case_id = Uuid::new_v4();
        let _lease = self.acquire_lease(case_id, now)?;
        let file_hash = sha256_hex(file_bytes);
        let filename = filename.into();
        let case = Case::new(case_id, tenant_id, uploader_id, conversation_handle, filename.clone(), file_hash, now);
        self.cases.insert(case.clone())?;
        self.append(case_id, "case_created", Actor::system(), CaseStatus::Created, serde_json::json!({ "filename": filename }), now)?;

        let artifact = self.evidence.put(case_id, ArtifactKind::OriginalFile, extension, file_bytes)?;
        let case = self.transition(case_id, CaseStatus::StoringFile, now)?;
        self.append(case_id, "file_stored", Actor::system(), CaseStatus::StoringFile, serde_json::json!({ "artifact": artifact.to_string() }), now)?;

        let case = self.transition(case_id, CaseStatus::Parsing, now)?;
        self.append(case_id, "parsing_started", Actor::system(), CaseStatus::Parsing, serde_json::Value::Null, now)?;
        Ok(case)
    }

    /// Runs the deterministic extractor against the case's stored file,
    /// parked by [`Self::intake`] in [`CaseStatus::Parsing`].
    ///
    /// Returns the extracted order without advancing status further; the
    /// caller runs the committee next with this order's schema inference.
    pub fn run_extraction(&self, case: &Case, file_bytes: &[u8], now: DateTime<Utc>) -> Result<CanonicalOrder, CaseEngineError> {
        self.require_status(case, CaseStatus::Parsing)?;
        let _lease = self.acquire_lease(case.case_id, now)?;
        let workbook: Workbook = self.decoder.decode(file_bytes).map_err(|e| CaseEngineError::Decode(e.to_string()))?;

        let extract_config = ExtractConfig { strict_formulas: self.config.extractor_strict_formulas, ..ExtractConfig::default() };
        let order = extract(case.case_id, case.tenant_id.clone(), case.source_filename.clone(), case.file_hash.clone(), now, &workbook, &extract_config)?;

        if order.issues.iter().any(|i| i.code == case_core::IssueCode::FormulasBlocked) {
            self.transition(case.case_id, CaseStatus::ParseBlocked, now)?;
            self.append(case.case_id, "parse_blocked", Actor::system(), CaseStatus::ParseBlocked, serde_json::Value::Null, now)?;
        } else {
            self.transition(case.case_id, CaseStatus::RunningCommittee, now)?;
            self.append(case.case_id, "extraction_completed", Actor::system(), CaseStatus::RunningCommittee, serde_json::Value::Null, now)?;
        }
        Ok(order)
    }

    /// Runs the multi-provider mapping committee over `order`'s schema
    /// inference, parked in [`CaseStatus::RunningCommittee`].
    pub async fn run_committee_stage(&self, case: &Case, order: &CanonicalOrder, workbook: &Workbook, seed: u64, now: DateTime<Utc>) -> Result<CommitteeResult, CaseEngineError> {
        self.require_status(case, CaseStatus::RunningCommittee)?;
        let _lease = self.acquire_lease(case.case_id, now)?;
        let pack = build_evidence_pack(order, workbook);
        let result = run_committee(&pack, &self.providers, &self.weights, seed, Duration::from_secs(10), self.config.committee_ambiguity_margin, 0.5).await;
        if let Err(e) = self.leases.renew(case.case_id, LEASE_WORKER_ID, now, self.lease_ttl()) {
            tracing::warn!(case_id = %case.case_id, error = %e, "lease renewal after committee run failed");
        }

        if result.requires_human_input {
            self.transition(case.case_id, CaseStatus::AwaitingCorrections, now)?;
            self.append(case.case_id, "committee_needs_review", Actor::system(), CaseStatus::AwaitingCorrections, serde_json::Value::Null, now)?;
        } else {
            self.transition(case.case_id, CaseStatus::ResolvingCustomer, now)?;
            self.append(case.case_id, "committee_completed", Actor::system(), CaseStatus::ResolvingCustomer, serde_json::Value::Null, now)?;
        }
        Ok(result)
    }

    /// Matches `order`'s customer and line items against the catalog,
    /// parked in [`CaseStatus::ResolvingCustomer`].
    pub fn run_resolution_stage(&self, case: &Case, order: &mut CanonicalOrder, now: DateTime<Utc>) -> Result<(), CaseEngineError> {
        self.require_status(case, CaseStatus::ResolvingCustomer)?;
        let _lease = self.acquire_lease(case.case_id, now)?;
        let resolver_config = ResolverConfig {
            customer_fuzzy_high: self.config.customer_fuzzy_high,
            customer_fuzzy_low: self.config.customer_fuzzy_low,
            ambiguity_margin: self.config.committee_ambiguity_margin,
            item_fuzzy_enabled: self.config.resolver_fuzzy_enabled,
        };

        let (customers, items, stale) = self.catalog_cache.get_or_refresh(now, || self.catalog_source.fetch())?;
        if stale {
            tracing::warn!(case_id = %case.case_id, "resolving against a stale catalog snapshot");
        }
        let _price_audits = resolve_order(order, &customers, &items, &resolver_config);

        use case_core::CustomerResolutionStatus::*;
        match order.customer.resolution_status {
            Ambiguous | NeedsUserInput | NotFound => {
                self.transition(case.case_id, CaseStatus::AwaitingCustomerSelection, now)?;
                self.append(case.case_id, "customer_needs_selection", Actor::system(), CaseStatus::AwaitingCustomerSelection, serde_json::Value::Null, now)?;
            }
            _ => {
                self.transition(case.case_id, CaseStatus::ResolvingItems, now)?;
                self.append(case.case_id, "customer_resolved", Actor::system(), CaseStatus::ResolvingItems, serde_json::Value::Null, now)?;

                use case_core::ItemResolutionStatus::*;
                if order.line_items.iter().any(|l| matches!(l.resolution_status, Ambiguous | NotFound)) {
                    self.transition(case.case_id, CaseStatus::AwaitingItemSelection, now)?;
                    self.append(case.case_id, "items_need_selection", Actor::system(), CaseStatus::AwaitingItemSelection, serde_json::Value::Null, now)?;
                } else {
                    self.transition(case.case_id, CaseStatus::AwaitingApproval, now)?;
                    self.append(case.case_id, "items_resolved", Actor::system(), CaseStatus::AwaitingApproval, serde_json::Value::Null, now)?;
                }
            }
        }
        Ok(())
    }

    /// Records a human's corrected field values on a case parked in
    /// [`CaseStatus::AwaitingCorrections`], then sends it back through
    /// extraction with the correction recorded as evidence.
    pub fn record_corrections(&self, case: &Case, user_id: &str, corrections: &serde_json::Value, now: DateTime<Utc>) -> Result<Case, CaseEngineError> {
        self.require_status(case, CaseStatus::AwaitingCorrections)?;
        self.evidence.put(case.case_id, ArtifactKind::Corrections, "json", corrections.to_string().as_bytes())?;
        let case = self.transition(case.case_id, CaseStatus::Parsing, now)?;
        self.append(case.case_id, "corrections_submitted", Actor::user(user_id), CaseStatus::Parsing, corrections.clone(), now)?;
        Ok(case)
    }

    /// Applies a human's customer pick for a case parked in
    /// [`CaseStatus::AwaitingCustomerSelection`], then proceeds exactly as
    /// [`Self::run_resolution_stage`] would once the customer is resolved,
    /// without re-running the fuzzy matcher over the chosen customer.
    pub fn select_customer(&self, case: &Case, order: &mut CanonicalOrder, user_id: &str, external_id: &str, now: DateTime<Utc>) -> Result<(), CaseEngineError> {
        self.require_status(case, CaseStatus::AwaitingCustomerSelection)?;
        order.customer.resolution_status = case_core::CustomerResolutionStatus::Resolved;
        order.customer.resolved_external_id = Some(external_id.to_string());
        order.customer.candidates.clear();

        self.transition(case.case_id, CaseStatus::ResolvingItems, now)?;
        self.append(case.case_id, "customer_selected", Actor::user(user_id), CaseStatus::ResolvingItems, serde_json::json!({ "external_id": external_id }), now)?;

        use case_core::ItemResolutionStatus::*;
        if order.line_items.iter().any(|l| matches!(l.resolution_status, Ambiguous | NotFound)) {
            self.transition(case.case_id, CaseStatus::AwaitingItemSelection, now)?;
            self.append(case.case_id, "items_need_selection", Actor::system(), CaseStatus::AwaitingItemSelection, serde_json::Value::Null, now)?;
        } else {
            self.transition(case.case_id, CaseStatus::AwaitingApproval, now)?;
            self.append(case.case_id, "items_resolved", Actor::system(), CaseStatus::AwaitingApproval, serde_json::Value::Null, now)?;
        }
        Ok(())
    }

    /// Applies a human's pick for one ambiguous line item on a case parked
    /// in [`CaseStatus::AwaitingItemSelection`], filling in the catalog
    /// rate from the current snapshot. Advances to
    /// [`CaseStatus::AwaitingApproval`] once every line is resolved.
    pub fn select_item(&self, case: &Case, order: &mut CanonicalOrder, user_id: &str, row_index: u32, external_id: &str, now: DateTime<Utc>) -> Result<(), CaseEngineError> {
        self.require_status(case, CaseStatus::AwaitingItemSelection)?;
        let (_, items, stale) = self.catalog_cache.get_or_refresh(now, || self.catalog_source.fetch())?;
        if stale {
            tracing::warn!(case_id = %case.case_id, "selecting an item against a stale catalog snapshot");
        }
        let rate = items.iter().find(|i| i.external_id == external_id).map(|i| i.rate);

        if let Some(line) = order.line_items.iter_mut().find(|l| l.row_index == row_index) {
            line.resolution_status = case_core::ItemResolutionStatus::Resolved;
            line.resolved_external_id = Some(external_id.to_string());
            line.unit_price_resolved = rate;
            line.item_candidates.clear();
        }
        self.append(case.case_id, "item_selected", Actor::user(user_id), case.status, serde_json::json!({ "row_index": row_index, "external_id": external_id }), now)?;

        use case_core::ItemResolutionStatus::*;
        if order.line_items.iter().all(|l| !matches!(l.resolution_status, Ambiguous | NotFound)) {
            self.transition(case.case_id, CaseStatus::AwaitingApproval, now)?;
            self.append(case.case_id, "items_resolved", Actor::system(), CaseStatus::AwaitingApproval, serde_json::Value::Null, now)?;
        }
        Ok(())
    }

    /// Records a human approval decision on a case parked in
    /// [`CaseStatus::AwaitingApproval`].
    pub fn record_approval(&self, case: &Case, user_id: &str, approved: bool, now: DateTime<Utc>) -> Result<Case, CaseEngineError> {
        self.require_status(case, CaseStatus::AwaitingApproval)?;
        let next = if approved { CaseStatus::CreatingDraft } else { CaseStatus::AwaitingCorrections };
        let case = self.transition(case.case_id, next, now)?;
        self.append(case.case_id, "approval_recorded", Actor::user(user_id), next, serde_json::json!({ "approved": approved }), now)?;
        Ok(case)
    }

    /// Submits the order for a case parked in [`CaseStatus::CreatingDraft`],
    /// advancing to [`CaseStatus::Completed`], [`CaseStatus::QueuedForRetry`],
    /// or [`CaseStatus::Failed`] per the submitter's result.
    pub async fn submit(&self, case: &Case, order: &CanonicalOrder, retry_policy: &RetryPolicy, now: DateTime<Utc>) -> Result<SubmissionResult, CaseEngineError> {
        self.require_status(case, CaseStatus::CreatingDraft)?;
        let _lease = self.acquire_lease(case.case_id, now)?;
        let result = submit_case(case.case_id, order, self.client.as_ref(), &self.tokens, &self.fingerprints, &self.outbox, &self.retry_queue, retry_policy).await?;

        match &result {
            SubmissionResult::Created { external_order_id } => {
                self.transition(case.case_id, CaseStatus::Completed, now)?;
                self.append(case.case_id, "draft_created", Actor::system(), CaseStatus::Completed, serde_json::json!({ "external_order_id": external_order_id }), now)?;
            }
            SubmissionResult::Duplicate { external_order_id } => {
                self.transition(case.case_id, CaseStatus::Completed, now)?;
                self.append(case.case_id, "duplicate_submission_resolved", Actor::system(), CaseStatus::Completed, serde_json::json!({ "external_order_id": external_order_id }), now)?;
            }
            SubmissionResult::EnqueuedForRetry => {
                self.transition(case.case_id, CaseStatus::QueuedForRetry, now)?;
                self.append(case.case_id, "submission_queued_for_retry", Actor::system(), CaseStatus::QueuedForRetry, serde_json::Value::Null, now)?;
            }
            SubmissionResult::Failed { reason } => {
                self.transition(case.case_id, CaseStatus::Failed, now)?;
                self.append(case.case_id, "submission_failed", Actor::system(), CaseStatus::Failed, serde_json::json!({ "reason": reason }), now)?;
            }
        }
        Ok(result)
    }

    /// Cancels a non-terminal case.
    pub fn cancel(&self, case_id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<Case, CaseEngineError> {
        let case = self.transition(case_id, CaseStatus::Cancelled, now)?;
        self.append(case_id, "case_cancelled", actor, CaseStatus::Cancelled, serde_json::Value::Null, now)?;
        self.leases.release(case_id, LEASE_WORKER_ID);
        Ok(case)
    }

    /// Finds cases whose last event predates `now - wait_timeout` and are
    /// still parked in an `awaiting_*` status, for the expiry sweep to
    /// cancel.
    pub fn expired_case_ids(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let deadline = now - chrono::Duration::seconds(self.config.case_wait_timeout_secs as i64);
        let terminal = ["Completed", "Failed", "Cancelled"];
        self.events.stale_case_ids(deadline, &terminal)
    }

    /// Requeues a retry-queue item that has reached its `next_attempt_at`,
    /// re-entering [`CaseStatus::CreatingDraft`] so a worker resubmits it.
    pub fn prepare_retry(&self, case_id: Uuid, now: DateTime<Utc>) -> Result<Case, CaseEngineError> {
        self.transition(case_id, CaseStatus::CreatingDraft, now)
    }

    /// Records a retry-queue failure, bumping the retry item and
    /// releasing its claim back to the queue per [`RetryItem::record_failure`].
    pub fn record_retry_failure(&self, mut item: RetryItem, retry_policy: &RetryPolicy, reason: impl Into<String>, now: DateTime<Utc>) {
        let delay = retry_policy.compute_delay(item.attempt_count + 1);
        item.record_failure(now + chrono::Duration::from_std(delay).unwrap_or_default(), reason);
        self.retry_queue.release_after_failure(item.case_id, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use case_committee::provider::{ColumnSummary, EvidencePack, MappingVote, ProviderDescriptor, ProviderOutput};
    use case_core::{
        CatalogItemStatus, Confidence, CustomerExtract, CustomerResolutionStatus, ItemResolutionStatus, LineItem, OrderMeta,
        SchemaInference, Totals,
    };
    use case_extractor::sheet::{Cell, SheetMatrix, Workbook};
    use case_submitter::client::ClientError;
    use case_submitter::payload::SubmissionPayload;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoopDecoder;

    #[derive(Debug, thiserror::Error)]
    #[error("decode not supported in this stub")]
    struct DecodeError;

    impl WorkbookDecoder for NoopDecoder {
        type Error = DecodeError;

        fn decode(&self, bytes: &[u8]) -> Result<Workbook, Self::Error> {
            if bytes.is_empty() {
                return Err(DecodeError);
            }
            Ok(Workbook { sheets: vec![] })
        }
    }

    struct EmptyCatalog;

    impl CatalogSource for EmptyCatalog {
        fn fetch(&self) -> anyhow::Result<(Vec<CatalogCustomer>, Vec<CatalogItem>)> {
            Ok((vec![], vec![]))
        }
    }

    struct FixedCatalog {
        customers: Vec<CatalogCustomer>,
        items: Vec<CatalogItem>,
    }

    impl CatalogSource for FixedCatalog {
        fn fetch(&self) -> anyhow::Result<(Vec<CatalogCustomer>, Vec<CatalogItem>)> {
            Ok((self.customers.clone(), self.items.clone()))
        }
    }

    struct StubProvider {
        descriptor: ProviderDescriptor,
        vote: Option<String>,
        confidence: f64,
    }

    #[async_trait]
    impl ProviderBackend for StubProvider {
        fn descriptor(&self) -> ProviderDescriptor {
            self.descriptor.clone()
        }

        async fn propose(&self, pack: &EvidencePack, _timeout: Duration) -> anyhow::Result<ProviderOutput> {
            Ok(ProviderOutput {
                mappings: pack
                    .fields
                    .iter()
                    .map(|field| MappingVote { field: field.clone(), selected_column_id: self.vote.clone(), confidence: self.confidence, reasoning: "stub".to_string() })
                    .collect(),
                issues: vec![],
                overall_confidence: self.confidence,
                processing_time_ms: 1,
            })
        }
    }

    fn stub_provider(id: &str, vote: &str) -> Arc<dyn ProviderBackend> {
        Arc::new(StubProvider { descriptor: ProviderDescriptor { id: id.to_string(), family: "fam".to_string() }, vote: Some(vote.to_string()), confidence: 0.95 })
    }

    struct StubRefresher;

    #[async_trait]
    impl TokenRefresher for StubRefresher {
        async fn refresh(&self) -> anyhow::Result<(String, i64)> {
            Ok(("access-token".to_string(), 3600))
        }
    }

    struct StubClient {
        calls: AtomicU32,
        result: ClientResult,
    }

    enum ClientResult {
        Created,
        Transient,
    }

    #[async_trait]
    impl BookkeepingClient for StubClient {
        async fn create_draft_order(&self, _access_token: &str, _payload: &SubmissionPayload) -> Result<String, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                ClientResult::Created => Ok("ext-order-1".to_string()),
                ClientResult::Transient => Err(ClientError::Transient { message: "unavailable".to_string(), retry_after: None }),
            }
        }
    }

    fn engine_with(
        catalog_source: Arc<dyn CatalogSource>,
        providers: Vec<Arc<dyn ProviderBackend>>,
        client: Arc<dyn BookkeepingClient>,
    ) -> (CaseEngine<NoopDecoder, StubRefresher>, tempfile::TempDir) {
        let evidence_dir = tempfile::tempdir().unwrap();
        let engine = CaseEngine::new(
            Arc::new(CaseStore::new()),
            Arc::new(EventStore::new()),
            Arc::new(LeaseTable::new()),
            Arc::new(EvidenceStore::new(evidence_dir.path())),
            Arc::new(CatalogCache::new(chrono::Duration::seconds(3600))),
            catalog_source,
            Arc::new(FingerprintStore::new()),
            Arc::new(OutboxStore::new()),
            Arc::new(RetryQueue::new()),
            NoopDecoder,
            providers,
            WeightsFile::default(),
            client,
            TokenCache::new(StubRefresher),
            CaseEngineConfig::default(),
        );
        (engine, evidence_dir)
    }

    fn bare_order(case_id: Uuid) -> CanonicalOrder {
        CanonicalOrder {
            meta: OrderMeta {
                case_id,
                tenant_id: "tenant-1".to_string(),
                received_at: Utc::now(),
                filename: "orders.xlsx".to_string(),
                file_hash: "a".repeat(64),
                language_hint: "en".to_string(),
                parser_version: "0.1.0".to_string(),
            },
            customer: CustomerExtract::new("Acme Corp", vec![]),
            line_items: vec![],
            totals: Totals { subtotal: None, tax: None, grand: None, evidence: BTreeMap::new() },
            schema_inference: SchemaInference { selected_sheet: "Sheet1".to_string(), header_row: 0, column_mappings: vec![] },
            confidence: Confidence::from_stages(BTreeMap::new()),
            issues: vec![],
            approvals: vec![],
            external_linkage: None,
        }
    }

    fn line(row_index: u32, sku: &str) -> LineItem {
        LineItem {
            row_index,
            resolution_status: ItemResolutionStatus::Unresolved,
            item_candidates: vec![],
            sku: Some(sku.to_string()),
            gtin: None,
            product_name: None,
            quantity: 1.0,
            unit_price_source: Some(10.0),
            unit_price_resolved: None,
            line_total_source: Some(10.0),
            currency: None,
            resolved_external_id: None,
            evidence: BTreeMap::new(),
        }
    }

    fn one_cell_workbook() -> Workbook {
        let cell = |raw: &str| Cell { a1: "A1".to_string(), raw_value: raw.to_string(), is_formula: false, number_format: None, hidden: false };
        Workbook { sheets: vec![SheetMatrix { name: "Sheet1".to_string(), rows: vec![vec![cell("SKU")], vec![cell("SKU-1")]] }] }
    }

    #[test]
    fn intake_advances_a_new_case_to_parsing() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        assert_eq!(case.status, CaseStatus::Parsing);
        assert_eq!(engine.events.list(case.case_id).len(), 3);
    }

    #[test]
    fn run_extraction_surfaces_decode_failures() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        let err = engine.run_extraction(&case, b"", now).unwrap_err();
        assert!(matches!(err, CaseEngineError::Decode(_)));
    }

    #[test]
    fn run_extraction_on_a_sheetless_workbook_is_an_extraction_error() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        let err = engine.run_extraction(&case, b"nonempty", now).unwrap_err();
        assert!(matches!(err, CaseEngineError::Extraction(ExtractError::NoSheets)));
    }

    #[tokio::test]
    async fn committee_stage_with_no_providers_parks_for_human_review() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::RunningCommittee).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();
        let order = bare_order(case.case_id);
        let workbook = one_cell_workbook();
        let result = engine.run_committee_stage(&case, &order, &workbook, 1, now).await.unwrap();
        assert!(result.requires_human_input);
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::AwaitingCorrections);
    }

    #[tokio::test]
    async fn committee_stage_with_unanimous_providers_proceeds_to_resolution() {
        let providers = vec![stub_provider("p1", "0"), stub_provider("p2", "0"), stub_provider("p3", "0")];
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), providers, Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::RunningCommittee).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();
        let order = bare_order(case.case_id);
        let workbook = one_cell_workbook();
        let result = engine.run_committee_stage(&case, &order, &workbook, 1, now).await.unwrap();
        assert!(!result.requires_human_input);
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::ResolvingCustomer);
    }

    #[test]
    fn resolution_stage_parks_on_an_unresolvable_customer() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::ResolvingCustomer).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();
        let mut order = bare_order(case.case_id);
        engine.run_resolution_stage(&case, &mut order, now).unwrap();
        assert_eq!(order.customer.resolution_status, CustomerResolutionStatus::NotFound);
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::AwaitingCustomerSelection);
    }

    #[test]
    fn resolution_stage_with_a_fully_resolvable_order_reaches_awaiting_approval() {
        let customer = CatalogCustomer { external_id: "cust-1".to_string(), display_name: "Acme Corp".to_string(), company_name: None };
        let item = CatalogItem { external_id: "item-1".to_string(), sku: Some("SKU-1".to_string()), gtin: None, name: "Widget".to_string(), rate: 9.99, status: CatalogItemStatus::Active };
        let catalog = Arc::new(FixedCatalog { customers: vec![customer], items: vec![item] });
        let (engine, _dir) = engine_with(catalog, vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::ResolvingCustomer).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let mut order = bare_order(case.case_id);
        order.line_items.push(line(0, "SKU-1"));
        engine.run_resolution_stage(&case, &mut order, now).unwrap();

        assert_eq!(order.customer.resolution_status, CustomerResolutionStatus::Resolved);
        assert_eq!(order.line_items[0].resolution_status, ItemResolutionStatus::Resolved);
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::AwaitingApproval);
    }

    #[test]
    fn record_corrections_sends_a_case_back_to_parsing() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingCorrections).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let corrections = serde_json::json!({ "line_items[0].sku": "SKU-9" });
        let updated = engine.record_corrections(&case, "user-1", &corrections, now).unwrap();
        assert_eq!(updated.status, CaseStatus::Parsing);
    }

    #[test]
    fn select_customer_does_not_get_overwritten_by_a_later_resolution_pass() {
        let customer = CatalogCustomer { external_id: "cust-fuzzy".to_string(), display_name: "Acme Corp".to_string(), company_name: None };
        let catalog = Arc::new(FixedCatalog { customers: vec![customer], items: vec![] });
        let (engine, _dir) = engine_with(catalog, vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingCustomerSelection).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let mut order = bare_order(case.case_id);
        engine.select_customer(&case, &mut order, "user-1", "cust-manually-chosen", now).unwrap();

        assert_eq!(order.customer.resolution_status, CustomerResolutionStatus::Resolved);
        assert_eq!(order.customer.resolved_external_id.as_deref(), Some("cust-manually-chosen"));
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::AwaitingApproval);
    }

    #[test]
    fn select_customer_parks_for_item_selection_when_lines_remain_ambiguous() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingCustomerSelection).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let mut order = bare_order(case.case_id);
        order.line_items.push(LineItem { resolution_status: ItemResolutionStatus::NotFound, ..line(0, "SKU-1") });
        engine.select_customer(&case, &mut order, "user-1", "cust-1", now).unwrap();

        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::AwaitingItemSelection);
    }

    #[test]
    fn select_item_fills_in_the_catalog_rate_and_advances_once_all_lines_resolve() {
        let item = CatalogItem { external_id: "item-1".to_string(), sku: Some("SKU-1".to_string()), gtin: None, name: "Widget".to_string(), rate: 12.5, status: CatalogItemStatus::Active };
        let catalog = Arc::new(FixedCatalog { customers: vec![], items: vec![item] });
        let (engine, _dir) = engine_with(catalog, vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingItemSelection).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let mut order = bare_order(case.case_id);
        order.line_items.push(LineItem { resolution_status: ItemResolutionStatus::Ambiguous, ..line(0, "SKU-1") });
        engine.select_item(&case, &mut order, "user-1", 0, "item-1", now).unwrap();

        assert_eq!(order.line_items[0].resolution_status, ItemResolutionStatus::Resolved);
        assert_eq!(order.line_items[0].unit_price_resolved, Some(12.5));
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::AwaitingApproval);
    }

    #[test]
    fn select_item_stays_parked_while_other_lines_remain_unresolved() {
        let item = CatalogItem { external_id: "item-1".to_string(), sku: Some("SKU-1".to_string()), gtin: None, name: "Widget".to_string(), rate: 12.5, status: CatalogItemStatus::Active };
        let catalog = Arc::new(FixedCatalog { customers: vec![], items: vec![item] });
        let (engine, _dir) = engine_with(catalog, vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingItemSelection).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let mut order = bare_order(case.case_id);
        order.line_items.push(LineItem { resolution_status: ItemResolutionStatus::Ambiguous, ..line(0, "SKU-1") });
        order.line_items.push(LineItem { resolution_status: ItemResolutionStatus::NotFound, ..line(1, "SKU-2") });
        engine.select_item(&case, &mut order, "user-1", 0, "item-1", now).unwrap();

        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::AwaitingItemSelection);
    }

    #[test]
    fn record_approval_advances_to_creating_draft_on_approval() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingApproval).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let updated = engine.record_approval(&case, "approver-1", true, now).unwrap();
        assert_eq!(updated.status, CaseStatus::CreatingDraft);
    }

    #[test]
    fn record_approval_routes_a_rejection_back_to_corrections() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingApproval).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let updated = engine.record_approval(&case, "approver-1", false, now).unwrap();
        assert_eq!(updated.status, CaseStatus::AwaitingCorrections);
    }

    #[tokio::test]
    async fn submit_advances_to_completed_on_success() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::CreatingDraft).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let mut order = bare_order(case.case_id);
        order.customer.resolved_external_id = Some("cust-1".to_string());
        order.line_items.push(LineItem { resolved_external_id: Some("item-1".to_string()), unit_price_resolved: Some(9.99), ..line(0, "SKU-1") });

        let retry_policy = RetryPolicy::new(1000, 16000, 5);
        let result = engine.submit(&case, &order, &retry_policy, now).await.unwrap();
        assert!(matches!(result, SubmissionResult::Created { .. }));
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::Completed);
    }

    #[tokio::test]
    async fn submit_queues_a_retry_on_a_transient_failure() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Transient }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::CreatingDraft).unwrap();
        let case = engine.cases.get(case.case_id).unwrap();

        let mut order = bare_order(case.case_id);
        order.customer.resolved_external_id = Some("cust-1".to_string());
        order.line_items.push(LineItem { resolved_external_id: Some("item-1".to_string()), unit_price_resolved: Some(9.99), ..line(0, "SKU-1") });

        let retry_policy = RetryPolicy::new(1000, 16000, 5);
        let result = engine.submit(&case, &order, &retry_policy, now).await.unwrap();
        assert!(matches!(result, SubmissionResult::EnqueuedForRetry));
        let stored = engine.cases.get(case.case_id).unwrap();
        assert_eq!(stored.status, CaseStatus::QueuedForRetry);
    }

    #[test]
    fn cancel_releases_the_lease_and_transitions_from_any_non_terminal_status() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        let cancelled = engine.cancel(case.case_id, Actor::user("operator-1"), now).unwrap();
        assert_eq!(cancelled.status, CaseStatus::Cancelled);
    }

    #[test]
    fn expired_case_ids_picks_up_a_stale_awaiting_case() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let long_ago = Utc::now() - chrono::Duration::days(10);
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", long_ago).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::AwaitingApproval).unwrap();

        let stale = engine.expired_case_ids(Utc::now());
        assert!(stale.contains(&case.case_id));
    }

    #[test]
    fn prepare_retry_reenters_creating_draft() {
        let (engine, _dir) = engine_with(Arc::new(EmptyCatalog), vec![], Arc::new(StubClient { calls: AtomicU32::new(0), result: ClientResult::Created }));
        let now = Utc::now();
        let case = engine.intake("tenant-1", "user-1", "conv-1", "orders.xlsx", "xlsx", b"file bytes", now).unwrap();
        engine.cases.update(case.case_id, |c| c.status = CaseStatus::QueuedForRetry).unwrap();

        let resumed = engine.prepare_retry(case.case_id, now).unwrap();
        assert_eq!(resumed.status, CaseStatus::CreatingDraft);
    }
}
