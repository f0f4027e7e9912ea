// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-daemon
//!
//! The HTTP boundary: the chat bot's webhooks (`/bot/*`), the case
//! browser's read-only REST surface (`/cases*`), and the internal tool
//! endpoints (`/tools/*`) an agent calls directly. Everything durable
//! lives in `case_store`/`case_evidence`; this crate only adapts HTTP to
//! `case_orchestrator::CaseEngine` calls.
#![deny(unsafe_code)]

/// Concrete reqwest-backed collaborator implementations.
pub mod adapters;
/// Trusted-header role/tenant extraction.
pub mod auth;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use case_committee::calibrate::WeightsFile;
use case_committee::provider::ProviderBackend;
use case_committee::run_committee;
use case_core::{sha256_hex, Actor, CanonicalOrder, Case, CaseStatus};
use case_error::ErrorCode;
use case_evidence::{ArtifactKind, EvidenceStore};
use case_orchestrator::evidence_pack::build_evidence_pack;
use case_orchestrator::{CaseEngine, CaseEngineError};
use case_retry::RetryPolicy;
use case_store::{CaseFilter, CaseStore, EventStore, OutboxStore, RetryQueue};
use case_telemetry::{CaseMetrics, JsonExporter, QueueGauges, StageMetrics, TelemetryExporter};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use adapters::{fetch_blob, OAuthClientCredentialsRefresher, RemoteWorkbookDecoder};
use auth::{Claims, Role};

/// The concrete engine type this daemon drives; fixed because axum
/// state must be a monomorphic type, not the generic `CaseEngine<D, R>`.
pub type Engine = CaseEngine<RemoteWorkbookDecoder, OAuthClientCredentialsRefresher>;

const UPLOAD_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];

/// Shared daemon state.
///
/// `cases`/`events`/`evidence` are held separately from `engine` (rather
/// than reached through it, since `CaseEngine` keeps its collaborators
/// private) because the case browser's read endpoints query them
/// directly, without going through a status-gated engine method.
/// `decoder`/`providers`/`weights` are likewise a second set of the same
/// collaborators `main.rs` handed to the engine, so the internal tool
/// endpoints can run one stage in isolation without a case in flight.
#[derive(Clone)]
pub struct AppState {
    /// The case table, shared with the engine's own copy.
    pub cases: Arc<CaseStore>,
    /// The audit event log, shared with the engine's own copy.
    pub events: Arc<EventStore>,
    /// The evidence store, shared with the engine's own copy.
    pub evidence: Arc<EvidenceStore>,
    /// The case lifecycle driver.
    pub engine: Arc<Engine>,
    /// A decoder instance the tool endpoints use directly, independent
    /// of the one the engine holds internally.
    pub decoder: RemoteWorkbookDecoder,
    /// The committee's configured provider pool.
    pub providers: Vec<Arc<dyn ProviderBackend>>,
    /// The committee's calibrated provider weights.
    pub weights: WeightsFile,
    /// The committee's configured ambiguity margin.
    pub committee_ambiguity_margin: f64,
    /// The retry policy new submissions are enqueued under.
    pub retry_policy: RetryPolicy,
    /// HTTP client used to fetch uploaded files from the blob store.
    pub http: reqwest::Client,
    /// Base URL of the blob store `blob_pointer` values resolve against.
    pub blob_endpoint: String,
    /// Shared secret required on every `/tools/*` request's
    /// `X-Internal-Tool-Key` header.
    pub internal_tool_key: String,
    /// Reject an uploaded file above this size outright.
    pub max_upload_bytes: usize,
    /// Stage-duration/outcome collector, read back by `GET /metrics`.
    pub metrics: CaseMetrics,
    /// The engine's own retry queue, read (not mutated) for its depth gauge.
    pub retry_queue: Arc<RetryQueue>,
    /// The engine's own outbox, read (not mutated) for its backlog gauge.
    pub outbox: Arc<OutboxStore>,
}

/// A uniform JSON error body, matching the teacher's `{"error": message}`
/// shape, extended with `case_error::ErrorCode` where the failure came
/// from the engine — the stable code a chat adapter or the CLI can
/// branch on without parsing `message`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: Option<ErrorCode>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), code: None }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message, "code": self.code.map(|c| c.as_str()) }))).into_response()
    }
}

/// Maps an engine failure onto the stable taxonomy an HTTP caller can act
/// on, coarsest-first: the outer `CaseEngineError` variant picks the code
/// when it's unambiguous, otherwise the wrapped stage error supplies it.
fn engine_error_code(err: &CaseEngineError) -> ErrorCode {
    match err {
        CaseEngineError::WrongStatus { .. } | CaseEngineError::IllegalTransition { .. } => ErrorCode::StorageConflict,
        CaseEngineError::Lease(_) => ErrorCode::LeaseLost,
        CaseEngineError::CaseStore(_) | CaseEngineError::EventStore(_) | CaseEngineError::Evidence(_) | CaseEngineError::CatalogCache(_) => ErrorCode::StorageConflict,
        CaseEngineError::Extraction(case_extractor::ExtractError::NoSheets) => ErrorCode::EmptySpreadsheet,
        CaseEngineError::Decode(_) => ErrorCode::ParseFatal,
        CaseEngineError::Submission(_) => ErrorCode::ExternalPermanentFailure,
    }
}

impl From<CaseEngineError> for ApiError {
    fn from(err: CaseEngineError) -> Self {
        let status = match &err {
            CaseEngineError::WrongStatus { .. } | CaseEngineError::IllegalTransition { .. } | CaseEngineError::Lease(_) => StatusCode::CONFLICT,
            CaseEngineError::CaseStore(_) => StatusCode::NOT_FOUND,
            CaseEngineError::Decode(_) | CaseEngineError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = engine_error_code(&err);
        ApiError { status, message: err.to_string(), code: Some(code) }
    }
}

/// Builds the axum router with every daemon route wired to `state`.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/cases", get(list_cases))
        .route("/cases/{case_id}", get(get_case))
        .route("/cases/{case_id}/audit", get(get_case_audit))
        .route("/cases/{case_id}/download-sas", get(download_sas))
        .route("/bot/file-uploaded", post(bot_file_uploaded))
        .route("/bot/corrections-submitted", post(bot_corrections_submitted))
        .route("/bot/customer-selected", post(bot_customer_selected))
        .route("/bot/item-selected", post(bot_item_selected))
        .route("/bot/approval", post(bot_approval))
        .route("/tools/parse", post(tools_parse))
        .route("/tools/committee-review", post(tools_committee_review))
        .route("/tools/zoho/create-draft-salesorder", post(tools_create_draft_salesorder))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

/// Reports the stage-duration/outcome summary plus the durable queues'
/// current depths, as JSON. This is the read surface case-telemetry
/// collects for; rendering it is a dashboard's job, not this daemon's.
async fn metrics(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = state.metrics.summary();
    let exported = JsonExporter.export(&summary).map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let summary: serde_json::Value = serde_json::from_str(&exported).map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let gauges = QueueGauges { retry_queue_depth: state.retry_queue.depth() as u64, outbox_backlog: state.outbox.backlog() as u64 };
    Ok(Json(json!({ "summary": summary, "queues": gauges })))
}

fn require_internal_tool_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let supplied = headers.get("x-internal-tool-key").and_then(|v| v.to_str().ok()).unwrap_or_default();
    if supplied != state.internal_tool_key {
        return Err(ApiError::unauthorized("missing or invalid internal tool key"));
    }
    Ok(())
}

/// Restricts `filter` to what `claims`'s role is allowed to see: a sales
/// user sees only their own cases, a sales manager their tenant's, an
/// ops auditor everything.
fn scope_filter(claims: &Claims, mut filter: CaseFilter) -> CaseFilter {
    match claims.role {
        Role::SalesUser => filter.uploader_id = Some(claims.user_id.clone()),
        Role::SalesManager => filter.tenant_id = Some(claims.tenant_id.clone()),
        Role::OpsAuditor => {}
    }
    filter
}

fn authorize_case_read(claims: &Claims, case: &Case) -> Result<(), ApiError> {
    match claims.role {
        Role::SalesUser if case.uploader_id != claims.user_id => Err(ApiError::forbidden("not your case")),
        Role::SalesManager if case.tenant_id != claims.tenant_id => Err(ApiError::forbidden("not your tenant")),
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
struct ListCasesQuery {
    status: Option<String>,
    customer: Option<String>,
    #[serde(rename = "dateFrom")]
    date_from: Option<chrono::DateTime<Utc>>,
    #[serde(rename = "dateTo")]
    date_to: Option<chrono::DateTime<Utc>>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn parse_status(raw: &str) -> Result<CaseStatus, ApiError> {
    serde_json::from_value(json!(raw)).map_err(|_| ApiError::bad_request(format!("unknown status `{raw}`")))
}

async fn list_cases(claims: Claims, Query(query): Query<ListCasesQuery>, State(state): State<Arc<AppState>>) -> Result<Json<Vec<Case>>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let filter = scope_filter(
        &claims,
        CaseFilter { status, uploader_id: query.user_id, offset: query.offset.unwrap_or(0), limit: query.limit.unwrap_or(0), ..Default::default() },
    );
    let mut cases = state.cases.list(&filter);

    if let Some(from) = query.date_from {
        cases.retain(|c| c.created_at >= from);
    }
    if let Some(to) = query.date_to {
        cases.retain(|c| c.created_at <= to);
    }
    if let Some(customer) = query.customer {
        // The case row itself carries no resolved customer name; a
        // customer-name filter has to consult the working order.
        cases.retain(|c| load_order(&state, c.case_id).map(|o| o.customer.raw_text.contains(customer.as_str())).unwrap_or(false));
    }
    Ok(Json(cases))
}

async fn get_case(claims: Claims, AxPath(case_id): AxPath<Uuid>, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let case = state.cases.get(case_id).map_err(|_| ApiError::not_found("case not found"))?;
    authorize_case_read(&claims, &case)?;
    let order = load_order(&state, case_id).ok();
    Ok(Json(json!({ "case": case, "order": order })))
}

async fn get_case_audit(claims: Claims, AxPath(case_id): AxPath<Uuid>, State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let case = state.cases.get(case_id).map_err(|_| ApiError::not_found("case not found"))?;
    authorize_case_read(&claims, &case)?;
    Ok(Json(json!(state.events.list(case_id))))
}

#[derive(Debug, Serialize)]
struct DownloadSas {
    path: String,
    sha256_hex: String,
    /// This daemon does not talk to the blob store's URL-signing API
    /// itself; the blob proxy exchanges `path` for a time-limited URL.
    note: &'static str,
}

async fn download_sas(claims: Claims, AxPath(case_id): AxPath<Uuid>, State(state): State<Arc<AppState>>) -> Result<Json<DownloadSas>, ApiError> {
    let case = state.cases.get(case_id).map_err(|_| ApiError::not_found("case not found"))?;
    authorize_case_read(&claims, &case)?;
    let extension = case.source_filename.rsplit('.').next().unwrap_or("xlsx");
    let relative = original_file_path(case_id, extension);
    let bytes = state.evidence.get(&relative).map_err(|_| ApiError::not_found("original file not stored"))?;
    Ok(Json(DownloadSas { path: relative, sha256_hex: sha256_hex(&bytes), note: "exchange this path for a signed URL at the blob proxy" }))
}

fn original_file_path(case_id: Uuid, extension: &str) -> String {
    format!("orders-incoming/{case_id}/original.{extension}")
}

fn canonical_order_path(case_id: Uuid) -> String {
    format!("orders-audit/{case_id}/canonical.json")
}

fn persist_order(state: &AppState, case_id: Uuid, order: &CanonicalOrder) -> Result<(), ApiError> {
    let bytes = serde_json::to_vec(order).map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state.evidence.put(case_id, ArtifactKind::CanonicalOrder, "json", &bytes).map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(())
}

fn load_order(state: &AppState, case_id: Uuid) -> Result<CanonicalOrder, ApiError> {
    let bytes = state.evidence.get(&canonical_order_path(case_id)).map_err(|_| ApiError::not_found("no working order recorded for this case"))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn load_original_file(state: &AppState, case: &Case) -> Result<Vec<u8>, ApiError> {
    let extension = case.source_filename.rsplit('.').next().unwrap_or("xlsx");
    state.evidence.get(&original_file_path(case.case_id, extension)).map_err(|_| ApiError::not_found("original file not stored"))
}

fn decode_extension(filename: &str) -> Result<String, ApiError> {
    let extension = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    if !UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::bad_request(format!("unsupported file extension `{extension}`")));
    }
    Ok(extension)
}

#[derive(Debug, Deserialize)]
struct FileUploadedRequest {
    /// The chat bot's own case correlation id, carried through as-is;
    /// this system mints its own authoritative `case_id` in `intake`.
    #[allow(dead_code)]
    case_id: Option<Uuid>,
    blob_pointer: String,
    tenant_id: String,
    user_id: String,
    file_name: String,
    /// The chat bot's own hash of the bytes it uploaded, checked against
    /// what this daemon fetches before trusting the file further.
    file_hash: String,
    #[allow(dead_code)]
    activity_id: Option<String>,
    conversation_handle: String,
}

#[derive(Debug, Serialize)]
struct CaseResponse {
    case: Case,
}

async fn bot_file_uploaded(State(state): State<Arc<AppState>>, Json(req): Json<FileUploadedRequest>) -> Result<Json<CaseResponse>, ApiError> {
    let extension = decode_extension(&req.file_name)?;
    let bytes = fetch_blob(&state.http, &state.blob_endpoint, &req.blob_pointer).await.map_err(|e| ApiError::bad_request(e.to_string()))?;

    if bytes.len() > state.max_upload_bytes {
        return Err(ApiError::bad_request(format!("file exceeds the {}-byte upload limit", state.max_upload_bytes)));
    }
    let observed_hash = sha256_hex(&bytes);
    if observed_hash != req.file_hash {
        return Err(ApiError::bad_request("fetched bytes do not match the reported file_hash"));
    }

    let now = Utc::now();
    let case = state.engine.intake(req.tenant_id, req.user_id, req.conversation_handle, req.file_name, &extension, &bytes, now)?;

    let case = advance_from_parsing(&state, &case, &bytes, now).await?;
    Ok(Json(CaseResponse { case }))
}

/// Drives a case forward from [`CaseStatus::Parsing`] as far as it goes
/// without a human decision: extraction, then (if not blocked) the
/// committee, then (if the committee doesn't need a human) resolution.
/// Persists the working order to the evidence store at every step so a
/// later webhook can resume from it.
async fn advance_from_parsing(state: &AppState, case: &Case, file_bytes: &[u8], now: chrono::DateTime<Utc>) -> Result<Case, ApiError> {
    let case_id = case.case_id.to_string();

    let started = std::time::Instant::now();
    let extraction = state.engine.run_extraction(case, file_bytes, now);
    record_stage(state, "extractor", &case_id, started.elapsed(), extraction.is_ok(), extraction.as_ref().map(|o| o.issues.len()).unwrap_or(0) as u64);
    let mut order = extraction?;
    persist_order(state, case.case_id, &order)?;
    let case = state.cases.get(case.case_id).map_err(|_| ApiError::not_found("case not found"))?;

    if case.status != CaseStatus::RunningCommittee {
        return Ok(case);
    }

    let workbook = state.decoder.decode(file_bytes).map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let seed = case.case_id.as_u128() as u64;
    let started = std::time::Instant::now();
    let committee = state.engine.run_committee_stage(&case, &order, &workbook, seed, now).await;
    record_stage(state, "committee", &case_id, started.elapsed(), committee.is_ok(), committee.as_ref().map(|r| r.requires_human_input as u64).unwrap_or(0));
    committee?;
    let case = state.cases.get(case.case_id).map_err(|_| ApiError::not_found("case not found"))?;

    if case.status != CaseStatus::ResolvingCustomer {
        return Ok(case);
    }

    let started = std::time::Instant::now();
    let resolution = state.engine.run_resolution_stage(&case, &mut order, now);
    record_stage(state, "resolver", &case_id, started.elapsed(), resolution.is_ok(), order.issues.len() as u64);
    resolution?;
    persist_order(state, case.case_id, &order)?;
    let case = state.cases.get(case.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    Ok(case)
}

/// Records one stage's outcome into `state.metrics`. `issues_count` is
/// repurposed per stage: extraction issues raised, whether the committee
/// asked for human input, or price audits the resolver produced.
fn record_stage(state: &AppState, stage: &str, case_id: &str, elapsed: std::time::Duration, succeeded: bool, issues_count: u64) {
    state.metrics.record(StageMetrics {
        stage: stage.to_string(),
        case_id: case_id.to_string(),
        duration_ms: elapsed.as_millis() as u64,
        succeeded,
        retry_attempts: 0,
        issues_count,
    });
}

#[derive(Debug, Deserialize)]
struct CorrectionsSubmittedRequest {
    case_id: Uuid,
    user_id: String,
    corrections: serde_json::Value,
}

async fn bot_corrections_submitted(State(state): State<Arc<AppState>>, Json(req): Json<CorrectionsSubmittedRequest>) -> Result<Json<CaseResponse>, ApiError> {
    let case = state.cases.get(req.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    let now = Utc::now();
    let case = state.engine.record_corrections(&case, &req.user_id, &req.corrections, now)?;
    let file_bytes = load_original_file(&state, &case)?;
    let case = advance_from_parsing(&state, &case, &file_bytes, now).await?;
    Ok(Json(CaseResponse { case }))
}

#[derive(Debug, Deserialize)]
struct CustomerSelectedRequest {
    case_id: Uuid,
    user_id: String,
    external_id: String,
}

async fn bot_customer_selected(State(state): State<Arc<AppState>>, Json(req): Json<CustomerSelectedRequest>) -> Result<Json<CaseResponse>, ApiError> {
    let case = state.cases.get(req.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    let mut order = load_order(&state, req.case_id)?;
    let now = Utc::now();
    state.engine.select_customer(&case, &mut order, &req.user_id, &req.external_id, now)?;
    persist_order(&state, req.case_id, &order)?;
    let case = state.cases.get(req.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    Ok(Json(CaseResponse { case }))
}

#[derive(Debug, Deserialize)]
struct ItemSelectedRequest {
    case_id: Uuid,
    user_id: String,
    row_index: u32,
    external_id: String,
}

async fn bot_item_selected(State(state): State<Arc<AppState>>, Json(req): Json<ItemSelectedRequest>) -> Result<Json<CaseResponse>, ApiError> {
    let case = state.cases.get(req.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    let mut order = load_order(&state, req.case_id)?;
    let now = Utc::now();
    state.engine.select_item(&case, &mut order, &req.user_id, req.row_index, &req.external_id, now)?;
    persist_order(&state, req.case_id, &order)?;
    let case = state.cases.get(req.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    Ok(Json(CaseResponse { case }))
}

#[derive(Debug, Deserialize)]
struct ApprovalRequest {
    case_id: Uuid,
    user_id: String,
    approved: bool,
}

async fn bot_approval(State(state): State<Arc<AppState>>, Json(req): Json<ApprovalRequest>) -> Result<Json<CaseResponse>, ApiError> {
    let case = state.cases.get(req.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    let now = Utc::now();
    let case = state.engine.record_approval(&case, &req.user_id, req.approved, now)?;

    if case.status != CaseStatus::CreatingDraft {
        return Ok(Json(CaseResponse { case }));
    }

    let order = load_order(&state, req.case_id)?;
    let started = std::time::Instant::now();
    let submission = state.engine.submit(&case, &order, &state.retry_policy, now).await;
    record_stage(&state, "submitter", &req.case_id.to_string(), started.elapsed(), submission.is_ok(), 0);
    submission?;
    let case = state.cases.get(req.case_id).map_err(|_| ApiError::not_found("case not found"))?;
    Ok(Json(CaseResponse { case }))
}

#[derive(Debug, Deserialize)]
struct ToolsParseRequest {
    blob_pointer: String,
    tenant_id: String,
    filename: String,
}

async fn tools_parse(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<ToolsParseRequest>) -> Result<Json<CanonicalOrder>, ApiError> {
    require_internal_tool_key(&state, &headers)?;
    let bytes = fetch_blob(&state.http, &state.blob_endpoint, &req.blob_pointer).await.map_err(|e| ApiError::bad_request(e.to_string()))?;
    let workbook = state.decoder.decode(&bytes).map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let config = case_extractor::ExtractConfig::default();
    let order = case_extractor::extract(Uuid::new_v4(), req.tenant_id, req.filename, sha256_hex(&bytes), Utc::now(), &workbook, &config)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct ToolsCommitteeReviewRequest {
    order: CanonicalOrder,
    blob_pointer: String,
    seed: u64,
}

async fn tools_committee_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ToolsCommitteeReviewRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal_tool_key(&state, &headers)?;
    let bytes = fetch_blob(&state.http, &state.blob_endpoint, &req.blob_pointer).await.map_err(|e| ApiError::bad_request(e.to_string()))?;
    let workbook = state.decoder.decode(&bytes).map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let pack = build_evidence_pack(&req.order, &workbook);
    let result = run_committee(&pack, &state.providers, &state.weights, req.seed, Duration::from_secs(10), state.committee_ambiguity_margin, 0.5).await;
    Ok(Json(json!({
        "column_mappings": result.column_mappings,
        "requires_human_input": result.requires_human_input,
        "consensus": result.consensus,
        "selected_providers": result.selected_providers,
    })))
}

#[derive(Debug, Deserialize)]
struct CreateDraftSalesOrderRequest {
    order: CanonicalOrder,
}

async fn tools_create_draft_salesorder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateDraftSalesOrderRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal_tool_key(&state, &headers)?;
    let case_id = req.order.meta.case_id;
    let case = state.cases.get(case_id).map_err(|_| ApiError::not_found("no case row for this order's case_id"))?;
    let now = Utc::now();
    let result = state.engine.submit(&case, &req.order, &state.retry_policy, now).await?;
    Ok(Json(json!({ "result": format!("{result:?}") })))
}

/// Cancels a case, for an internal/admin caller.
pub async fn cancel_case(state: &AppState, case_id: Uuid, actor: Actor) -> Result<Case, CaseEngineError> {
    let now = Utc::now();
    state.engine.cancel(case_id, actor, now)
}
