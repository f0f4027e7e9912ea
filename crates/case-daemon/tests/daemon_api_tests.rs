// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP-level tests for the daemon's health, metrics, and case-browser
//! endpoints, built the same way the teacher's own daemon tests are: a
//! `build_app` router driven directly with `tower::ServiceExt::oneshot`,
//! no bound socket needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use case_committee::calibrate::WeightsFile;
use case_committee::provider::ProviderBackend;
use case_config::CaseEngineConfig;
use case_daemon::adapters::{OAuthClientCredentialsRefresher, RemoteWorkbookDecoder, SharedCatalogSource, ZohoBookkeepingClient};
use case_daemon::{build_app, AppState};
use case_evidence::EvidenceStore;
use case_orchestrator::CaseEngine;
use case_retry::RetryPolicy;
use case_store::{CaseStore, EventStore, FingerprintStore, LeaseTable, OutboxStore, RetryQueue};
use case_submitter::token::TokenCache;
use case_telemetry::CaseMetrics;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn test_state(evidence_dir: &std::path::Path) -> Arc<AppState> {
    let http = reqwest::Client::new();
    let cases = Arc::new(CaseStore::new());
    let events = Arc::new(EventStore::new());
    let leases = Arc::new(LeaseTable::new());
    let evidence = Arc::new(EvidenceStore::new(evidence_dir.to_path_buf()));
    let catalog_cache = Arc::new(case_store::CatalogCache::new(chrono::Duration::seconds(300)));
    let catalog_source = SharedCatalogSource::new();
    let fingerprints = Arc::new(FingerprintStore::new());
    let outbox = Arc::new(OutboxStore::new());
    let retry_queue = Arc::new(RetryQueue::new());
    let decoder = RemoteWorkbookDecoder::new(http.clone(), "http://localhost:9001/decode");
    let providers: Vec<Arc<dyn ProviderBackend>> = vec![];
    let weights = WeightsFile::default();
    let client = Arc::new(ZohoBookkeepingClient::new(http.clone(), "http://localhost:9004/salesorders"));
    let refresher = OAuthClientCredentialsRefresher::new(http.clone(), "http://localhost:9005/token", "test-client", "test-secret");
    let tokens = TokenCache::new(refresher);
    let config = CaseEngineConfig::default();

    let engine = Arc::new(CaseEngine::new(
        cases.clone(),
        events.clone(),
        leases,
        evidence.clone(),
        catalog_cache,
        catalog_source,
        fingerprints,
        outbox.clone(),
        retry_queue.clone(),
        decoder.clone(),
        providers.clone(),
        weights.clone(),
        client,
        tokens,
        config.clone(),
    ));

    Arc::new(AppState {
        cases,
        events,
        evidence,
        engine,
        decoder,
        providers,
        weights,
        committee_ambiguity_margin: config.committee_ambiguity_margin,
        retry_policy: RetryPolicy::new(config.retry_base_ms, config.retry_cap_ms, config.retry_max_attempts),
        http,
        blob_endpoint: "http://localhost:9006/blobs".to_string(),
        internal_tool_key: "test-tool-key".to_string(),
        max_upload_bytes: 25 * 1024 * 1024,
        metrics: CaseMetrics::new(),
        retry_queue,
        outbox,
    })
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_returns_ok_status() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(test_state(tmp.path()));

    let (status, json) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json.get("time").is_some());
}

#[tokio::test]
async fn metrics_reports_empty_summary_and_queue_gauges_before_any_case() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(test_state(tmp.path()));

    let (status, json) = get_json(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["summary"]["count"], 0);
    assert_eq!(json["queues"]["retry_queue_depth"], 0);
    assert_eq!(json["queues"]["outbox_backlog"], 0);
}

#[tokio::test]
async fn list_cases_without_auth_headers_is_unauthorized() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(test_state(tmp.path()));

    let response = app.oneshot(Request::builder().uri("/cases").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_cases_with_auth_headers_returns_an_empty_list() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(test_state(tmp.path()));

    let request = Request::builder()
        .uri("/cases")
        .header("X-Auth-Role", "OpsAuditor")
        .header("X-Auth-Tenant-Id", "tenant-a")
        .header("X-Auth-User-Id", "user-a")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!([]));
}

#[tokio::test]
async fn get_unknown_case_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(test_state(tmp.path()));

    let request = Request::builder()
        .uri(format!("/cases/{}", uuid::Uuid::new_v4()))
        .header("X-Auth-Role", "OpsAuditor")
        .header("X-Auth-Tenant-Id", "tenant-a")
        .header("X-Auth-User-Id", "user-a")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "case not found");
}

#[tokio::test]
async fn tools_endpoint_without_internal_key_is_unauthorized() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(test_state(tmp.path()));

    let request = Request::builder()
        .method("POST")
        .uri("/tools/parse")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"blob_pointer": "x", "tenant_id": "t", "filename": "f.csv"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
