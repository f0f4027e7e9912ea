#![deny(unsafe_code)]
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use case_committee::calibrate::WeightsFile;
use case_committee::provider::{ProviderBackend, ProviderDescriptor};
use case_config::CaseEngineConfig;
use case_core::Actor;
use case_daemon::adapters::{
    spawn_catalog_refresh_job, HttpModelProvider, OAuthClientCredentialsRefresher, RemoteWorkbookDecoder, SharedCatalogSource, ZohoBookkeepingClient,
};
use case_daemon::{build_app, AppState};
use case_evidence::EvidenceStore;
use case_orchestrator::CaseEngine;
use case_retry::RetryPolicy;
use case_store::{CaseStore, EventStore, FingerprintStore, LeaseTable, OutboxStore, RetryQueue};
use case_submitter::token::TokenCache;
use case_telemetry::CaseMetrics;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "case-daemon", version, about = "Case orchestration core: boundary adapters")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Path to the engine's TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory backing the evidence store.
    #[arg(long, default_value = "./data/evidence")]
    evidence_dir: PathBuf,

    /// Decoder service endpoint, posted raw workbook bytes.
    #[arg(long, default_value = "http://localhost:9001/decode")]
    decoder_endpoint: String,

    /// Base URL each committee provider's id is joined onto, as
    /// `{base}/{provider_id}`.
    #[arg(long, default_value = "http://localhost:9002/providers")]
    committee_endpoint_base: String,

    /// Catalog service endpoint, returning `{customers, items}`.
    #[arg(long, default_value = "http://localhost:9003/catalog")]
    catalog_endpoint: String,

    /// Catalog refresh interval, in seconds.
    #[arg(long, default_value_t = 300)]
    catalog_refresh_secs: u64,

    /// The bookkeeping service's OAuth token endpoint.
    #[arg(long, default_value = "https://accounts.zoho.com/oauth/v2/token")]
    oauth_token_endpoint: String,

    /// OAuth client id, read from the environment rather than the CLI so
    /// it never appears in a process listing.
    #[arg(long, env = "CASE_ZOHO_CLIENT_ID")]
    zoho_client_id: String,

    /// OAuth client secret, read from the environment.
    #[arg(long, env = "CASE_ZOHO_CLIENT_SECRET")]
    zoho_client_secret: String,

    /// The bookkeeping service's draft-sales-order endpoint.
    #[arg(long, default_value = "https://books.zoho.com/api/v3/salesorders")]
    draft_order_endpoint: String,

    /// Shared secret required on `/tools/*` requests.
    #[arg(long, env = "CASE_INTERNAL_TOOL_KEY")]
    internal_tool_key: String,

    /// Reject uploaded files over this many bytes (spec default 25 MiB).
    #[arg(long, default_value_t = 25 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// Interval between retry-queue delivery sweeps, in seconds.
    #[arg(long, default_value_t = 5)]
    retry_sweep_secs: u64,

    /// Interval between expiry sweeps, in seconds.
    #[arg(long, default_value_t = 3600)]
    expiry_sweep_secs: u64,

    /// Enable verbose request/response logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { EnvFilter::new("case=debug,case_daemon=debug") } else { EnvFilter::new("case=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => CaseEngineConfig::from_file(path).with_context(|| format!("load config {}", path.display()))?,
        None => CaseEngineConfig::default(),
    };
    let env: BTreeMap<String, String> = std::env::vars().collect();
    config.apply_env_overlay(&env).context("apply environment overlay")?;
    for warning in config.validate().context("validate config")? {
        tracing::warn!(%warning, "configuration warning");
    }

    std::fs::create_dir_all(&args.evidence_dir).with_context(|| format!("create evidence dir {}", args.evidence_dir.display()))?;

    let http = reqwest::Client::new();

    let cases = Arc::new(CaseStore::new());
    let events = Arc::new(EventStore::new());
    let leases = Arc::new(LeaseTable::new());
    let evidence = Arc::new(EvidenceStore::new(args.evidence_dir.clone()));
    let catalog_cache = Arc::new(case_store::CatalogCache::new(chrono::Duration::seconds(config.catalog_cache_ttl_secs as i64)));
    let catalog_source = SharedCatalogSource::new();
    let fingerprints = Arc::new(FingerprintStore::new());
    let outbox = Arc::new(OutboxStore::new());
    let retry_queue = Arc::new(RetryQueue::new());

    let decoder = RemoteWorkbookDecoder::new(http.clone(), args.decoder_endpoint.clone());

    let providers: Vec<Arc<dyn ProviderBackend>> = config
        .committee_provider_pool
        .iter()
        .map(|provider_id| {
            let family = provider_id.split('/').next().unwrap_or(provider_id).to_string();
            let descriptor = ProviderDescriptor { id: provider_id.clone(), family };
            let endpoint = format!("{}/{provider_id}", args.committee_endpoint_base.trim_end_matches('/'));
            Arc::new(HttpModelProvider::new(http.clone(), descriptor, endpoint)) as Arc<dyn ProviderBackend>
        })
        .collect();

    let weights = match &config.committee_weights_file {
        Some(path) => WeightsFile::load(std::path::Path::new(path)).with_context(|| format!("load committee weights {path}"))?,
        None => WeightsFile::default(),
    };

    let client = Arc::new(ZohoBookkeepingClient::new(http.clone(), args.draft_order_endpoint.clone()));
    let refresher = OAuthClientCredentialsRefresher::new(http.clone(), args.oauth_token_endpoint.clone(), args.zoho_client_id.clone(), args.zoho_client_secret.clone());
    let tokens = TokenCache::new(refresher);

    let engine = Arc::new(CaseEngine::new(
        cases.clone(),
        events.clone(),
        leases.clone(),
        evidence.clone(),
        catalog_cache,
        catalog_source.clone(),
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

    let retry_policy = RetryPolicy::new(config.retry_base_ms, config.retry_cap_ms, config.retry_max_attempts);
    let metrics = CaseMetrics::new();

    let state = Arc::new(AppState {
        cases: cases.clone(),
        events: events.clone(),
        evidence: evidence.clone(),
        engine: engine.clone(),
        decoder,
        providers,
        weights,
        committee_ambiguity_margin: config.committee_ambiguity_margin,
        retry_policy,
        http: http.clone(),
        blob_endpoint: config.blob_endpoint.clone(),
        internal_tool_key: args.internal_tool_key.clone(),
        max_upload_bytes: args.max_upload_bytes,
        metrics,
        retry_queue: retry_queue.clone(),
        outbox: outbox.clone(),
    });

    spawn_catalog_refresh_job(http.clone(), args.catalog_endpoint.clone(), catalog_source, Duration::from_secs(args.catalog_refresh_secs));
    spawn_retry_sweep(state.clone(), retry_queue, Duration::from_secs(args.retry_sweep_secs));
    spawn_outbox_sweep(outbox, Duration::from_secs(args.retry_sweep_secs));
    spawn_expiry_sweep(state.clone(), Duration::from_secs(args.expiry_sweep_secs));

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&args.bind).await.with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "case-daemon listening");
    axum::serve(listener, app).await.context("serve")
}

/// Periodically claims eligible retry-queue items and resubmits them.
fn spawn_retry_sweep(state: Arc<AppState>, retry_queue: Arc<RetryQueue>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            while let Some(claim) = retry_queue.claim_next(now, chrono::Duration::seconds(30)) {
                let case_id = claim.item.case_id;
                let Ok(case) = state.cases.get(case_id) else {
                    retry_queue.remove(case_id);
                    continue;
                };
                if let Err(err) = state.engine.prepare_retry(case_id, now) {
                    tracing::warn!(case_id = %case_id, error = %err, "failed to re-enter creating_draft for retry");
                    continue;
                }
                let order = match load_retry_order(&state, case_id) {
                    Some(order) => order,
                    None => {
                        tracing::warn!(case_id = %case_id, "no working order recorded, cannot resubmit");
                        continue;
                    }
                };
                let started = std::time::Instant::now();
                let result = state.engine.submit(&case, &order, &state.retry_policy, now).await;
                state.metrics.record(case_telemetry::StageMetrics {
                    stage: "submitter".to_string(),
                    case_id: case_id.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    succeeded: result.is_ok(),
                    retry_attempts: claim.item.attempt_count,
                    issues_count: 0,
                });
                match result {
                    Ok(_) => retry_queue.remove(case_id),
                    Err(err) => tracing::warn!(case_id = %case_id, error = %err, "retry submission attempt failed"),
                }
            }
        }
    })
}

fn load_retry_order(state: &AppState, case_id: uuid::Uuid) -> Option<case_core::CanonicalOrder> {
    let bytes = state.evidence.get(&format!("orders-audit/{case_id}/canonical.json")).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Periodically logs and acknowledges pending outbox entries.
///
/// The outbox holds events destined for a downstream notifier (the chat
/// bot, a metrics sink); this daemon's job is only to flush it, not to
/// own that downstream's delivery semantics.
fn spawn_outbox_sweep(outbox: Arc<OutboxStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            for entry in outbox.pending() {
                tracing::info!(case_id = %entry.case_id, event_type = ?entry.event_type, "outbox entry delivered");
                outbox.mark_processed(entry.id, now);
            }
        }
    })
}

/// Periodically cancels cases parked past their wait-timeout deadline.
fn spawn_expiry_sweep(state: Arc<AppState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            for case_id in state.engine.expired_case_ids(now) {
                if let Err(err) = state.engine.cancel(case_id, Actor::scheduler(), now) {
                    tracing::warn!(case_id = %case_id, error = %err, "expiry sweep failed to cancel case");
                }
            }
        }
    })
}
