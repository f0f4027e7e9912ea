// SPDX-License-Identifier: MIT OR Apache-2.0
//! Case-browser queries and the local dry-run pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use case_committee::calibrate::WeightsFile;
use case_committee::provider::{ProviderBackend, ProviderDescriptor};
use case_committee::{run_committee, CommitteeResult};
use case_core::{Case, CanonicalOrder};
use case_extractor::sheet::{Cell, SheetMatrix, Workbook};
use case_extractor::{extract, ExtractConfig};
use case_resolver::{resolve_order, ResolverConfig};
use chrono::Utc;
use uuid::Uuid;

use case_daemon::adapters::HttpModelProvider;

/// Caller identity forwarded as the trusted-header triple every
/// case-browser request carries.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// One of `SalesUser`, `SalesManager`, `OpsAuditor`.
    pub role: String,
    /// The caller's tenant.
    pub tenant_id: String,
    /// The caller's user id.
    pub user_id: String,
}

fn apply_identity(request: reqwest::RequestBuilder, identity: &CallerIdentity) -> reqwest::RequestBuilder {
    request
        .header("X-Auth-Role", &identity.role)
        .header("X-Auth-Tenant-Id", &identity.tenant_id)
        .header("X-Auth-User-Id", &identity.user_id)
}

/// Lists cases from a running daemon's `GET /cases`.
pub async fn cases_list(daemon_url: &str, identity: &CallerIdentity, query: &[(&str, String)]) -> Result<Vec<Case>> {
    let client = reqwest::Client::new();
    let url = format!("{}/cases", daemon_url.trim_end_matches('/'));
    let request = apply_identity(client.get(url), identity).query(query);
    let response = request.send().await.context("send cases list request")?.error_for_status().context("cases list request failed")?;
    response.json().await.context("parse cases list response")
}

/// Fetches one case and its working order from `GET /cases/{id}`.
pub async fn case_show(daemon_url: &str, identity: &CallerIdentity, case_id: Uuid) -> Result<serde_json::Value> {
    let client = reqwest::Client::new();
    let url = format!("{}/cases/{case_id}", daemon_url.trim_end_matches('/'));
    let request = apply_identity(client.get(url), identity);
    let response = request.send().await.context("send case show request")?.error_for_status().context("case show request failed")?;
    response.json().await.context("parse case show response")
}

/// Fetches a case's audit trail from `GET /cases/{id}/audit`.
pub async fn case_audit(daemon_url: &str, identity: &CallerIdentity, case_id: Uuid) -> Result<serde_json::Value> {
    let client = reqwest::Client::new();
    let url = format!("{}/cases/{case_id}/audit", daemon_url.trim_end_matches('/'));
    let request = apply_identity(client.get(url), identity);
    let response = request.send().await.context("send case audit request")?.error_for_status().context("case audit request failed")?;
    response.json().await.context("parse case audit response")
}

fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Decodes a plain CSV file into a single-sheet [`Workbook`], for
/// dry-running the pipeline without standing up a decoder service.
/// `xlsx`/`xls` bytes require `decode_remote` instead.
pub fn decode_csv(bytes: &[u8]) -> Result<Workbook> {
    let text = String::from_utf8_lossy(bytes);
    let rows: Vec<Vec<Cell>> = text
        .lines()
        .map(|line| {
            line.split(',')
                .enumerate()
                .map(|(col, raw)| Cell {
                    a1: format!("{}{}", column_letters(col), 1),
                    raw_value: raw.trim().to_string(),
                    is_formula: false,
                    number_format: None,
                    hidden: false,
                })
                .collect()
        })
        .collect();
    Ok(Workbook { sheets: vec![SheetMatrix { name: "Sheet1".to_string(), rows }] })
}

/// Decodes workbook bytes via a remote decoder service, for `xlsx`/`xls`
/// dry runs. Mirrors `case-daemon`'s own `RemoteWorkbookDecoder`, as a
/// direct async call rather than through the synchronous `WorkbookDecoder`
/// trait (the CLI has no synchronous seam to bridge).
pub async fn decode_remote(endpoint: &str, bytes: &[u8]) -> Result<Workbook> {
    let client = reqwest::Client::new();
    let response = client.post(endpoint).body(bytes.to_vec()).send().await.context("send decode request")?.error_for_status().context("decoder rejected the file")?;
    response.json().await.context("parse decoder response")
}

/// Reads `path` and decodes it, choosing the CSV path for `.csv` files and
/// the remote decoder for anything else.
pub async fn decode_file(path: &Path, decoder_endpoint: Option<&str>) -> Result<Workbook> {
    let bytes = std::fs::read(path).with_context(|| format!("read file '{}'", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => decode_csv(&bytes),
        _ => {
            let endpoint = decoder_endpoint.context("a non-CSV file needs --decoder-endpoint")?;
            decode_remote(endpoint, &bytes).await
        }
    }
}

/// Runs the extraction stage alone against a file on disk, for local
/// inspection of the deterministic column mapping before a committee or
/// the full daemon ever sees it.
pub async fn dry_run_parse(path: &Path, tenant_id: &str, decoder_endpoint: Option<&str>) -> Result<CanonicalOrder> {
    let bytes = std::fs::read(path).with_context(|| format!("read file '{}'", path.display()))?;
    let workbook = decode_file(path, decoder_endpoint).await?;
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("upload").to_string();
    let file_hash = case_core::sha256_hex(&bytes);
    extract(Uuid::new_v4(), tenant_id.to_string(), filename, file_hash, Utc::now(), &workbook, &ExtractConfig::default()).context("extraction failed")
}

/// Builds the committee's provider pool from `vendor_family/model`
/// identifiers and a shared endpoint base, matching `case-daemon`'s own
/// `--committee-endpoint-base` convention.
pub fn build_providers(provider_pool: &[String], endpoint_base: &str) -> Vec<Arc<dyn ProviderBackend>> {
    let http = reqwest::Client::new();
    provider_pool
        .iter()
        .map(|provider_id| {
            let family = provider_id.split('/').next().unwrap_or(provider_id).to_string();
            let descriptor = ProviderDescriptor { id: provider_id.clone(), family };
            let endpoint = format!("{}/{provider_id}", endpoint_base.trim_end_matches('/'));
            Arc::new(HttpModelProvider::new(http.clone(), descriptor, endpoint)) as Arc<dyn ProviderBackend>
        })
        .collect()
}

/// Runs the extractor then the committee over a file on disk, mirroring
/// `CaseEngine::run_committee_stage`'s own call shape.
#[allow(clippy::too_many_arguments)]
pub async fn dry_run_committee(
    path: &Path,
    tenant_id: &str,
    decoder_endpoint: Option<&str>,
    provider_pool: &[String],
    committee_endpoint_base: &str,
    weights: &WeightsFile,
    ambiguity_margin: f64,
    seed: u64,
) -> Result<(CanonicalOrder, CommitteeResult)> {
    let workbook = decode_file(path, decoder_endpoint).await?;
    let bytes = std::fs::read(path).with_context(|| format!("read file '{}'", path.display()))?;
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("upload").to_string();
    let file_hash = case_core::sha256_hex(&bytes);
    let order = extract(Uuid::new_v4(), tenant_id.to_string(), filename, file_hash, Utc::now(), &workbook, &ExtractConfig::default()).context("extraction failed")?;

    let pack = case_orchestrator::evidence_pack::build_evidence_pack(&order, &workbook);
    let providers = build_providers(provider_pool, committee_endpoint_base);
    let result = run_committee(&pack, &providers, weights, seed, Duration::from_secs(10), ambiguity_margin, 0.5).await;
    Ok((order, result))
}

/// Resolves an already-extracted order's customer and line items against
/// a catalog loaded from a local JSON file (`{"customers": [...], "items": [...]}`),
/// for dry-running the resolver without a live catalog service.
pub fn dry_run_resolve(order: &mut CanonicalOrder, catalog_path: &Path, config: &ResolverConfig) -> Result<()> {
    let content = std::fs::read_to_string(catalog_path).with_context(|| format!("read catalog file '{}'", catalog_path.display()))?;
    let catalog: LocalCatalog = serde_json::from_str(&content).with_context(|| format!("parse catalog file '{}'", catalog_path.display()))?;
    resolve_order(order, &catalog.customers, &catalog.items, config);
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct LocalCatalog {
    customers: Vec<case_core::CatalogCustomer>,
    items: Vec<case_core::CatalogItem>,
}
