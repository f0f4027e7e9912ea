//! Concrete reqwest-backed implementations of the engine's external
//! collaborator seams: the workbook decoder, the OAuth token refresher,
//! the bookkeeping client, the committee's model providers, and the
//! catalog source.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use case_committee::provider::{EvidencePack, ProviderBackend, ProviderDescriptor, ProviderOutput};
use case_core::{CatalogCustomer, CatalogItem};
use case_extractor::sheet::{Workbook, WorkbookDecoder};
use case_orchestrator::CatalogSource;
use case_submitter::client::{BookkeepingClient, ClientError};
use case_submitter::payload::SubmissionPayload;
use case_submitter::token::TokenRefresher;
use serde::{Deserialize, Serialize};

/// Failure decoding a workbook through the remote decoder service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteDecodeError {
    /// The HTTP call itself failed.
    #[error("decoder request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// The decoder rejected the bytes (unsupported or corrupt workbook).
    #[error("decoder rejected the file ({status}): {message}")]
    Rejected {
        /// The HTTP status the decoder returned.
        status: u16,
        /// The decoder's error message.
        message: String,
    },
}

/// Decodes workbook bytes by delegating to an external decoder service,
/// consistent with [`WorkbookDecoder`]'s seam: this system never parses
/// a spreadsheet binary format itself.
#[derive(Clone)]
pub struct RemoteWorkbookDecoder {
    http: reqwest::Client,
    endpoint: String,
}

impl RemoteWorkbookDecoder {
    /// Builds a decoder that posts raw file bytes to `endpoint`.
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self { http, endpoint: endpoint.into() }
    }
}

impl WorkbookDecoder for RemoteWorkbookDecoder {
    type Error = RemoteDecodeError;

    fn decode(&self, bytes: &[u8]) -> Result<Workbook, Self::Error> {
        let runtime = tokio::runtime::Handle::current();
        tokio::task::block_in_place(|| {
            runtime.block_on(async {
                let response = self.http.post(&self.endpoint).body(bytes.to_vec()).send().await.map_err(RemoteDecodeError::Request)?;
                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(RemoteDecodeError::Rejected { status: status.as_u16(), message });
                }
                response.json::<Workbook>().await.map_err(RemoteDecodeError::Request)
            })
        })
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Performs the OAuth 2.0 client-credentials exchange against the
/// bookkeeping service's token endpoint.
pub struct OAuthClientCredentialsRefresher {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
}

impl OAuthClientCredentialsRefresher {
    /// Builds a refresher for `token_endpoint` using the given client
    /// credentials. `client_secret` is never logged.
    pub fn new(http: reqwest::Client, token_endpoint: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self { http, token_endpoint: token_endpoint.into(), client_id: client_id.into(), client_secret: client_secret.into() }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClientCredentialsRefresher {
    async fn refresh(&self) -> anyhow::Result<(String, i64)> {
        let request = TokenRequest { grant_type: "client_credentials", client_id: &self.client_id, client_secret: &self.client_secret };
        let response = self.http.post(&self.token_endpoint).form(&request).send().await?.error_for_status()?;
        let token: TokenResponse = response.json().await?;
        Ok((token.access_token, token.expires_in))
    }
}

/// Creates draft sales orders against the external bookkeeping service.
pub struct ZohoBookkeepingClient {
    http: reqwest::Client,
    draft_order_endpoint: String,
}

impl ZohoBookkeepingClient {
    /// Builds a client posting draft orders to `draft_order_endpoint`.
    pub fn new(http: reqwest::Client, draft_order_endpoint: impl Into<String>) -> Self {
        Self { http, draft_order_endpoint: draft_order_endpoint.into() }
    }
}

#[derive(Debug, Deserialize)]
struct DraftOrderResponse {
    salesorder_id: String,
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl BookkeepingClient for ZohoBookkeepingClient {
    async fn create_draft_order(&self, access_token: &str, payload: &SubmissionPayload) -> Result<String, ClientError> {
        let response = self
            .http
            .post(&self.draft_order_endpoint)
            .bearer_auth(access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| ClientError::Transient { message: e.to_string(), retry_after: None })?;

        let status = response.status();
        if status.is_success() {
            let body: DraftOrderResponse = response.json().await.map_err(|e| ClientError::Transient { message: e.to_string(), retry_after: None })?;
            return Ok(body.salesorder_id);
        }

        if status.as_u16() == 401 {
            return Err(ClientError::AuthExpired);
        }
        if status.as_u16() == 429 || status.is_server_error() {
            let retry_after = parse_retry_after(&response);
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Transient { message, retry_after });
        }
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::NonTransient { status: status.as_u16(), message })
    }
}

/// Calls a hosted model's mapping endpoint for one committee provider.
///
/// Every entry in `COMMITTEE_PROVIDER_POOL` is wired to one of these,
/// pointed at that vendor/model's HTTP endpoint; the committee itself
/// stays oblivious to which concrete vendor answered.
pub struct HttpModelProvider {
    http: reqwest::Client,
    descriptor: ProviderDescriptor,
    endpoint: String,
}

impl HttpModelProvider {
    /// Builds a provider that posts evidence packs to `endpoint`.
    pub fn new(http: reqwest::Client, descriptor: ProviderDescriptor, endpoint: impl Into<String>) -> Self {
        Self { http, descriptor, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl ProviderBackend for HttpModelProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        self.descriptor.clone()
    }

    async fn propose(&self, pack: &EvidencePack, timeout: Duration) -> anyhow::Result<ProviderOutput> {
        let response = self.http.post(&self.endpoint).timeout(timeout).json(pack).send().await?.error_for_status()?;
        let output: ProviderOutput = response.json().await?;
        Ok(output)
    }
}

/// A synchronous, `RwLock`-backed snapshot of the customer/item catalog.
///
/// [`CatalogSource::fetch`] is a plain synchronous function, matching
/// `CatalogCache::get_or_refresh`'s closure parameter; a separate async
/// task refreshes this snapshot in the background and swaps it in, so no
/// async call ever has to happen from inside `fetch` itself.
pub struct SharedCatalogSource {
    snapshot: RwLock<(Vec<CatalogCustomer>, Vec<CatalogItem>)>,
}

impl SharedCatalogSource {
    /// Builds a catalog source starting from an empty snapshot.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { snapshot: RwLock::new((Vec::new(), Vec::new())) })
    }

    /// Replaces the snapshot, called by the background refresh task.
    pub fn swap(&self, customers: Vec<CatalogCustomer>, items: Vec<CatalogItem>) {
        *self.snapshot.write().expect("catalog snapshot lock poisoned") = (customers, items);
    }
}

impl CatalogSource for SharedCatalogSource {
    fn fetch(&self) -> anyhow::Result<(Vec<CatalogCustomer>, Vec<CatalogItem>)> {
        Ok(self.snapshot.read().expect("catalog snapshot lock poisoned").clone())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    customers: Vec<CatalogCustomer>,
    items: Vec<CatalogItem>,
}

/// Failure fetching an uploaded file's bytes from the blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobFetchError {
    /// The HTTP call itself failed, or the blob store returned an error
    /// status.
    #[error("blob fetch failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Fetches the bytes a chat-inbound webhook's `blob_pointer` refers to.
///
/// `blob_pointer` is joined onto `blob_endpoint` as a path segment; the
/// chat bot and this daemon agree on that convention out of band.
pub async fn fetch_blob(http: &reqwest::Client, blob_endpoint: &str, blob_pointer: &str) -> Result<Vec<u8>, BlobFetchError> {
    let url = format!("{}/{}", blob_endpoint.trim_end_matches('/'), blob_pointer.trim_start_matches('/'));
    let bytes = http.get(url).send().await?.error_for_status()?.bytes().await?;
    Ok(bytes.to_vec())
}

/// Fetches the current catalog from the bookkeeping service's catalog
/// endpoint, for the background refresh task to call on an interval.
pub async fn fetch_catalog(http: &reqwest::Client, endpoint: &str) -> anyhow::Result<(Vec<CatalogCustomer>, Vec<CatalogItem>)> {
    let body: CatalogResponse = http.get(endpoint).send().await?.error_for_status()?.json().await?;
    Ok((body.customers, body.items))
}

/// Spawns the background task that refreshes `source` from `endpoint`
/// every `interval`, logging and skipping a failed poll rather than
/// panicking the daemon.
pub fn spawn_catalog_refresh_job(http: reqwest::Client, endpoint: String, source: Arc<SharedCatalogSource>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match fetch_catalog(&http, &endpoint).await {
                Ok((customers, items)) => {
                    tracing::info!(customers = customers.len(), items = items.len(), "catalog refreshed");
                    source.swap(customers, items);
                }
                Err(err) => tracing::warn!(error = %err, "catalog refresh poll failed, keeping stale snapshot"),
            }
        }
    })
}
