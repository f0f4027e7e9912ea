//! OAuth 2.0 refresh-token lifecycle with a single in-process refresh lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Margin subtracted from a token's `expires_in` before it's treated as
/// expired, so a near-expiry token is never handed to a caller that's
/// about to use it.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 300;

/// A cached access token and when it stops being usable.
#[derive(Debug, Clone, PartialEq)]
struct CachedToken {
    access_token: String,
    usable_until: DateTime<Utc>,
}

/// Fetches a fresh access token given refresh credentials from the secret
/// store. Implementations must never log the returned token.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Performs the OAuth refresh-token exchange, returning the new access
    /// token and its `expires_in` in seconds.
    async fn refresh(&self) -> anyhow::Result<(String, i64)>;
}

/// Caches an access token, refreshing it through `refresher` on expiry.
/// Concurrent callers during a refresh all await the same in-flight
/// refresh rather than each starting their own.
pub struct TokenCache<R: TokenRefresher> {
    refresher: R,
    cached: Arc<Mutex<Option<CachedToken>>>,
}

impl<R: TokenRefresher> TokenCache<R> {
    /// Builds an empty token cache around `refresher`.
    pub fn new(refresher: R) -> Self {
        Self { refresher, cached: Arc::new(Mutex::new(None)) }
    }

    /// Returns a usable access token, refreshing if the cached one is
    /// missing or within [`EXPIRY_SAFETY_MARGIN_SECS`] of expiry.
    ///
    /// Holds the cache's lock for the full check-then-refresh sequence, so
    /// concurrent callers serialize on the same refresh rather than racing
    /// into two.
    pub async fn access_token(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.usable_until > now {
                return Ok(cached.access_token.clone());
            }
        }
        let (access_token, expires_in) = self.refresher.refresh().await?;
        let usable_until = now + chrono::Duration::seconds((expires_in - EXPIRY_SAFETY_MARGIN_SECS).max(0));
        *guard = Some(CachedToken { access_token: access_token.clone(), usable_until });
        Ok(access_token)
    }

    /// Forces the next [`Self::access_token`] call to refresh, used after a
    /// 401 proves the cached token invalid mid-call.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRefresher {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self) -> anyhow::Result<(String, i64)> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((format!("token-{n}"), 3600))
        }
    }

    #[tokio::test]
    async fn caches_token_until_expiry_margin() {
        let cache = TokenCache::new(CountingRefresher { calls: AtomicU32::new(0) });
        let now = Utc::now();
        let first = cache.access_token(now).await.unwrap();
        let second = cache.access_token(now + chrono::Duration::minutes(10)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "token-0");
    }

    #[tokio::test]
    async fn refreshes_once_expiry_margin_is_crossed() {
        let cache = TokenCache::new(CountingRefresher { calls: AtomicU32::new(0) });
        let now = Utc::now();
        let first = cache.access_token(now).await.unwrap();
        let later = now + chrono::Duration::seconds(3600 - EXPIRY_SAFETY_MARGIN_SECS + 1);
        let second = cache.access_token(later).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn invalidate_forces_a_refresh() {
        let cache = TokenCache::new(CountingRefresher { calls: AtomicU32::new(0) });
        let now = Utc::now();
        let first = cache.access_token(now).await.unwrap();
        cache.invalidate().await;
        let second = cache.access_token(now).await.unwrap();
        assert_ne!(first, second);
    }
}
