//! Bearer credentials for the PracticePanther API
//!
//! The client never reads tokens from ambient state. It asks an injected
//! `CredentialProvider` for a token on every request and tells it to drop the
//! token when the server answers 401.

use async_trait::async_trait;
use casesync_api::{Result, SyncError};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;

    /// Forget any cached token; the next `bearer_token` call must obtain a new one
    async fn invalidate(&self);
}

/// A fixed token, e.g. from config or `CASESYNC_API_TOKEN`
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(SyncError::Config("API token is empty".to_string()));
        }
        Ok(self.token.clone())
    }

    async fn invalidate(&self) {
        debug!("[StaticToken] Token rejected by server; static tokens cannot be refreshed");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + skew < expires_at,
            None => true,
        }
    }
}

/// Obtains a new access token out-of-band (OAuth refresh, secret store, ...)
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<AccessToken>;
}

/// Caches a refreshed token until it is invalidated or close to expiry
pub struct RefreshingCredentials<R: TokenRefresher> {
    refresher: R,
    cached: Mutex<Option<AccessToken>>,
    skew: Duration,
}

impl<R: TokenRefresher> RefreshingCredentials<R> {
    pub fn new(refresher: R) -> Self {
        Self {
            refresher,
            cached: Mutex::new(None),
            skew: Duration::seconds(60),
        }
    }

    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }
}

#[async_trait]
impl<R: TokenRefresher> CredentialProvider for RefreshingCredentials<R> {
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now(), self.skew) {
                return Ok(token.token.clone());
            }
        }

        let refreshed = self.refresher.refresh().await?;
        info!(
            "[RefreshingCredentials] Obtained new access token (expires_at={:?})",
            refreshed.expires_at
        );
        let token = refreshed.token.clone();
        *cached = Some(refreshed);
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
        debug!("[RefreshingCredentials] Cached token invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
        lifetime: Option<Duration>,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                token: format!("token-{}", n),
                expires_at: self.lifetime.map(|l| Utc::now() + l),
            })
        }
    }

    fn refresher(lifetime: Option<Duration>) -> CountingRefresher {
        CountingRefresher {
            calls: AtomicUsize::new(0),
            lifetime,
        }
    }

    #[tokio::test]
    async fn test_token_is_cached_until_invalidated() {
        let creds = RefreshingCredentials::new(refresher(Some(Duration::hours(1))));
        assert_eq!(creds.bearer_token().await.unwrap(), "token-1");
        assert_eq!(creds.bearer_token().await.unwrap(), "token-1");

        creds.invalidate().await;
        assert_eq!(creds.bearer_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_token_inside_skew_window_is_refreshed() {
        // Expires in 30s, inside the default 60s skew
        let creds = RefreshingCredentials::new(refresher(Some(Duration::seconds(30))));
        assert_eq!(creds.bearer_token().await.unwrap(), "token-1");
        assert_eq!(creds.bearer_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_non_expiring_token_is_reused() {
        let creds = RefreshingCredentials::new(refresher(None)).with_skew(Duration::zero());
        creds.bearer_token().await.unwrap();
        assert_eq!(creds.bearer_token().await.unwrap(), "token-1");
    }

    #[tokio::test]
    async fn test_empty_static_token_is_a_config_error() {
        let err = StaticToken::new("  ").bearer_token().await.unwrap_err();
        assert_eq!(err.category(), "config");
        assert_eq!(StaticToken::new("abc").bearer_token().await.unwrap(), "abc");
    }
}
