//! Token acquisition boundary for FhirGate outbound calls.
//!
//! The REST binding attaches a bearer token to every downstream request; how
//! that token is obtained is an external concern hidden behind
//! [`TokenProvider`]. This crate ships the two implementations the engine
//! needs out of the box:
//!
//! - [`StaticTokenProvider`] - a fixed token, for development and tests
//! - [`CachingTokenProvider`] - a decorator that caches tokens per resource
//!   and scope set until shortly before they expire
//!
//! Acquiring a token from a real identity provider lives outside this
//! workspace; such a provider only has to implement the trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while acquiring a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider could not produce a token.
    #[error("Token acquisition failed: {0}")]
    Acquisition(String),

    /// The provider has no token for the requested resource.
    #[error("No token available for resource: {resource}")]
    NoToken { resource: String },
}

impl AuthError {
    /// Create a new Acquisition error
    pub fn acquisition(message: impl Into<String>) -> Self {
        Self::Acquisition(message.into())
    }

    /// Create a new NoToken error
    pub fn no_token(resource: impl Into<String>) -> Self {
        Self::NoToken {
            resource: resource.into(),
        }
    }
}

// =============================================================================
// Access tokens
// =============================================================================

/// A bearer token with an optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// The raw token value, sent as `Authorization: Bearer <value>`.
    pub value: String,
    /// When the token stops being valid. `None` means it never expires.
    pub expires_at: Option<OffsetDateTime>,
}

impl AccessToken {
    /// A token without an expiry.
    pub fn bearer(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// A token that expires at the given instant.
    pub fn with_expiry(value: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Whether the token expires within `leeway` from now.
    pub fn expires_within(&self, leeway: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= OffsetDateTime::now_utc() + leeway,
            None => false,
        }
    }
}

// Token values are secrets; keep them out of debug output.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Provider contract
// =============================================================================

/// Source of bearer tokens for outbound calls.
///
/// Implementations must be safe to share across concurrent pipeline
/// executions.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquire a token for calls against `resource` with the given scopes.
    async fn acquire_token(&self, resource: &str, scopes: &[&str])
    -> Result<AccessToken, AuthError>;
}

/// Provider that always returns one fixed token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    /// Provider for a plain non-expiring bearer value.
    pub fn bearer(value: impl Into<String>) -> Self {
        Self::new(AccessToken::bearer(value))
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire_token(
        &self,
        _resource: &str,
        _scopes: &[&str],
    ) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

// =============================================================================
// Caching decorator
// =============================================================================

/// Default head start before expiry at which a cached token is refreshed.
pub const DEFAULT_REFRESH_LEEWAY: Duration = Duration::from_secs(60);

/// Decorator that caches tokens from an inner provider.
///
/// Tokens are cached per `(resource, scopes)` pair and re-acquired once they
/// fall within the refresh leeway of their expiry, so the binding never sends
/// a token that is about to lapse mid-flight.
pub struct CachingTokenProvider {
    inner: Arc<dyn TokenProvider>,
    refresh_leeway: Duration,
    cache: RwLock<HashMap<String, AccessToken>>,
}

impl CachingTokenProvider {
    pub fn new(inner: Arc<dyn TokenProvider>) -> Self {
        Self {
            inner,
            refresh_leeway: DEFAULT_REFRESH_LEEWAY,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the refresh leeway.
    #[must_use]
    pub fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = leeway;
        self
    }

    /// Drop all cached tokens, forcing re-acquisition on next use.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Number of cached tokens.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Returns `true` if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    fn cache_key(resource: &str, scopes: &[&str]) -> String {
        format!("{resource}|{}", scopes.join(" "))
    }
}

#[async_trait]
impl TokenProvider for CachingTokenProvider {
    async fn acquire_token(
        &self,
        resource: &str,
        scopes: &[&str],
    ) -> Result<AccessToken, AuthError> {
        let key = Self::cache_key(resource, scopes);

        {
            let cache = self.cache.read().await;
            if let Some(token) = cache.get(&key)
                && !token.expires_within(self.refresh_leeway)
            {
                tracing::trace!(resource, "token cache hit");
                return Ok(token.clone());
            }
        }

        tracing::debug!(resource, "token cache miss, acquiring");
        let token = self.inner.acquire_token(resource, scopes).await?;
        self.cache.write().await.insert(key, token.clone());
        Ok(token)
    }
}
