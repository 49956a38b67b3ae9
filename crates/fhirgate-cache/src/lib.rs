//! Object cache tiers used by FhirGate channels.
//!
//! Channels that cannot push an oversized payload through their transport
//! park the payload here and send a reference envelope instead. The cache is
//! best-effort: a failing remote tier degrades to a miss, never to a request
//! failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend rejected or failed the operation.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// The backend cannot be reached at all.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    /// Create a new Backend error
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create a new Unavailable error
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

// =============================================================================
// Contract
// =============================================================================

/// Keyed byte store with per-entry expiry.
///
/// The remote half of a production deployment (blob store, Redis) lives
/// outside this workspace and only has to implement this trait.
#[async_trait]
pub trait ObjectCache: Send + Sync {
    /// Store a value under `key`.
    async fn add(&self, key: &str, value: Bytes) -> Result<(), CacheError>;

    /// Fetch a value. Expired entries count as absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Remove a value. Returns whether an entry was removed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;
}

// =============================================================================
// Local tier
// =============================================================================

/// A cached entry with TTL support.
///
/// `Bytes` clones are reference-counted, so cache hits never copy the
/// payload.
#[derive(Clone, Debug)]
struct CachedObject {
    data: Bytes,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedObject {
    fn new(data: Bytes, ttl: Duration) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// In-process object cache over a concurrent map.
#[derive(Clone)]
pub struct MemoryObjectCache {
    entries: Arc<DashMap<String, CachedObject>>,
    ttl: Duration,
}

impl MemoryObjectCache {
    /// Default entry lifetime.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }
}

impl Default for MemoryObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectCache for MemoryObjectCache {
    async fn add(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CachedObject::new(value, self.ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.data.clone())),
            Some(entry) => {
                // Expired entries are removed on access.
                drop(entry);
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }
}

// =============================================================================
// Tiered composition
// =============================================================================

/// Two-tier cache: a local map in front of a remote backend.
///
/// Lookup order is local first, then remote; a remote hit is promoted into
/// the local tier. Remote failures are logged and degrade to a miss so the
/// caller never sees them.
pub struct TieredObjectCache {
    local: MemoryObjectCache,
    remote: Arc<dyn ObjectCache>,
}

impl TieredObjectCache {
    pub fn new(local: MemoryObjectCache, remote: Arc<dyn ObjectCache>) -> Self {
        Self { local, remote }
    }

    /// Entries currently held in the local tier.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

#[async_trait]
impl ObjectCache for TieredObjectCache {
    async fn add(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.local.add(key, value.clone()).await?;
        if let Err(error) = self.remote.add(key, value).await {
            tracing::warn!(key, error = %error, "remote cache add failed");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        if let Some(data) = self.local.get(key).await? {
            tracing::trace!(key, "cache hit (local)");
            return Ok(Some(data));
        }

        match self.remote.get(key).await {
            Ok(Some(data)) => {
                tracing::debug!(key, "cache hit (remote)");
                self.local.add(key, data.clone()).await?;
                Ok(Some(data))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                tracing::warn!(key, error = %error, "remote cache get failed");
                Ok(None)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let local_removed = self.local.remove(key).await?;
        let remote_removed = match self.remote.remove(key).await {
            Ok(removed) => removed,
            Err(error) => {
                tracing::warn!(key, error = %error, "remote cache remove failed");
                false
            }
        };
        Ok(local_removed || remote_removed)
    }
}
