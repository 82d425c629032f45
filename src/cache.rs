//! Shared cache for upstream responses
//!
//! Upstream clients are created per request, but they all read and write a
//! single process-wide [`ResponseCache`]. Entries are decoded JSON bodies
//! keyed by a hash of the normalized request (method + URL).
//!
//! ## How It Works
//!
//! 1. **Cache Key**: SHA-256 of `"<METHOD> <normalized url>"`
//! 2. **Cache Hit**: a fresh entry is returned without touching the network
//! 3. **Cache Miss**: the caller fetches and stores the whole decoded body
//! 4. **Eviction**: oldest entries go first once `max_size` is reached
//!
//! Every entry is replaced as a unit under the write lock, so concurrent
//! requests racing on the same key observe either the old or the new value.
//!
//! ## Example
//!
//! ```rust
//! use movies_gateway::cache::{CacheConfig, ResponseCache};
//! use std::time::Duration;
//!
//! let cache = ResponseCache::new(CacheConfig {
//!     max_size: 100,
//!     default_ttl: Duration::from_secs(60),
//! });
//! let key = ResponseCache::generate_cache_key("GET", "https://example.com/posts");
//! cache.put(key.clone(), serde_json::json!([]));
//! assert!(cache.get(&key).is_some());
//! ```

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for the upstream response cache
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Maximum number of cached responses
    pub max_size: usize,
    /// Freshness window applied when the upstream gives no `max-age`
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// A cached upstream response
#[derive(Clone, Debug)]
pub struct CachedResponse {
    /// The decoded JSON body
    pub body: serde_json::Value,
    /// When the entry was created
    pub created_at: Instant,
    /// TTL for this specific entry
    pub ttl: Duration,
}

impl CachedResponse {
    /// Check if this entry is expired
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedResponse>,
    insertion_order: VecDeque<String>,
}

impl CacheState {
    fn remove_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let entries = &self.entries;
        self.insertion_order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }
}

/// Thread-safe response cache with TTL expiry and oldest-first eviction
pub struct ResponseCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
}

/// Handle shared between the request context factory and every client
pub type SharedResponseCache = Arc<ResponseCache>;

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Current number of entries, expired ones included
    pub size: usize,
    /// Configured capacity
    pub max_size: usize,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// The configured default freshness window
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Generate a cache key for a request
    ///
    /// The method is upper-cased and the URL is parsed and re-serialized so
    /// that equivalent spellings (`HTTP://Host:80/posts` vs
    /// `http://host/posts`) share an entry.
    pub fn generate_cache_key(method: &str, url: &str) -> String {
        let normalized_url = reqwest::Url::parse(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.trim().to_string());

        let mut hasher = Sha256::new();
        hasher.update(method.trim().to_ascii_uppercase().as_bytes());
        hasher.update(b" ");
        hasher.update(normalized_url.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Get a fresh cached body by cache key
    pub fn get(&self, cache_key: &str) -> Option<serde_json::Value> {
        let state = self.state.read();
        let entry = state.entries.get(cache_key)?;

        if entry.is_expired() {
            tracing::debug!(cache_key = %cache_key, "Upstream cache miss (expired)");
            return None;
        }

        tracing::debug!(cache_key = %cache_key, "Upstream cache hit");
        Some(entry.body.clone())
    }

    /// Store a body with the default TTL
    pub fn put(&self, cache_key: String, body: serde_json::Value) {
        self.put_with_ttl(cache_key, body, self.config.default_ttl);
    }

    /// Store a body with an explicit TTL, replacing any previous entry
    pub fn put_with_ttl(&self, cache_key: String, body: serde_json::Value, ttl: Duration) {
        if self.config.max_size == 0 || ttl.is_zero() {
            return;
        }

        let entry = CachedResponse {
            body,
            created_at: Instant::now(),
            ttl,
        };

        let mut state = self.state.write();
        if state.entries.insert(cache_key.clone(), entry).is_some() {
            state.insertion_order.retain(|k| k != &cache_key);
        }
        state.insertion_order.push_back(cache_key.clone());

        // Expired entries go before any live one is evicted
        if state.entries.len() > self.config.max_size {
            state.remove_expired();
        }

        while state.entries.len() > self.config.max_size {
            let Some(oldest) = state.insertion_order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }

        tracing::debug!(
            cache_key = %cache_key,
            ttl_secs = ttl.as_secs(),
            "Upstream response cached"
        );
    }

    /// Drop every entry whose TTL has elapsed, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.state.write().remove_expired()
    }

    /// Clear all cached responses
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.insertion_order.clear();
        tracing::debug!("Upstream cache cleared");
    }

    /// Get the current number of cached responses
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            max_size: self.config.max_size,
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("size", &self.len())
            .finish()
    }
}

/// Create a shared response cache
pub fn create_response_cache(config: CacheConfig) -> SharedResponseCache {
    Arc::new(ResponseCache::new(config))
}
