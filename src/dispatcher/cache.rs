//! Bounded memo of composed pipelines, keyed by verb and normalised path.

use std::fmt;

use tracing::debug;

use crate::cache::FifoCache;
use crate::middleware::Pipeline;
use crate::router::RouteMatch;

/// Entries kept before the oldest is evicted.
pub const DISPATCH_CACHE_CAPACITY: usize = 1024;

/// A resolved dispatch: the pipeline plus the routing facts bound to each
/// request it serves.
#[derive(Clone)]
pub struct CacheEntry {
    pub pipeline: Pipeline,
    pub controller: String,
    pub action: String,
    /// `None` for static files
    pub route: Option<RouteMatch>,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("controller", &self.controller)
            .field("action", &self.action)
            .field("route", &self.route.as_ref().map(|r| r.route().pattern()))
            .finish()
    }
}

/// FIFO-bounded map from `"{VERB}{path}"` to [`CacheEntry`].
///
/// A hit skips route matching and pipeline composition entirely.
pub struct DispatchCache {
    entries: FifoCache<String, CacheEntry>,
}

impl Default for DispatchCache {
    fn default() -> Self {
        Self::with_capacity(DISPATCH_CACHE_CAPACITY)
    }
}

impl DispatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: FifoCache::with_capacity(capacity),
        }
    }

    /// `GET` + `/users/42` -> `GET/users/42`.
    pub fn key(method: &str, path: &str) -> String {
        let mut key = String::with_capacity(method.len() + path.len());
        key.push_str(method);
        key.push_str(path);
        key
    }

    pub fn lookup(&self, method: &str, path: &str) -> Option<&CacheEntry> {
        self.entries.get(Self::key(method, path).as_str())
    }

    /// Store `entry`, evicting the oldest key at capacity. Returns the
    /// evicted key.
    pub fn insert(&mut self, method: &str, path: &str, entry: CacheEntry) -> Option<String> {
        let evicted = self.entries.insert(Self::key(method, path), entry);
        if let Some(key) = &evicted {
            debug!(evicted = %key, size = self.entries.len(), "Dispatch cache eviction");
        }
        evicted
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
