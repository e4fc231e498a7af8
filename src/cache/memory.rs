// ABOUTME: In-memory cache backed by moka, bounded by entry count with an optional time-to-live.
// ABOUTME: Expired and over-capacity entries are dropped by moka's own housekeeping.

use std::time::Duration;

use super::{Cache, CacheError};

/// Entry bound used when none is given.
pub const DEFAULT_MAX_ENTRIES: u64 = 512;

pub struct MemoryCache<V> {
    inner: moka::sync::Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> MemoryCache<V> {
    /// A cache whose entries never expire.
    pub fn new() -> Self {
        Self::bounded(DEFAULT_MAX_ENTRIES, None)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::bounded(DEFAULT_MAX_ENTRIES, Some(ttl))
    }

    /// At most `max_entries` entries, each living for `ttl` when set.
    pub fn bounded(max_entries: u64, ttl: Option<Duration>) -> Self {
        let mut builder = moka::sync::Cache::builder().max_capacity(max_entries);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
        }
    }

    /// Approximate entry count; exact after `run_pending_tasks`.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> Cache<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Result<V, CacheError> {
        self.inner.get(key).ok_or(CacheError::NotFound)
    }

    fn put(&self, key: &str, value: V) -> Result<(), CacheError> {
        self.inner.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.invalidate(key);
        Ok(())
    }

    fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }
}
