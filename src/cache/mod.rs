// ABOUTME: Key-value cache abstraction and the per-commit manifest cache.
// ABOUTME: Caches are advisory: a miss only costs a reload, never correctness.

mod manifests;
mod memory;

pub use manifests::AppManifestsCache;
pub use memory::{DEFAULT_MAX_ENTRIES, MemoryCache};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache entry not found")]
    NotFound,

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// A string-keyed cache of cloneable values.
pub trait Cache<V>: Send + Sync {
    fn get(&self, key: &str) -> Result<V, CacheError>;

    fn put(&self, key: &str, value: V) -> Result<(), CacheError>;

    fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Let the backend finish pending housekeeping such as expiry.
    fn run_pending_tasks(&self) {}
}
