// ABOUTME: Object storage contract and a local-directory implementation.
// ABOUTME: Also persists completed stage logs as JSON objects.

mod local;
mod logs;

pub use local::LocalFileStore;
pub use logs::FileLogStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored object. Listings leave `content` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub path: String,
    pub size: u64,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get_object(&self, path: &str) -> Result<Object, FileStoreError>;

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), FileStoreError>;

    /// Objects whose path starts with `prefix`, sorted by path.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<Object>, FileStoreError>;
}
