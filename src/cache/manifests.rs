// ABOUTME: Cache of parsed application manifests keyed by application and commit.
// ABOUTME: A commit's manifests never change, so entries are never invalidated by content.

use std::future::Future;
use std::sync::Arc;

use super::{Cache, CacheError};
use crate::types::{ApplicationId, CommitHash};

/// Parsed manifests of one application at one commit.
pub struct AppManifestsCache<M> {
    app_id: ApplicationId,
    backend: Arc<dyn Cache<M>>,
}

impl<M> Clone for AppManifestsCache<M> {
    fn clone(&self) -> Self {
        Self {
            app_id: self.app_id.clone(),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<M: Clone> AppManifestsCache<M> {
    pub fn new(app_id: ApplicationId, backend: Arc<dyn Cache<M>>) -> Self {
        Self { app_id, backend }
    }

    fn key(&self, commit: &CommitHash) -> String {
        format!("{}/{}", self.app_id, commit)
    }

    pub fn get(&self, commit: &CommitHash) -> Option<M> {
        match self.backend.get(&self.key(commit)) {
            Ok(m) => Some(m),
            Err(CacheError::NotFound) => None,
            Err(e) => {
                tracing::warn!(app = %self.app_id, commit = %commit, error = %e, "manifest cache read failed");
                None
            }
        }
    }

    pub fn put(&self, commit: &CommitHash, manifests: M) {
        if let Err(e) = self.backend.put(&self.key(commit), manifests) {
            tracing::warn!(app = %self.app_id, commit = %commit, error = %e, "failed to put manifests into cache");
        }
    }

    /// Return cached manifests for `commit`, running `load` and caching its
    /// output on a miss. Load failures are returned and never cached.
    pub async fn load_manifests<F, Fut, E>(&self, commit: &CommitHash, load: F) -> Result<M, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<M, E>>,
    {
        if let Some(m) = self.get(commit) {
            tracing::debug!(app = %self.app_id, commit = %commit, "manifests served from cache");
            return Ok(m);
        }
        let manifests = load().await?;
        self.put(commit, manifests.clone());
        Ok(manifests)
    }
}
