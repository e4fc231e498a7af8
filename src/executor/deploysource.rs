// ABOUTME: Lazily prepared, commit-pinned view of an application's directory.
// ABOUTME: The checkout and config parse happen once per deployment and are shared.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::LogPersister;
use crate::config::DeploymentConfig;
use crate::repo::{Repo, RepoError};
use crate::types::CommitHash;

#[derive(Debug, Error)]
pub enum DeploySourceError {
    #[error("failed to check out commit: {0}")]
    Checkout(#[from] RepoError),

    #[error("application directory not found: {0}")]
    AppDirMissing(PathBuf),

    #[error("failed to load deployment configuration: {0}")]
    Config(String),
}

#[derive(Debug)]
pub struct DeploySource {
    pub repo_dir: PathBuf,
    pub app_dir: PathBuf,
    pub revision: CommitHash,
    pub config: DeploymentConfig,
}

/// Prepares the deploy source for one commit on first use.
pub struct DeploySourceProvider {
    repo: Arc<dyn Repo>,
    revision_name: String,
    revision: CommitHash,
    app_path: String,
    source: OnceCell<Arc<DeploySource>>,
}

impl DeploySourceProvider {
    /// `revision_name` labels the checkout, e.g. "target" or "running".
    pub fn new(
        repo: Arc<dyn Repo>,
        revision_name: impl Into<String>,
        revision: CommitHash,
        app_path: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            revision_name: revision_name.into(),
            revision,
            app_path: app_path.into(),
            source: OnceCell::new(),
        }
    }

    pub fn revision(&self) -> &CommitHash {
        &self.revision
    }

    pub fn revision_name(&self) -> &str {
        &self.revision_name
    }

    /// Return the prepared source, checking it out on the first call.
    /// Failures are not remembered, so a later call tries again.
    pub async fn get(&self, lp: &dyn LogPersister) -> Result<Arc<DeploySource>, DeploySourceError> {
        self.source
            .get_or_try_init(|| async {
                lp.info(&format!(
                    "Preparing deploy source at {} commit ({})",
                    self.revision_name,
                    self.revision.short()
                ));
                let source = self.prepare().await.inspect_err(|e| {
                    lp.error(&format!("Failed to prepare deploy source ({e})"));
                })?;
                lp.success(&format!(
                    "Successfully prepared deploy source at {} commit ({})",
                    self.revision_name,
                    self.revision.short()
                ));
                Ok::<_, DeploySourceError>(Arc::new(source))
            })
            .await
            .cloned()
    }

    async fn prepare(&self) -> Result<DeploySource, DeploySourceError> {
        let repo_dir = self
            .repo
            .checkout(&self.revision, &self.revision_name)
            .await?;
        let app_dir = repo_dir.join(&self.app_path);
        if !app_dir.is_dir() {
            return Err(DeploySourceError::AppDirMissing(app_dir));
        }
        let config = DeploymentConfig::discover(&app_dir)
            .map_err(|e| DeploySourceError::Config(e.to_string()))?;
        Ok(DeploySource {
            repo_dir,
            app_dir,
            revision: self.revision.clone(),
            config,
        })
    }
}
