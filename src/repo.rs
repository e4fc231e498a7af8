// ABOUTME: Source repository access: check out an application's repo at a commit.
// ABOUTME: Git checkouts are detached worktrees so concurrent commits never collide.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use crate::types::CommitHash;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("repository directory not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Repo: Send + Sync {
    /// Return a directory holding the repository at `commit`. `name`
    /// distinguishes checkouts made for different purposes.
    async fn checkout(&self, commit: &CommitHash, name: &str) -> Result<PathBuf, RepoError>;
}

/// A git repository on local disk.
pub struct GitRepo {
    dir: PathBuf,
    workspace: PathBuf,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            workspace: workspace.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, RepoError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(RepoError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Resolve a revision such as `HEAD` to a full commit hash.
    pub async fn resolve(&self, revision: &str) -> Result<String, RepoError> {
        self.git(&["rev-parse", revision]).await
    }
}

#[async_trait]
impl Repo for GitRepo {
    async fn checkout(&self, commit: &CommitHash, name: &str) -> Result<PathBuf, RepoError> {
        if !self.dir.is_dir() {
            return Err(RepoError::NotFound(self.dir.clone()));
        }
        let dest = self.workspace.join(format!("{name}-{}", commit.short()));
        if dest.join(".git").exists() {
            tracing::debug!(path = %dest.display(), "reusing existing checkout");
            return Ok(dest);
        }
        tokio::fs::create_dir_all(&self.workspace).await?;
        let dest_str = dest.to_string_lossy().to_string();
        self.git(&["worktree", "add", "--detach", &dest_str, commit.as_str()])
            .await?;
        tracing::info!(commit = %commit.short(), path = %dest.display(), "checked out commit");
        Ok(dest)
    }
}

/// A plain directory served for every commit. Used when deploying a
/// working tree that is not under version control.
pub struct StaticRepo {
    dir: PathBuf,
}

impl StaticRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Repo for StaticRepo {
    async fn checkout(&self, _commit: &CommitHash, _name: &str) -> Result<PathBuf, RepoError> {
        if !self.dir.is_dir() {
            return Err(RepoError::NotFound(self.dir.clone()));
        }
        Ok(self.dir.clone())
    }
}
