// ABOUTME: Applies and deletes Kubernetes resources through a cluster client.
// ABOUTME: The default client shells out to kubectl with manifests piped on stdin.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Manifest, ManifestError, ResourceKey};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("resource not found")]
    NotFound,

    #[error("{command} failed: {output}")]
    Command { command: String, output: String },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] ManifestError),
}

impl ApplyError {
    /// Whether trying the same call again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplyError::Command { .. } | ApplyError::Timeout { .. })
    }
}

#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, manifest: &Manifest) -> Result<(), ApplyError>;

    /// Delete one resource. Returns [`ApplyError::NotFound`] when it is
    /// already gone.
    async fn delete(&self, key: &ResourceKey) -> Result<(), ApplyError>;
}

/// Default bound on one kubectl call.
pub const DEFAULT_KUBECTL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Cluster client backed by the kubectl binary.
pub struct Kubectl {
    path: PathBuf,
    timeout: Duration,
}

impl Kubectl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_KUBECTL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run `call`, killing kubectl when it outlives the timeout.
    async fn bounded<T>(
        &self,
        command: &str,
        call: impl std::future::Future<Output = Result<T, ApplyError>>,
    ) -> Result<T, ApplyError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(ApplyError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                })
            })
    }

    fn combined(output: &std::process::Output) -> String {
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        text.trim().to_string()
    }
}

#[async_trait]
impl Applier for Kubectl {
    async fn apply(&self, manifest: &Manifest) -> Result<(), ApplyError> {
        let yaml = manifest.to_yaml()?;
        let mut child = self
            .command()
            .args(["apply", "-f", "-"])
            .stdin(Stdio::piped())
            .spawn()?;
        let output = self
            .bounded("kubectl apply", async move {
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(yaml.as_bytes()).await?;
                }
                Ok(child.wait_with_output().await?)
            })
            .await?;
        if !output.status.success() {
            return Err(ApplyError::Command {
                command: "kubectl apply".to_string(),
                output: Self::combined(&output),
            });
        }
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), ApplyError> {
        let mut cmd = self.command();
        cmd.args(["delete", &key.kind, &key.name]);
        if !key.namespace.is_empty() {
            cmd.args(["-n", &key.namespace]);
        }
        cmd.stdin(Stdio::null());
        let output = self
            .bounded("kubectl delete", async { Ok(cmd.output().await?) })
            .await?;
        let text = Self::combined(&output);
        if text.contains("(NotFound)") {
            return Err(ApplyError::NotFound);
        }
        if !output.status.success() {
            return Err(ApplyError::Command {
                command: "kubectl delete".to_string(),
                output: text,
            });
        }
        Ok(())
    }
}
