// ABOUTME: Agent-level configuration: sync cadence, cache TTL, persistence retries.
// ABOUTME: Every field has a default so an absent or partial file is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::error::Result;

/// Settings for the long-running agent process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Tick of `Controller::run`: how often it looks for deployments to plan
    /// or resume.
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,

    /// How long loaded manifests stay cached. Zero disables expiry.
    #[serde(with = "humantime_serde")]
    pub manifest_cache_ttl: Duration,

    /// Most (application, commit) manifest sets kept in memory.
    pub manifest_cache_capacity: u64,

    /// Attempts made to persist a status change before giving up on a run.
    pub persist_retries: u32,

    #[serde(with = "humantime_serde")]
    pub persist_backoff: Duration,

    pub kubectl_path: PathBuf,

    /// Longest a single kubectl call may run before it is killed.
    #[serde(with = "humantime_serde")]
    pub kubectl_timeout: Duration,

    /// Attempts made to apply one manifest, backing off exponentially.
    pub apply_retries: u32,

    #[serde(with = "humantime_serde")]
    pub apply_backoff: Duration,

    /// Where per-commit checkouts are created.
    pub workspace_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            sync_interval: Duration::from_secs(10),
            manifest_cache_ttl: Duration::from_secs(24 * 60 * 60),
            manifest_cache_capacity: DEFAULT_MAX_ENTRIES,
            persist_retries: 5,
            persist_backoff: Duration::from_millis(200),
            kubectl_path: PathBuf::from("kubectl"),
            kubectl_timeout: Duration::from_secs(5 * 60),
            apply_retries: 3,
            apply_backoff: Duration::from_secs(1),
            workspace_dir: std::env::temp_dir().join("conveyor"),
        }
    }
}

impl AgentConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (!self.manifest_cache_ttl.is_zero()).then_some(self.manifest_cache_ttl)
    }
}
