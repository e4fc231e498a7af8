// ABOUTME: Per-stage, append-only log that operators read for each stage attempt.
// ABOUTME: Lines are buffered in order and flushed to a log store when the stage ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::filestore::FileStoreError;
use crate::types::{DeploymentId, StageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogSeverity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBlock {
    pub index: u64,
    pub log: String,
    pub severity: LogSeverity,
    pub created_at: DateTime<Utc>,
}

/// Sink for stage-visible log lines.
pub trait LogPersister: Send + Sync {
    fn append(&self, log: &str, severity: LogSeverity);

    fn info(&self, log: &str) {
        self.append(log, LogSeverity::Info);
    }

    fn success(&self, log: &str) {
        self.append(log, LogSeverity::Success);
    }

    fn error(&self, log: &str) {
        self.append(log, LogSeverity::Error);
    }

    /// Append an informational line verbatim, without tracing it.
    fn append_info(&self, log: &str);
}

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("log store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    FileStore(#[from] FileStoreError),

    #[error("failed to encode log blocks: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable destination of completed stage logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn report_stage_logs(
        &self,
        deployment: &DeploymentId,
        stage: &StageId,
        retried_count: u32,
        blocks: &[LogBlock],
    ) -> Result<(), LogStoreError>;
}

/// Log persister bound to one attempt of one stage.
pub struct StageLogPersister {
    deployment: DeploymentId,
    stage: StageId,
    retried_count: u32,
    blocks: Mutex<Vec<LogBlock>>,
    store: Arc<dyn LogStore>,
}

impl StageLogPersister {
    pub fn new(
        deployment: DeploymentId,
        stage: StageId,
        retried_count: u32,
        store: Arc<dyn LogStore>,
    ) -> Self {
        Self {
            deployment,
            stage,
            retried_count,
            blocks: Mutex::new(Vec::new()),
            store,
        }
    }

    fn push(&self, log: &str, severity: LogSeverity) {
        let mut blocks = self.blocks.lock();
        let index = blocks.len() as u64;
        blocks.push(LogBlock {
            index,
            log: log.to_string(),
            severity,
            created_at: Utc::now(),
        });
    }

    pub fn blocks(&self) -> Vec<LogBlock> {
        self.blocks.lock().clone()
    }

    /// Flush every buffered block to the log store.
    pub async fn complete(&self) -> Result<(), LogStoreError> {
        let blocks = self.blocks();
        self.store
            .report_stage_logs(&self.deployment, &self.stage, self.retried_count, &blocks)
            .await
    }
}

impl LogPersister for StageLogPersister {
    fn append(&self, log: &str, severity: LogSeverity) {
        tracing::debug!(
            deployment = %self.deployment,
            stage = %self.stage,
            severity = ?severity,
            "{log}"
        );
        self.push(log, severity);
    }

    fn append_info(&self, log: &str) {
        self.push(log, LogSeverity::Info);
    }
}

type StageKey = (DeploymentId, StageId, u32);

/// Log store kept in memory; used by the CLI and in tests.
#[derive(Default)]
pub struct MemoryLogStore {
    logs: Mutex<HashMap<StageKey, Vec<LogBlock>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_logs(
        &self,
        deployment: &DeploymentId,
        stage: &StageId,
        retried_count: u32,
    ) -> Vec<LogBlock> {
        self.logs
            .lock()
            .get(&(deployment.clone(), stage.clone(), retried_count))
            .cloned()
            .unwrap_or_default()
    }

    /// Every stored line of a stage across attempts, oldest attempt first.
    pub fn stage_lines(&self, deployment: &DeploymentId, stage: &StageId) -> Vec<String> {
        let logs = self.logs.lock();
        let mut attempts: Vec<_> = logs
            .iter()
            .filter(|((d, s, _), _)| d == deployment && s == stage)
            .collect();
        attempts.sort_by_key(|((_, _, n), _)| *n);
        attempts
            .into_iter()
            .flat_map(|(_, blocks)| blocks.iter().map(|b| b.log.clone()))
            .collect()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn report_stage_logs(
        &self,
        deployment: &DeploymentId,
        stage: &StageId,
        retried_count: u32,
        blocks: &[LogBlock],
    ) -> Result<(), LogStoreError> {
        self.logs.lock().insert(
            (deployment.clone(), stage.clone(), retried_count),
            blocks.to_vec(),
        );
        Ok(())
    }
}
