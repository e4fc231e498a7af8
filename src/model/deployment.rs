// ABOUTME: Deployment aggregate: trigger, stage graph, status, and metadata.
// ABOUTME: Validation enforces unique stage ids and an acyclic requires graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use super::{DeploymentStatus, PipelineStage, StageKind, StageStatus, is_completed_deployment};
use crate::types::{ApplicationId, CommitHash, DeploymentId, StageId};

/// Provider family an application is deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationKind {
    Kubernetes,
    Lambda,
}

impl ApplicationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationKind::Kubernetes => "KUBERNETES",
            ApplicationKind::Lambda => "LAMBDA",
        }
    }
}

impl fmt::Display for ApplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the planner should pick the pipeline for a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    #[default]
    Auto,
    QuickSync,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: CommitHash,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub commit: Commit,
    #[serde(default)]
    pub commander: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sync_strategy: SyncStrategy,
}

/// One deployment attempt of an application at a trigger commit.
///
/// `Clone` is a full deep copy; callers mutate a clone and hand it back to
/// the store rather than sharing a mutable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub application_id: ApplicationId,
    pub application_name: String,
    pub kind: ApplicationKind,
    /// Directory of the application inside the repository.
    pub app_path: String,
    #[serde(default)]
    pub cloud_provider: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub running_commit_hash: Option<CommitHash>,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub status_description: String,
    #[serde(default)]
    pub stages: Vec<PipelineStage>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("duplicate stage id: {0}")]
    DuplicateStage(String),

    #[error("stage {stage} requires unknown stage {required}")]
    UnknownRequirement { stage: String, required: String },

    #[error("stage graph contains a cycle through {0}")]
    Cycle(String),

    #[error("completed deployment must have completed_at set")]
    MissingCompletedAt,
}

impl Deployment {
    /// A pending deployment with no stages, as created at trigger time.
    pub fn new(
        application_id: ApplicationId,
        application_name: impl Into<String>,
        kind: ApplicationKind,
        app_path: impl Into<String>,
        trigger: Trigger,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            application_id,
            application_name: application_name.into(),
            kind,
            app_path: app_path.into(),
            cloud_provider: String::new(),
            trigger,
            summary: String::new(),
            version: String::new(),
            running_commit_hash: None,
            status: DeploymentStatus::Pending,
            status_description: String::new(),
            stages: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.application_id.is_empty() {
            return Err(ValidationError::MissingField("application_id"));
        }
        if is_completed_deployment(self.status) && self.completed_at.is_none() {
            return Err(ValidationError::MissingCompletedAt);
        }
        self.validate_stage_graph()
    }

    fn validate_stage_graph(&self) -> Result<(), ValidationError> {
        let mut ids = HashSet::with_capacity(self.stages.len());
        for stage in &self.stages {
            if stage.id.is_empty() {
                return Err(ValidationError::MissingField("stage id"));
            }
            if !ids.insert(&stage.id) {
                return Err(ValidationError::DuplicateStage(stage.id.to_string()));
            }
        }

        for stage in &self.stages {
            for required in &stage.requires {
                if !ids.contains(required) {
                    return Err(ValidationError::UnknownRequirement {
                        stage: stage.id.to_string(),
                        required: required.to_string(),
                    });
                }
            }
        }

        // Kahn's algorithm: whatever cannot be peeled off sits on a cycle.
        let mut indegree: HashMap<&StageId, usize> = self
            .stages
            .iter()
            .map(|s| (&s.id, s.requires.iter().collect::<HashSet<_>>().len()))
            .collect();
        let mut ready: Vec<&StageId> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        while let Some(id) = ready.pop() {
            visited += 1;
            for stage in self.stages.iter().filter(|s| s.requires.contains(id)) {
                if let Some(n) = indegree.get_mut(&stage.id) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(&stage.id);
                    }
                }
            }
        }
        if visited != self.stages.len() {
            let stuck = indegree
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(id, _)| id.to_string())
                .min()
                .unwrap_or_default();
            return Err(ValidationError::Cycle(stuck));
        }

        Ok(())
    }

    pub fn stage_status_map(&self) -> HashMap<StageId, StageStatus> {
        self.stages
            .iter()
            .map(|s| (s.id.clone(), s.status))
            .collect()
    }

    pub fn stage(&self, id: &StageId) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| &s.id == id)
    }

    pub fn stage_mut(&mut self, id: &StageId) -> Option<&mut PipelineStage> {
        self.stages.iter_mut().find(|s| &s.id == id)
    }

    pub fn commit_hash(&self) -> &CommitHash {
        &self.trigger.commit.hash
    }

    pub fn short_commit_hash(&self) -> &str {
        self.trigger.commit.hash.short()
    }

    pub fn is_completed(&self) -> bool {
        is_completed_deployment(self.status)
    }

    /// Whether this deployment was triggered before `other`, comparing commit
    /// time first and trigger time second.
    pub fn trigger_before(&self, other: &Deployment) -> bool {
        if self.trigger.commit.created_at > other.trigger.commit.created_at {
            return false;
        }
        !(self.trigger.commit.created_at == other.trigger.commit.created_at
            && self.trigger.timestamp > other.trigger.timestamp)
    }

    /// The last rollback stage in the graph, if the planner inserted one.
    pub fn find_rollback_stage(&self) -> Option<&PipelineStage> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.name == StageKind::Rollback)
    }
}
