// ABOUTME: Pipeline stage record and the closed set of stage kinds.
// ABOUTME: Stage kinds are provider-specific and drive executor dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::StageStatus;
use crate::types::StageId;

/// Every stage kind the agent knows how to plan and execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    #[serde(rename = "K8S_SYNC")]
    K8sSync,
    #[serde(rename = "K8S_PRIMARY_ROLLOUT")]
    K8sPrimaryRollout,
    #[serde(rename = "K8S_CANARY_ROLLOUT")]
    K8sCanaryRollout,
    #[serde(rename = "K8S_CANARY_CLEAN")]
    K8sCanaryClean,
    #[serde(rename = "K8S_BASELINE_ROLLOUT")]
    K8sBaselineRollout,
    #[serde(rename = "K8S_BASELINE_CLEAN")]
    K8sBaselineClean,
    #[serde(rename = "K8S_TRAFFIC_ROUTING")]
    K8sTrafficRouting,
    LambdaSync,
    LambdaCanaryRollout,
    LambdaPromote,
    Wait,
    WaitApproval,
    Rollback,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::K8sSync => "K8S_SYNC",
            StageKind::K8sPrimaryRollout => "K8S_PRIMARY_ROLLOUT",
            StageKind::K8sCanaryRollout => "K8S_CANARY_ROLLOUT",
            StageKind::K8sCanaryClean => "K8S_CANARY_CLEAN",
            StageKind::K8sBaselineRollout => "K8S_BASELINE_ROLLOUT",
            StageKind::K8sBaselineClean => "K8S_BASELINE_CLEAN",
            StageKind::K8sTrafficRouting => "K8S_TRAFFIC_ROUTING",
            StageKind::LambdaSync => "LAMBDA_SYNC",
            StageKind::LambdaCanaryRollout => "LAMBDA_CANARY_ROLLOUT",
            StageKind::LambdaPromote => "LAMBDA_PROMOTE",
            StageKind::Wait => "WAIT",
            StageKind::WaitApproval => "WAIT_APPROVAL",
            StageKind::Rollback => "ROLLBACK",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a deployment's stage graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: StageId,
    pub name: StageKind,
    #[serde(default)]
    pub desc: String,
    /// Position of the stage in the configured pipeline.
    pub index: u32,
    /// True for stages synthesized by the planner rather than configured.
    #[serde(default)]
    pub predefined: bool,
    /// Sibling stages that must succeed before this one starts.
    #[serde(default)]
    pub requires: Vec<StageId>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    pub status: StageStatus,
    #[serde(default)]
    pub status_description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub retried_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_visible() -> bool {
    true
}

impl PipelineStage {
    /// A fresh, not-yet-started stage.
    pub fn new(id: impl Into<StageId>, name: StageKind, index: u32, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name,
            desc: String::new(),
            index,
            predefined: false,
            requires: Vec::new(),
            visible: true,
            status: StageStatus::NotStartedYet,
            status_description: String::new(),
            metadata: BTreeMap::new(),
            retried_count: 0,
            created_at: at,
            updated_at: at,
            completed_at: None,
        }
    }

    pub fn requires(mut self, requires: impl IntoIterator<Item = StageId>) -> Self {
        self.requires = requires.into_iter().collect();
        self
    }

    pub fn is_rollback(&self) -> bool {
        self.name == StageKind::Rollback
    }
}
