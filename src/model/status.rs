// ABOUTME: Deployment and stage status enums with forward-only transition rules.
// ABOUTME: Declaration order is the rank used by the transition checks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall status of a deployment.
///
/// Variants are declared in rank order; a deployment may only move to an
/// equal or later rank, and the three terminal statuses are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    Planned,
    Running,
    RollingBack,
    Success,
    Failure,
    Cancelled,
}

/// Status of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    NotStartedYet,
    Running,
    Success,
    Failure,
    Cancelled,
}

const NOT_COMPLETED_DEPLOYMENT_STATUSES: [DeploymentStatus; 4] = [
    DeploymentStatus::Pending,
    DeploymentStatus::Planned,
    DeploymentStatus::Running,
    DeploymentStatus::RollingBack,
];

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Planned => "PLANNED",
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::RollingBack => "ROLLING_BACK",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failure => "FAILURE",
            DeploymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::NotStartedYet => "NOT_STARTED_YET",
            StageStatus::Running => "RUNNING",
            StageStatus::Success => "SUCCESS",
            StageStatus::Failure => "FAILURE",
            StageStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the deployment reached SUCCESS, FAILURE, or CANCELLED.
pub fn is_completed_deployment(status: DeploymentStatus) -> bool {
    matches!(
        status,
        DeploymentStatus::Success | DeploymentStatus::Failure | DeploymentStatus::Cancelled
    )
}

/// Whether the stage reached SUCCESS, FAILURE, or CANCELLED.
pub fn is_completed_stage(status: StageStatus) -> bool {
    matches!(
        status,
        StageStatus::Success | StageStatus::Failure | StageStatus::Cancelled
    )
}

pub fn not_completed_deployment_statuses() -> &'static [DeploymentStatus] {
    &NOT_COMPLETED_DEPLOYMENT_STATUSES
}

/// Whether a deployment currently at `cur` may move to `next`.
///
/// Non-terminal targets accept any status up to and including themselves.
/// Terminal targets accept any non-terminal status, so a completed
/// deployment can never change again.
pub fn can_update_deployment_status(cur: DeploymentStatus, next: DeploymentStatus) -> bool {
    if is_completed_deployment(next) {
        return cur <= DeploymentStatus::RollingBack;
    }
    cur <= next
}

/// Whether a stage currently at `cur` may move to `next`.
pub fn can_update_stage_status(cur: StageStatus, next: StageStatus) -> bool {
    if is_completed_stage(next) {
        return cur <= StageStatus::Running;
    }
    cur <= next
}
