// ABOUTME: Operator commands waiting to be picked up by running stages.
// ABOUTME: Approvals are queued per stage and consumed by the approval executor.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::{DeploymentId, StageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalCommand {
    pub deployment_id: DeploymentId,
    pub stage_id: StageId,
    pub commander: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    approvals: Mutex<Vec<ApprovalCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self, deployment_id: DeploymentId, stage_id: StageId, commander: impl Into<String>) {
        let cmd = ApprovalCommand {
            deployment_id,
            stage_id,
            commander: commander.into(),
            created_at: Utc::now(),
        };
        tracing::info!(
            deployment = %cmd.deployment_id,
            stage = %cmd.stage_id,
            commander = %cmd.commander,
            "approval received"
        );
        self.approvals.lock().push(cmd);
    }

    /// Remove and return the approvals addressed to one stage, oldest first.
    pub fn take_approvals(&self, deployment: &DeploymentId, stage: &StageId) -> Vec<ApprovalCommand> {
        let mut approvals = self.approvals.lock();
        let (mine, rest): (Vec<_>, Vec<_>) = approvals
            .drain(..)
            .partition(|c| &c.deployment_id == deployment && &c.stage_id == stage);
        *approvals = rest;
        mine
    }

    pub fn len(&self) -> usize {
        self.approvals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvals.lock().is_empty()
    }
}
