// ABOUTME: Pure deployment mutations applied inside a store transaction.
// ABOUTME: Each constructor captures its arguments and returns a boxed updater.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use super::StoreError;
use crate::model::{Deployment, DeploymentStatus, PipelineStage, StageStatus, is_completed_deployment};
use crate::types::{CommitHash, StageId};

/// A mutation applied to a private copy of a deployment. Returning an error
/// aborts the update and leaves the stored record untouched.
pub type Updater = Box<dyn FnOnce(&mut Deployment) -> Result<(), StoreError> + Send>;

/// Record the planner's output and move the deployment to PLANNED.
pub fn to_planned(
    summary: impl Into<String>,
    status_description: impl Into<String>,
    running_commit: Option<CommitHash>,
    version: impl Into<String>,
    stages: Vec<PipelineStage>,
) -> Updater {
    let summary = summary.into();
    let status_description = status_description.into();
    let version = version.into();
    Box::new(move |d| {
        d.status = DeploymentStatus::Planned;
        d.summary = summary;
        d.status_description = status_description;
        d.running_commit_hash = running_commit;
        d.version = version;
        d.stages = stages;
        Ok(())
    })
}

pub fn status(status: DeploymentStatus, description: impl Into<String>) -> Updater {
    let description = description.into();
    Box::new(move |d| {
        d.status = status;
        d.status_description = description;
        Ok(())
    })
}

/// Finish the deployment, forcing the given stage statuses at the same time.
pub fn to_completed(
    status: DeploymentStatus,
    stage_statuses: HashMap<StageId, StageStatus>,
    description: impl Into<String>,
    completed_at: DateTime<Utc>,
) -> Updater {
    let description = description.into();
    Box::new(move |d| {
        if !is_completed_deployment(status) {
            return Err(StoreError::InvalidArgument(format!(
                "deployment status {status} is not a completed status"
            )));
        }
        d.status = status;
        d.status_description = description;
        d.completed_at = Some(completed_at);
        for stage in &mut d.stages {
            if let Some(s) = stage_statuses.get(&stage.id) {
                stage.status = *s;
            }
        }
        Ok(())
    })
}

/// Update one stage's status. An empty `requires` keeps the existing links.
pub fn stage_status_changed(
    stage_id: StageId,
    status: StageStatus,
    description: impl Into<String>,
    requires: Vec<StageId>,
    retried_count: u32,
    completed_at: Option<DateTime<Utc>>,
) -> Updater {
    let description = description.into();
    Box::new(move |d| {
        let stage = d
            .stage_mut(&stage_id)
            .ok_or_else(|| StoreError::UnknownStage(stage_id.to_string()))?;
        stage.status = status;
        stage.status_description = description;
        if !requires.is_empty() {
            stage.requires = requires;
        }
        stage.retried_count = retried_count;
        stage.completed_at = completed_at;
        stage.updated_at = Utc::now();
        Ok(())
    })
}

pub(crate) fn merge_metadata(metadata: BTreeMap<String, String>) -> Updater {
    Box::new(move |d| {
        d.metadata.extend(metadata);
        Ok(())
    })
}

pub(crate) fn merge_stage_metadata(stage_id: StageId, metadata: BTreeMap<String, String>) -> Updater {
    Box::new(move |d| {
        let stage = d
            .stage_mut(&stage_id)
            .ok_or_else(|| StoreError::InvalidArgument(format!("stage {stage_id} is not found")))?;
        stage.metadata.extend(metadata);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApplicationKind, StageKind};
    use crate::model::tests_support::sample_deployment;

    #[test]
    fn to_completed_rejects_running_status() {
        let mut d = sample_deployment(ApplicationKind::Kubernetes);
        let err = to_completed(DeploymentStatus::Running, HashMap::new(), "", Utc::now())(&mut d)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn to_completed_forces_listed_stages() {
        let mut d = sample_deployment(ApplicationKind::Kubernetes);
        d.stages = vec![
            PipelineStage::new("a", StageKind::Wait, 0, Utc::now()),
            PipelineStage::new("b", StageKind::Wait, 1, Utc::now()),
        ];
        let statuses = HashMap::from([(StageId::new("a"), StageStatus::Cancelled)]);
        to_completed(DeploymentStatus::Cancelled, statuses, "cancelled", Utc::now())(&mut d).unwrap();
        assert_eq!(d.stages[0].status, StageStatus::Cancelled);
        assert_eq!(d.stages[1].status, StageStatus::NotStartedYet);
        assert!(d.completed_at.is_some());
    }

    #[test]
    fn stage_status_changed_rejects_unknown_stage() {
        let mut d = sample_deployment(ApplicationKind::Kubernetes);
        let err = stage_status_changed(
            StageId::new("nope"),
            StageStatus::Running,
            "",
            vec![],
            0,
            None,
        )(&mut d)
        .unwrap_err();
        assert!(matches!(err, StoreError::UnknownStage(_)));
    }

    #[test]
    fn empty_requires_keeps_links() {
        let mut d = sample_deployment(ApplicationKind::Kubernetes);
        d.stages = vec![
            PipelineStage::new("a", StageKind::Wait, 0, Utc::now()),
            PipelineStage::new("b", StageKind::Wait, 1, Utc::now()).requires([StageId::new("a")]),
        ];
        stage_status_changed(StageId::new("b"), StageStatus::Running, "", vec![], 2, None)(&mut d)
            .unwrap();
        assert_eq!(d.stages[1].requires, vec![StageId::new("a")]);
        assert_eq!(d.stages[1].retried_count, 2);
    }
}
