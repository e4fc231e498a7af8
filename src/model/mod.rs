// ABOUTME: Deployment domain model: deployments, pipeline stages, and statuses.
// ABOUTME: Encodes the forward-only status ordering and graph validation rules.

mod deployment;
mod stage;
mod status;

pub use deployment::{
    ApplicationKind, Commit, Deployment, SyncStrategy, Trigger, ValidationError,
};
pub use stage::{PipelineStage, StageKind};
pub use status::{
    DeploymentStatus, StageStatus, can_update_deployment_status, can_update_stage_status,
    is_completed_deployment, is_completed_stage, not_completed_deployment_statuses,
};

#[cfg(test)]
pub(crate) mod tests_support {
    use super::{ApplicationKind, Deployment};
    use crate::types::ApplicationId;

    pub(crate) use super::deployment::tests::sample_trigger;

    /// A pending deployment of `app-1` at the sample trigger commit.
    pub(crate) fn sample_deployment(kind: ApplicationKind) -> Deployment {
        Deployment::new(
            ApplicationId::new("app-1"),
            "app",
            kind,
            "apps/app",
            sample_trigger(),
        )
    }
}
