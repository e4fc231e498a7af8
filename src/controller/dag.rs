// ABOUTME: Readiness rules over a deployment's stage graph.
// ABOUTME: A stage may start once every stage it requires has succeeded.

use std::collections::HashSet;

use crate::model::{Deployment, PipelineStage, StageStatus};
use crate::types::StageId;

/// Stages that can be launched now. A stage left RUNNING by an earlier
/// process counts as ready so it is resumed. Rollback stages never are.
pub fn ready_stages<'a>(d: &'a Deployment, launched: &HashSet<StageId>) -> Vec<&'a PipelineStage> {
    d.stages
        .iter()
        .filter(|s| !s.is_rollback())
        .filter(|s| !launched.contains(&s.id))
        .filter(|s| matches!(s.status, StageStatus::NotStartedYet | StageStatus::Running))
        .filter(|s| {
            s.requires.iter().all(|r| {
                d.stage(r)
                    .is_some_and(|req| req.status == StageStatus::Success)
            })
        })
        .collect()
}

/// Whether every forward stage finished successfully.
pub fn all_succeeded(d: &Deployment) -> bool {
    d.stages
        .iter()
        .filter(|s| !s.is_rollback())
        .all(|s| s.status == StageStatus::Success)
}
