// ABOUTME: Decides a deployment's stage graph before anything runs.
// ABOUTME: One planner per application kind chooses between quick sync and the configured pipeline.

mod kubernetes;
mod lambda;
mod pipeline;

pub use kubernetes::KubernetesPlanner;
pub use lambda::LambdaPlanner;
pub use pipeline::{build_progressive_stages, build_quick_sync_stages, make_initial_stage_metadata};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::Cache;
use crate::config::DeploymentConfig;
use crate::model::{ApplicationKind, Deployment, PipelineStage, SyncStrategy};
use crate::provider::kubernetes::{Manifest, ManifestError};
use crate::provider::lambda::LambdaError;
use crate::types::CommitHash;

pub const ROLLBACK_STAGE_ID: &str = "rollback";

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("failed to load manifests: {0}")]
    Manifest(#[from] ManifestError),

    #[error("failed to load function manifest: {0}")]
    Lambda(#[from] LambdaError),

    #[error("no planner registered for {0} applications")]
    NotRegistered(ApplicationKind),
}

pub struct PlannerInput {
    pub deployment: Arc<Deployment>,
    /// Commit of the last successful deployment of the application, if any.
    pub most_recent_successful_commit: Option<CommitHash>,
    pub config: DeploymentConfig,
    pub app_dir: PathBuf,
    /// Application directory at the most recent successful commit.
    pub running_app_dir: Option<PathBuf>,
    pub app_manifests_cache: Arc<dyn Cache<Vec<Manifest>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannerOutput {
    pub version: String,
    pub stages: Vec<PipelineStage>,
    pub summary: String,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: &PlannerInput) -> Result<PlannerOutput, PlannerError>;
}

#[derive(Default, Clone)]
pub struct PlannerRegistry {
    planners: HashMap<ApplicationKind, Arc<dyn Planner>>,
}

impl PlannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ApplicationKind, planner: Arc<dyn Planner>) {
        self.planners.insert(kind, planner);
    }

    pub fn get(&self, kind: ApplicationKind) -> Result<Arc<dyn Planner>, PlannerError> {
        self.planners
            .get(&kind)
            .cloned()
            .ok_or(PlannerError::NotRegistered(kind))
    }
}

/// Registry with the built-in planner of every application kind.
pub fn default_planners() -> PlannerRegistry {
    let mut r = PlannerRegistry::new();
    r.register(ApplicationKind::Kubernetes, Arc::new(KubernetesPlanner));
    r.register(ApplicationKind::Lambda, Arc::new(LambdaPlanner));
    r
}

/// Outcome of the pipeline choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Strategy {
    QuickSync(String),
    Progressive(String),
}

/// The choice when it follows from configuration and trigger alone.
pub(crate) fn strategy_by_trigger(input: &PlannerInput) -> Option<Strategy> {
    if input.config.pipeline.is_none() {
        return Some(Strategy::QuickSync(
            "Quick sync by applying all manifests (no pipeline was configured)".to_string(),
        ));
    }
    match input.deployment.trigger.sync_strategy {
        SyncStrategy::QuickSync => {
            return Some(Strategy::QuickSync(
                "Quick sync by applying all manifests (forced by trigger)".to_string(),
            ));
        }
        SyncStrategy::Pipeline => {
            return Some(Strategy::Progressive(
                "Sync with the specified pipeline (forced by trigger)".to_string(),
            ));
        }
        SyncStrategy::Auto => {}
    }
    if input.most_recent_successful_commit.is_none() || input.running_app_dir.is_none() {
        return Some(Strategy::QuickSync(
            "Quick sync by applying all manifests because it seems this is the first deployment"
                .to_string(),
        ));
    }
    None
}

/// Build the output for `strategy`. Stage timestamps come from the trigger
/// so planning the same deployment twice gives the same stages.
pub(crate) fn make_output(input: &PlannerInput, strategy: Strategy, version: String) -> PlannerOutput {
    let at = input.deployment.trigger.timestamp;
    let auto_rollback = input.config.input.auto_rollback;
    let (stages, summary) = match (strategy, &input.config.pipeline) {
        (Strategy::Progressive(summary), Some(pipeline)) => (
            build_progressive_stages(&pipeline.stages, auto_rollback, at),
            summary,
        ),
        (Strategy::Progressive(summary), None) | (Strategy::QuickSync(summary), _) => (
            build_quick_sync_stages(input.config.quick_sync_stage(), auto_rollback, at),
            summary,
        ),
    };
    PlannerOutput {
        version,
        stages,
        summary,
    }
}

/// Tag of a container image reference, `latest` when untagged.
pub(crate) fn image_tag(image: &str) -> &str {
    let last = image.rsplit('/').next().unwrap_or(image);
    let last = last.split('@').next().unwrap_or(last);
    match last.split_once(':') {
        Some((_, tag)) => tag,
        None => "latest",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tags() {
        assert_eq!(image_tag("nginx:1.25"), "1.25");
        assert_eq!(image_tag("registry.local:5000/team/web:v2"), "v2");
        assert_eq!(image_tag("registry.local:5000/team/web"), "latest");
    }
}
