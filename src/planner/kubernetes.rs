// ABOUTME: Planner for Kubernetes applications.
// ABOUTME: Workload changes go through the pipeline; anything else is quick synced.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use super::{
    Planner, PlannerError, PlannerInput, PlannerOutput, Strategy, image_tag, make_output,
    strategy_by_trigger,
};
use crate::cache::AppManifestsCache;
use crate::executor::kubernetes::variant::find_workload_manifests;
use crate::provider::kubernetes::{Manifest, ManifestError, load_manifests};
use crate::types::CommitHash;

pub struct KubernetesPlanner;

fn container_images(m: &Manifest) -> Vec<String> {
    m.nested(&["spec", "template", "spec", "containers"])
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("image").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// The deployment version: the image tag of the first workload container.
fn determine_version(workloads: &[Manifest]) -> String {
    workloads
        .iter()
        .flat_map(container_images)
        .next()
        .map(|image| image_tag(&image).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Why the workloads differ, or `None` when they are identical.
fn describe_workload_change(running: &[Manifest], target: &[Manifest]) -> Option<String> {
    for t in target {
        let Some(r) = running.iter().find(|r| r.key == t.key) else {
            return Some(format!(
                "Sync progressively because workload {} was added",
                t.key.name
            ));
        };
        if r.body() == t.body() {
            continue;
        }
        let (old, new) = (container_images(r), container_images(t));
        if let Some((before, after)) = old.iter().zip(&new).find(|(a, b)| a != b) {
            return Some(format!(
                "Sync progressively because of updating image {} from {before} to {after}",
                t.key.name
            ));
        }
        return Some(format!(
            "Sync progressively because pod template of workload {} was changed",
            t.key.name
        ));
    }
    if running.len() != target.len() {
        return Some("Sync progressively because a workload was removed".to_string());
    }
    None
}

impl KubernetesPlanner {
    async fn load(
        input: &PlannerInput,
        commit: &CommitHash,
        dir: &Path,
    ) -> Result<Vec<Manifest>, ManifestError> {
        let cache = AppManifestsCache::new(
            input.deployment.application_id.clone(),
            input.app_manifests_cache.clone(),
        );
        cache
            .load_manifests(commit, || load_manifests(dir))
            .await
    }
}

#[async_trait]
impl Planner for KubernetesPlanner {
    async fn plan(&self, input: &PlannerInput) -> Result<PlannerOutput, PlannerError> {
        let refs = &input.config.input.workloads;
        let target = Self::load(input, input.deployment.commit_hash(), &input.app_dir).await?;
        let target_workloads = find_workload_manifests(&target, refs);
        let version = determine_version(&target_workloads);

        if let Some(strategy) = strategy_by_trigger(input) {
            return Ok(make_output(input, strategy, version));
        }

        let strategy = match (
            &input.most_recent_successful_commit,
            &input.running_app_dir,
        ) {
            (Some(commit), Some(dir)) => {
                let running = Self::load(input, commit, dir).await?;
                let running_workloads = find_workload_manifests(&running, refs);
                match describe_workload_change(&running_workloads, &target_workloads) {
                    Some(summary) => Strategy::Progressive(summary),
                    None => Strategy::QuickSync(
                        "Quick sync by applying all manifests because the workloads were not changed"
                            .to_string(),
                    ),
                }
            }
            _ => Strategy::QuickSync(
                "Quick sync by applying all manifests because it seems this is the first deployment"
                    .to_string(),
            ),
        };
        Ok(make_output(input, strategy, version))
    }
}
