// ABOUTME: Planner for serverless function applications.
// ABOUTME: A new function image goes through the pipeline; otherwise the function is quick synced.

use async_trait::async_trait;

use super::{
    Planner, PlannerError, PlannerInput, PlannerOutput, Strategy, make_output,
    strategy_by_trigger,
};
use crate::provider::lambda::load_function_manifest;

pub struct LambdaPlanner;

#[async_trait]
impl Planner for LambdaPlanner {
    async fn plan(&self, input: &PlannerInput) -> Result<PlannerOutput, PlannerError> {
        let file = &input.config.input.function_manifest_file;
        let target = load_function_manifest(&input.app_dir, file).await?;
        let version = target.image_tag().unwrap_or("unknown").to_string();

        if let Some(strategy) = strategy_by_trigger(input) {
            return Ok(make_output(input, strategy, version));
        }

        let strategy = match &input.running_app_dir {
            Some(dir) => {
                let running = load_function_manifest(dir, file).await?;
                if running.spec.image_uri == target.spec.image_uri {
                    Strategy::QuickSync(format!(
                        "Quick sync function {} because its image was not changed",
                        target.spec.name
                    ))
                } else {
                    Strategy::Progressive(format!(
                        "Sync progressively because of updating image from {} to {}",
                        running.spec.image_uri, target.spec.image_uri
                    ))
                }
            }
            None => Strategy::QuickSync(
                "Quick sync because it seems this is the first deployment".to_string(),
            ),
        };
        Ok(make_output(input, strategy, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::provider::kubernetes::Manifest;
    use crate::config::DeploymentConfig;
    use crate::model::tests_support::sample_deployment;
    use crate::model::{ApplicationKind, StageKind};
    use crate::types::CommitHash;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn function_dir(image: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("function.yaml"),
            format!(
                "apiVersion: conveyor.dev/v1\nkind: LambdaFunction\nspec:\n  name: resizer\n  image: {image}\n"
            ),
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn new_image_uses_pipeline() {
        let target = function_dir("repo/resizer:v3");
        let running = function_dir("repo/resizer:v2");
        let input = PlannerInput {
            deployment: Arc::new(sample_deployment(ApplicationKind::Lambda)),
            most_recent_successful_commit: Some(CommitHash::new("fedcba9876").unwrap()),
            config: DeploymentConfig::from_yaml(
                "kind: Lambda\npipeline:\n  stages:\n    - name: LAMBDA_CANARY_ROLLOUT\n    - name: LAMBDA_PROMOTE\n      with:\n        percent: 100\n",
            )
            .unwrap(),
            app_dir: target.path().to_path_buf(),
            running_app_dir: Some(running.path().to_path_buf()),
            app_manifests_cache: Arc::new(MemoryCache::<Vec<Manifest>>::new()),
        };
        let out = LambdaPlanner.plan(&input).await.unwrap();
        assert_eq!(out.version, "v3");
        assert_eq!(out.stages[0].name, StageKind::LambdaCanaryRollout);
        assert_eq!(out.stages[1].name, StageKind::LambdaPromote);
        assert!(out.summary.contains("from repo/resizer:v2 to repo/resizer:v3"));
    }
}
