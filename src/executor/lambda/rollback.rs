// ABOUTME: Lambda rollback: restore the traffic split saved before the deployment.
// ABOUTME: Nothing is restored when no split was recorded.

use async_trait::async_trait;

use super::{FunctionRun, original_traffic_key};
use crate::executor::{Executor, Input, StopSignal, determine_stage_status};
use crate::model::StageStatus;
use crate::provider::lambda::RoutingTrafficConfig;

pub struct RollbackExecutor {
    pub(super) input: Input,
}

#[async_trait]
impl Executor for RollbackExecutor {
    async fn execute(&mut self, sig: StopSignal) -> StageStatus {
        let original = self.input.stage.status;
        let lp = self.input.log_persister.as_ref();
        let Some(running) = self.input.running_dsp.clone() else {
            lp.error(
                "Unable to determine the last deployed commit to rollback. It seems this is the first deployment.",
            );
            return StageStatus::Failure;
        };
        let source = match running.get(lp).await {
            Ok(s) => s,
            Err(e) => {
                lp.error(&format!("Failed to prepare running deploy source data ({e})"));
                return StageStatus::Failure;
            }
        };
        let Some(run) = FunctionRun::prepare(&self.input, &sig, &source).await else {
            return StageStatus::Failure;
        };
        let status = run.restore_traffic().await;
        determine_stage_status(sig.signal(), original, status)
    }
}

impl FunctionRun<'_> {
    async fn restore_traffic(&self) -> StageStatus {
        let lp = self.lp();
        let key = original_traffic_key(
            self.name(),
            self.input.deployment.running_commit_hash.as_ref(),
        );
        let Some(encoded) = self.input.metadata_store.get(&key) else {
            lp.info(&format!(
                "No original traffic config of Lambda function {} was saved, nothing to roll back",
                self.name()
            ));
            return StageStatus::Success;
        };
        let cfg = match RoutingTrafficConfig::decode(&encoded) {
            Ok(cfg) => cfg,
            Err(e) => {
                lp.error(&format!("Unable to decode the original traffic config ({e})"));
                return StageStatus::Failure;
            }
        };
        if let Err(e) = self.client.update_traffic_config(&self.fm, &cfg).await {
            lp.error(&format!(
                "Failed to restore traffic routing for Lambda function {}: {e}",
                self.name()
            ));
            return StageStatus::Failure;
        }
        lp.success(&format!(
            "Successfully rolled back Lambda function {} to version {}",
            self.name(),
            cfg.primary.version
        ));
        StageStatus::Success
    }
}
