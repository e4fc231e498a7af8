// ABOUTME: Kubernetes rollback: re-apply the running commit and remove variant resources.
// ABOUTME: Runs as the hidden rollback stage after a failed or cancelled pipeline.

use async_trait::async_trait;

use super::{PRIMARY_VARIANT, StageRun, Variant};
use crate::executor::{Executor, Input, StopSignal, determine_stage_status};
use crate::model::StageStatus;

pub struct RollbackExecutor {
    pub(super) input: Input,
}

#[async_trait]
impl Executor for RollbackExecutor {
    async fn execute(&mut self, sig: StopSignal) -> StageStatus {
        let original = self.input.stage.status;
        let lp = self.input.log_persister.clone();
        let Some(running) = self.input.running_dsp.clone() else {
            lp.error(
                "Unable to determine the last deployed commit to rollback. It seems this is the first deployment.",
            );
            return StageStatus::Failure;
        };
        let Some(run) = StageRun::prepare(&self.input, &sig, &running).await else {
            return StageStatus::Failure;
        };
        let status = run.rollback().await;
        determine_stage_status(sig.signal(), original, status)
    }
}

impl StageRun<'_> {
    async fn rollback(&self) -> StageStatus {
        let lp = self.lp();
        lp.info("Start rolling back the deployment");
        let Some(running) = self.input.running_dsp.as_deref() else {
            return StageStatus::Failure;
        };

        let mut manifests = match self.load_running_manifests().await {
            Ok(m) => m,
            Err(e) => {
                lp.error(&format!("Failed while loading running manifests ({e})"));
                return StageStatus::Failure;
            }
        };
        if let Err(e) = self.label_primary_workloads(&mut manifests, false) {
            lp.error(&format!("Unable to add the primary variant label ({e})"));
            return StageStatus::Failure;
        }
        self.annotate(&mut manifests, PRIMARY_VARIANT, running.revision());
        if self.apply_manifests(&manifests).await.is_err() {
            return StageStatus::Failure;
        }

        let mut keys = Vec::new();
        for variant in [Variant::Canary, Variant::Baseline] {
            match self.recorded_resources(variant) {
                Ok(k) => keys.extend(k),
                Err(e) => {
                    lp.error(&format!(
                        "Unable to read the {} resources from deployment metadata ({e})",
                        variant.label()
                    ));
                    return StageStatus::Failure;
                }
            }
        }
        if keys.is_empty() {
            return StageStatus::Success;
        }
        match self.delete_resources(&keys).await {
            Ok(()) => StageStatus::Success,
            Err(e) => {
                lp.error(&format!("Failed to remove variant resources ({e})"));
                StageStatus::Failure
            }
        }
    }
}
