// ABOUTME: WAIT_APPROVAL stage: blocks until a permitted user approves it.
// ABOUTME: Approval commands are polled from the controller's command queue.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::registry::{RegistryError, factory};
use super::{Executor, Input, Registry, StopSignal, StopSignalType, determine_stage_status};
use crate::config::WaitApprovalStageOptions;
use crate::model::{StageKind, StageStatus};

pub const APPROVER_METADATA_KEY: &str = "Approver";

pub struct WaitApprovalExecutor {
    input: Input,
}

pub fn register(r: &mut Registry) -> Result<(), RegistryError> {
    r.register(
        StageKind::WaitApproval,
        factory(|input| WaitApprovalExecutor { input }),
    )
}

impl WaitApprovalExecutor {
    fn is_allowed(opts: &WaitApprovalStageOptions, commander: &str) -> bool {
        opts.approvers.is_empty() || opts.approvers.iter().any(|a| a == commander)
    }
}

#[async_trait]
impl Executor for WaitApprovalExecutor {
    async fn execute(&mut self, sig: StopSignal) -> StageStatus {
        let original = self.input.stage.status;
        let opts = self
            .input
            .stage_config
            .as_ref()
            .and_then(|c| c.wait_approval_options())
            .cloned()
            .unwrap_or_default();
        let lp = self.input.log_persister.clone();
        let deployment = &self.input.deployment.id;
        let stage = &self.input.stage.id;

        if opts.approvers.is_empty() {
            lp.info("Waiting for an approval from any user...");
        } else {
            lp.info(&format!(
                "Waiting for an approval from one of: {}",
                opts.approvers.join(", ")
            ));
        }

        loop {
            for cmd in self.input.commands.take_approvals(deployment, stage) {
                if !Self::is_allowed(&opts, &cmd.commander) {
                    lp.info(&format!(
                        "User {} is not allowed to approve this stage",
                        cmd.commander
                    ));
                    continue;
                }
                let metadata =
                    BTreeMap::from([(APPROVER_METADATA_KEY.to_string(), cmd.commander.clone())]);
                if let Err(e) = self.input.metadata_store.stage_set(stage, metadata).await {
                    lp.error(&format!("Unable to save approver information to deployment ({e})"));
                    return StageStatus::Failure;
                }
                lp.success(&format!("Got an approval from {}", cmd.commander));
                return determine_stage_status(sig.signal(), original, StageStatus::Success);
            }

            tokio::select! {
                _ = tokio::time::sleep(opts.effective_poll_interval()) => {}
                s = sig.stopped() => {
                    return match s {
                        StopSignalType::Cancel => StageStatus::Cancelled,
                        StopSignalType::Terminate => original,
                        StopSignalType::None => StageStatus::Failure,
                    };
                }
            }
        }
    }
}
