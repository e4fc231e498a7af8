// ABOUTME: K8S_SYNC and K8S_PRIMARY_ROLLOUT: apply the target commit as the primary variant.
// ABOUTME: Resources defined at the running commit but gone from the target are pruned.

use std::collections::HashSet;

use super::variant::{
    add_variant_label_to_pods, ensure_variant_selector_in_workload, find_workload_manifests,
};
use super::{PRIMARY_VARIANT, StageError, StageRun};
use crate::model::StageStatus;
use crate::provider::kubernetes::{Manifest, ResourceKey};

impl StageRun<'_> {
    pub(super) async fn ensure_sync(&self) -> StageStatus {
        self.roll_out_primary(false).await
    }

    pub(super) async fn ensure_primary_rollout(&self) -> StageStatus {
        let with_selector = self
            .input
            .stage_config
            .as_ref()
            .and_then(|c| c.primary_rollout_options())
            .is_some_and(|o| o.add_variant_label_to_selector);
        self.roll_out_primary(with_selector).await
    }

    async fn roll_out_primary(&self, with_selector: bool) -> StageStatus {
        let lp = self.lp();
        let commit = self.input.target_dsp.revision();
        lp.info(&format!(
            "Loading manifests at commit {} for handling",
            commit.short()
        ));
        let mut manifests = match self.load_target_manifests().await {
            Ok(m) => m,
            Err(e) => {
                lp.error(&format!("Failed while loading manifests ({e})"));
                return StageStatus::Failure;
            }
        };
        if manifests.is_empty() {
            lp.error("There are no kubernetes manifests to handle");
            return StageStatus::Failure;
        }
        lp.success(&format!(
            "Successfully loaded {} manifests",
            manifests.len()
        ));

        if let Err(e) = self.label_primary_workloads(&mut manifests, with_selector) {
            lp.error(&format!("Unable to add the primary variant label ({e})"));
            return StageStatus::Failure;
        }
        self.annotate(&mut manifests, PRIMARY_VARIANT, commit);
        if self.apply_manifests(&manifests).await.is_err() {
            return StageStatus::Failure;
        }
        self.prune(&manifests).await
    }

    pub(super) fn label_primary_workloads(
        &self,
        manifests: &mut [Manifest],
        with_selector: bool,
    ) -> Result<(), StageError> {
        let workloads: HashSet<ResourceKey> =
            find_workload_manifests(manifests, &self.source.config.input.workloads)
                .into_iter()
                .map(|m| m.key)
                .collect();
        for m in manifests.iter_mut().filter(|m| workloads.contains(&m.key)) {
            if with_selector {
                ensure_variant_selector_in_workload(m, PRIMARY_VARIANT)?;
            } else {
                add_variant_label_to_pods(m, PRIMARY_VARIANT)?;
            }
        }
        Ok(())
    }

    /// Delete what the running commit defined and `applied` no longer does.
    async fn prune(&self, applied: &[Manifest]) -> StageStatus {
        let lp = self.lp();
        if self.input.running_dsp.is_none() {
            return StageStatus::Success;
        }
        let running = match self.load_running_manifests().await {
            Ok(m) => m,
            Err(e) => {
                lp.error(&format!(
                    "Failed to load running manifests to find removed resources ({e})"
                ));
                return StageStatus::Failure;
            }
        };
        let applied: HashSet<&ResourceKey> = applied.iter().map(|m| &m.key).collect();
        let removed: Vec<ResourceKey> = running
            .into_iter()
            .map(|m| m.key)
            .filter(|k| !applied.contains(k))
            .collect();
        if removed.is_empty() {
            lp.info("There are no resources to prune");
            return StageStatus::Success;
        }

        lp.info(&format!(
            "Pruning {} resources that are no longer defined",
            removed.len()
        ));
        match self.delete_resources(&removed).await {
            Ok(()) => StageStatus::Success,
            Err(e) => {
                lp.error(&format!("Failed to prune resources ({e})"));
                StageStatus::Failure
            }
        }
    }
}
