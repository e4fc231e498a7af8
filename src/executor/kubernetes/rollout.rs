// ABOUTME: Canary and baseline rollouts plus their cleanup stages.
// ABOUTME: Created resource keys are recorded in deployment metadata for the clean stage.

use super::variant::{
    duplicate_manifests, find_config_map_manifests, find_manifests, find_secret_manifests,
    find_workload_manifests, generate_variant_service_manifests,
    generate_variant_workload_manifests,
};
use super::{StageError, StageRun, Variant};
use crate::config::Replicas;
use crate::model::StageStatus;
use crate::provider::kubernetes::{KIND_SERVICE, Manifest, ResourceKey};

struct RolloutOptions {
    replicas: Replicas,
    suffix: String,
    create_service: bool,
}

impl StageRun<'_> {
    fn rollout_options(&self, variant: Variant) -> Option<RolloutOptions> {
        let config = self.input.stage_config.as_ref()?;
        match variant {
            Variant::Canary => config.canary_rollout_options().map(|o| RolloutOptions {
                replicas: o.replicas,
                suffix: o.suffix.clone(),
                create_service: o.create_service,
            }),
            Variant::Baseline => config.baseline_rollout_options().map(|o| RolloutOptions {
                replicas: o.replicas,
                suffix: o.suffix.clone(),
                create_service: o.create_service,
            }),
        }
    }

    pub(super) async fn ensure_variant_rollout(&self, variant: Variant) -> StageStatus {
        let lp = self.lp();
        let Some(opts) = self.rollout_options(variant) else {
            lp.error(&format!("Malformed configuration for stage {}", self.stage_name()));
            return StageStatus::Failure;
        };

        // Baseline mirrors what runs today so it is compared like for like.
        let (loaded, commit) = match variant {
            Variant::Canary => (
                self.load_target_manifests().await,
                self.input.target_dsp.revision(),
            ),
            Variant::Baseline => match self.input.running_dsp.as_deref() {
                Some(dsp) => (self.load_running_manifests().await, dsp.revision()),
                None => {
                    lp.error(&format!(
                        "Unable to determine the running commit for the {} variant",
                        variant.label()
                    ));
                    return StageStatus::Failure;
                }
            },
        };
        let manifests = match loaded {
            Ok(m) => m,
            Err(e) => {
                lp.error(&format!("Failed while loading manifests ({e})"));
                return StageStatus::Failure;
            }
        };

        let mut generated = match self.generate_variant_manifests(variant, &manifests, &opts) {
            Ok(m) => m,
            Err(e) => {
                lp.error(&format!(
                    "Unable to generate manifests for {} variant ({e})",
                    variant.label()
                ));
                return StageStatus::Failure;
            }
        };
        self.annotate(&mut generated, variant.label(), commit);

        // Recorded before applying so a clean stage also finds partial rollouts.
        let keys: Vec<String> = generated.iter().map(|m| m.key.to_string()).collect();
        if let Err(e) = self
            .input
            .metadata_store
            .set(variant.resources_key(), &keys.join(","))
            .await
        {
            lp.error(&format!(
                "Unable to save the {} resources to deployment metadata ({e})",
                variant.label()
            ));
            return StageStatus::Failure;
        }

        match self.apply_manifests(&generated).await {
            Ok(()) => StageStatus::Success,
            Err(_) => StageStatus::Failure,
        }
    }

    fn generate_variant_manifests(
        &self,
        variant: Variant,
        manifests: &[Manifest],
        opts: &RolloutOptions,
    ) -> Result<Vec<Manifest>, StageError> {
        let input = &self.source.config.input;
        let workloads = find_workload_manifests(manifests, &input.workloads);
        if workloads.is_empty() {
            return Err(StageError::NoWorkloads);
        }
        let config_maps = find_config_map_manifests(manifests);
        let secrets = find_secret_manifests(manifests);

        let mut out = duplicate_manifests(&config_maps, &opts.suffix);
        out.extend(duplicate_manifests(&secrets, &opts.suffix));
        out.extend(generate_variant_workload_manifests(
            &workloads,
            &config_maps,
            &secrets,
            variant.label(),
            &opts.suffix,
            |current| opts.replicas.calculate(current),
        )?);

        if opts.create_service {
            let services = find_manifests(KIND_SERVICE, input.service.as_deref(), manifests);
            let service = services.first().ok_or(StageError::NoService)?;
            out.extend(generate_variant_service_manifests(
                std::slice::from_ref(service),
                variant.label(),
                &opts.suffix,
            )?);
        }
        Ok(out)
    }

    /// Resource keys a previous rollout of `variant` recorded.
    pub(super) fn recorded_resources(&self, variant: Variant) -> Result<Vec<ResourceKey>, StageError> {
        let Some(raw) = self.input.metadata_store.get(variant.resources_key()) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<ResourceKey>().map_err(StageError::from))
            .collect()
    }

    pub(super) async fn ensure_variant_clean(&self, variant: Variant) -> StageStatus {
        let lp = self.lp();
        let keys = match self.recorded_resources(variant) {
            Ok(keys) => keys,
            Err(e) => {
                lp.error(&format!(
                    "Unable to read the {} resources from deployment metadata ({e})",
                    variant.label()
                ));
                return StageStatus::Failure;
            }
        };
        match self.delete_resources(&keys).await {
            Ok(()) => StageStatus::Success,
            Err(e) => {
                lp.error(&format!(
                    "Unable to remove {} resources ({e})",
                    variant.label()
                ));
                StageStatus::Failure
            }
        }
    }
}
