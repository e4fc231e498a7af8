// ABOUTME: Kubernetes stage executors: sync, variant rollouts and cleanups, traffic routing.
// ABOUTME: Manifests come from the per-commit cache and are applied one resource at a time.

mod apply;
mod rollback;
mod rollout;
mod sync;
mod traffic;
pub mod variant;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::registry::{RegistryError, factory};
use super::{
    DeploySource, DeploySourceError, DeploySourceProvider, Executor, Input, LogPersister,
    Registry, StopSignal, StopSignalType, determine_stage_status,
};
use crate::cache::AppManifestsCache;
use crate::model::{ApplicationKind, StageKind, StageStatus};
use crate::provider::kubernetes::{
    Applier, ApplyError, Manifest, ManifestError, load_manifests,
};
use crate::store::StoreError;

pub use rollback::RollbackExecutor;

pub const VARIANT_LABEL: &str = "conveyor.dev/variant";
pub const PRIMARY_VARIANT: &str = "primary";
pub const CANARY_VARIANT: &str = "canary";
pub const BASELINE_VARIANT: &str = "baseline";

pub const ANNOTATION_MANAGED_BY: &str = "conveyor.dev/managed-by";
pub const ANNOTATION_APPLICATION: &str = "conveyor.dev/application";
pub const ANNOTATION_COMMIT_HASH: &str = "conveyor.dev/commit-hash";
pub const ANNOTATION_RESOURCE_KEY: &str = "conveyor.dev/resource-key";
pub const ANNOTATION_ORIGINAL_API_VERSION: &str = "conveyor.dev/original-api-version";
pub const MANAGED_BY_CONVEYOR: &str = "conveyor";

/// Deployment metadata keys listing the resources a variant rollout created,
/// comma separated.
pub const CANARY_RESOURCES_KEY: &str = "canary-resources";
pub const BASELINE_RESOURCES_KEY: &str = "baseline-resources";

#[derive(Debug, Error)]
pub(crate) enum StageError {
    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    DeploySource(#[from] DeploySourceError),

    #[error("failed to save metadata: {0}")]
    Store(#[from] StoreError),

    #[error("unable to determine running commit")]
    NoRunningCommit,

    #[error("no workload manifests found")]
    NoWorkloads,

    #[error("no service manifest found")]
    NoService,

    #[error("unable to delete {0} resources")]
    Incomplete(usize),

    #[error("interrupted by {0:?} signal")]
    Stopped(StopSignalType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Variant {
    Canary,
    Baseline,
}

impl Variant {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Variant::Canary => CANARY_VARIANT,
            Variant::Baseline => BASELINE_VARIANT,
        }
    }

    pub(crate) fn resources_key(self) -> &'static str {
        match self {
            Variant::Canary => CANARY_RESOURCES_KEY,
            Variant::Baseline => BASELINE_RESOURCES_KEY,
        }
    }
}

pub fn register(r: &mut Registry) -> Result<(), RegistryError> {
    for stage in [
        StageKind::K8sSync,
        StageKind::K8sPrimaryRollout,
        StageKind::K8sCanaryRollout,
        StageKind::K8sCanaryClean,
        StageKind::K8sBaselineRollout,
        StageKind::K8sBaselineClean,
        StageKind::K8sTrafficRouting,
    ] {
        r.register(stage, factory(|input| DeployExecutor { input }))?;
    }
    r.register_rollback(
        ApplicationKind::Kubernetes,
        factory(|input| RollbackExecutor { input }),
    )
}

pub struct DeployExecutor {
    input: Input,
}

#[async_trait]
impl Executor for DeployExecutor {
    async fn execute(&mut self, sig: StopSignal) -> StageStatus {
        let original = self.input.stage.status;
        let Some(run) = StageRun::prepare(&self.input, &sig, &self.input.target_dsp).await else {
            return StageStatus::Failure;
        };
        tracing::info!(
            deployment = %self.input.deployment.id,
            stage = %self.input.stage.id,
            kind = %self.input.stage.name,
            app_dir = %run.source.app_dir.display(),
            "start executing kubernetes stage"
        );

        let status = match self.input.stage.name {
            StageKind::K8sSync => run.ensure_sync().await,
            StageKind::K8sPrimaryRollout => run.ensure_primary_rollout().await,
            StageKind::K8sCanaryRollout => run.ensure_variant_rollout(Variant::Canary).await,
            StageKind::K8sCanaryClean => run.ensure_variant_clean(Variant::Canary).await,
            StageKind::K8sBaselineRollout => run.ensure_variant_rollout(Variant::Baseline).await,
            StageKind::K8sBaselineClean => run.ensure_variant_clean(Variant::Baseline).await,
            StageKind::K8sTrafficRouting => run.ensure_traffic_routing().await,
            other => {
                run.lp()
                    .error(&format!("Unsupported stage {other} for kubernetes application"));
                return StageStatus::Failure;
            }
        };
        determine_stage_status(sig.signal(), original, status)
    }
}

/// Everything one Kubernetes stage routine works with.
pub(crate) struct StageRun<'a> {
    input: &'a Input,
    sig: &'a StopSignal,
    source: Arc<DeploySource>,
    applier: Arc<dyn Applier>,
    cache: AppManifestsCache<Vec<Manifest>>,
}

impl<'a> StageRun<'a> {
    /// Prepare `dsp` and the cluster client, logging why when either fails.
    async fn prepare(
        input: &'a Input,
        sig: &'a StopSignal,
        dsp: &DeploySourceProvider,
    ) -> Option<StageRun<'a>> {
        let lp = input.log_persister.as_ref();
        let source = match dsp.get(lp).await {
            Ok(source) => source,
            Err(e) => {
                lp.error(&format!(
                    "Failed to prepare {} deploy source data ({e})",
                    dsp.revision_name()
                ));
                return None;
            }
        };
        let applier = match input.clients.applier() {
            Ok(applier) => applier,
            Err(e) => {
                lp.error(&format!("Unable to create kubernetes client ({e})"));
                return None;
            }
        };
        let cache = AppManifestsCache::new(
            input.deployment.application_id.clone(),
            Arc::clone(&input.app_manifests_cache),
        );
        Some(StageRun {
            input,
            sig,
            source,
            applier,
            cache,
        })
    }

    fn lp(&self) -> &dyn LogPersister {
        self.input.log_persister.as_ref()
    }

    fn namespace(&self) -> Option<&str> {
        self.source.config.input.namespace.as_deref()
    }

    fn stage_name(&self) -> StageKind {
        self.input.stage.name
    }

    /// Fail fast once a stop signal arrived.
    fn checkpoint(&self) -> Result<(), StageError> {
        match self.sig.signal() {
            StopSignalType::None => Ok(()),
            s => Err(StageError::Stopped(s)),
        }
    }

    async fn load_manifests_at(&self, dsp: &DeploySourceProvider) -> Result<Vec<Manifest>, StageError> {
        let mut manifests = self
            .cache
            .load_manifests(dsp.revision(), || async {
                let ds = dsp.get(self.lp()).await?;
                Ok::<_, StageError>(load_manifests(&ds.app_dir).await?)
            })
            .await?;
        if let Some(ns) = self.namespace() {
            manifests.iter_mut().for_each(|m| m.set_namespace(ns));
        }
        Ok(manifests)
    }

    async fn load_target_manifests(&self) -> Result<Vec<Manifest>, StageError> {
        self.load_manifests_at(&self.input.target_dsp).await
    }

    async fn load_running_manifests(&self) -> Result<Vec<Manifest>, StageError> {
        let dsp = self
            .input
            .running_dsp
            .as_deref()
            .ok_or(StageError::NoRunningCommit)?;
        self.load_manifests_at(dsp).await
    }
}
