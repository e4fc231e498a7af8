// ABOUTME: Serverless function stages: sync, canary rollout, and traffic promotion.
// ABOUTME: Versions are published with bounded retries; traffic splits are kept for rollback.

mod rollback;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::registry::{RegistryError, factory};
use super::{
    DeploySource, Executor, Input, LogPersister, Registry, StopSignal, determine_stage_status,
};
use crate::backoff::{Backoff, Retry};
use crate::model::{ApplicationKind, StageKind, StageStatus};
use crate::provider::lambda::{
    FunctionManifest, LambdaClient, LambdaError, RoutingTrafficConfig, configure_traffic_routing,
    load_function_manifest,
};
use crate::types::CommitHash;

pub use rollback::RollbackExecutor;

/// Metadata key holding the version published by the rollout stage.
pub fn rollout_version_key(function: &str) -> String {
    format!("{function}-rollout")
}

/// Metadata key holding the traffic split that served before this deployment.
pub fn original_traffic_key(function: &str, running: Option<&CommitHash>) -> String {
    let running = running.map(CommitHash::as_str).unwrap_or_default();
    format!("{function}-{running}-original")
}

pub fn register(r: &mut Registry) -> Result<(), RegistryError> {
    for stage in [
        StageKind::LambdaSync,
        StageKind::LambdaCanaryRollout,
        StageKind::LambdaPromote,
    ] {
        r.register(stage, factory(|input| DeployExecutor { input }))?;
    }
    r.register_rollback(
        ApplicationKind::Lambda,
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
        let lp = self.input.log_persister.as_ref();
        let source = match self.input.target_dsp.get(lp).await {
            Ok(s) => s,
            Err(e) => {
                lp.error(&format!("Failed to prepare target deploy source data ({e})"));
                return StageStatus::Failure;
            }
        };
        let Some(run) = FunctionRun::prepare(&self.input, &sig, &source).await else {
            return StageStatus::Failure;
        };

        let status = match self.input.stage.name {
            StageKind::LambdaSync => run.sync().await,
            StageKind::LambdaCanaryRollout => run.rollout().await,
            StageKind::LambdaPromote => run.promote().await,
            other => {
                lp.error(&format!("Unsupported stage {other} for lambda application"));
                return StageStatus::Failure;
            }
        };
        determine_stage_status(sig.signal(), original, status)
    }
}

/// One stage's view of the function being deployed.
pub(crate) struct FunctionRun<'a> {
    input: &'a Input,
    sig: &'a StopSignal,
    client: Arc<dyn LambdaClient>,
    fm: FunctionManifest,
}

impl<'a> FunctionRun<'a> {
    async fn prepare(
        input: &'a Input,
        sig: &'a StopSignal,
        source: &DeploySource,
    ) -> Option<FunctionRun<'a>> {
        let lp = input.log_persister.as_ref();
        let name = if input.deployment.cloud_provider.is_empty() {
            source.config.input.cloud_provider.clone()
        } else {
            Some(input.deployment.cloud_provider.clone())
        };
        let Some(name) = name else {
            lp.error("Missing the cloud provider name in the application configuration");
            return None;
        };
        let client = match input.clients.lambda(&name) {
            Ok(c) => c,
            Err(e) => {
                lp.error(&format!("Unable to create Lambda client ({e})"));
                return None;
            }
        };

        lp.info(&format!(
            "Loading function manifest at commit {}",
            source.revision.short()
        ));
        let file = &source.config.input.function_manifest_file;
        let fm = match load_function_manifest(&source.app_dir, file).await {
            Ok(fm) => fm,
            Err(e) => {
                lp.error(&format!("Failed to load lambda function manifest ({e})"));
                return None;
            }
        };
        lp.info(&format!(
            "Successfully loaded the lambda function manifest at commit {}",
            source.revision.short()
        ));
        Some(FunctionRun {
            input,
            sig,
            client,
            fm,
        })
    }

    fn lp(&self) -> &dyn LogPersister {
        self.input.log_persister.as_ref()
    }

    fn name(&self) -> &str {
        &self.fm.spec.name
    }

    /// Create or update the function, then publish a new version.
    async fn build(&self) -> Option<String> {
        let lp = self.lp();
        let exists = match self.client.is_function_exist(self.name()).await {
            Ok(found) => found,
            Err(e) => {
                lp.error(&format!("Unable to validate function name {}: {e}", self.name()));
                return None;
            }
        };
        let applied = if exists {
            self.client.update_function(&self.fm).await.inspect_err(|e| {
                lp.error(&format!("Failed to update lambda function {}: {e}", self.name()));
            })
        } else {
            self.client.create_function(&self.fm).await.inspect_err(|e| {
                lp.error(&format!("Failed to create lambda function {}: {e}", self.name()));
            })
        };
        applied.ok()?;

        lp.info("Waiting to update lambda function in progress...");
        let (attempts, interval) = self.input.clients.lambda_publish_retry();
        let mut retry = Retry::new(attempts, Backoff::Constant(interval));
        let started = Instant::now();
        let mut last_error = None;
        while retry
            .wait_next(async {
                self.sig.stopped().await;
            })
            .await
        {
            match self.client.publish_function(&self.fm).await {
                Ok(version) => {
                    lp.info(&format!(
                        "Successfully committed new version (v{version}) for Lambda function {} after duration {:?}",
                        self.name(),
                        started.elapsed()
                    ));
                    return Some(version);
                }
                Err(e) => {
                    tracing::warn!(function = %self.name(), attempt = retry.calls(), error = %e, "failed to publish new lambda version");
                    last_error = Some(e);
                }
            }
        }
        let reason = last_error.map_or_else(|| "stopped".to_string(), |e| e.to_string());
        lp.error(&format!(
            "Failed to commit new version for Lambda function {}: {reason}",
            self.name()
        ));
        None
    }

    async fn save_original_traffic(&self, cfg: &RoutingTrafficConfig) -> bool {
        let lp = self.lp();
        let encoded = match cfg.encode() {
            Ok(s) => s,
            Err(e) => {
                lp.error(&format!(
                    "Unable to store current traffic config for rollback: encode failed ({e})"
                ));
                return false;
            }
        };
        let key = original_traffic_key(
            self.name(),
            self.input.deployment.running_commit_hash.as_ref(),
        );
        if let Err(e) = self.input.metadata_store.set(&key, &encoded).await {
            lp.error(&format!(
                "Unable to store current traffic config for rollback: {e}"
            ));
            return false;
        }
        true
    }

    async fn sync(&self) -> StageStatus {
        let lp = self.lp();
        lp.info("Start applying the lambda function manifest");
        let Some(version) = self.build().await else {
            lp.error(&format!(
                "Failed to build new version for Lambda function {}",
                self.name()
            ));
            return StageStatus::Failure;
        };
        if self.sig.is_stopped() {
            return StageStatus::Failure;
        }

        let mut cfg = match self.client.get_traffic_config(&self.fm).await {
            Ok(cfg) => cfg,
            Err(LambdaError::NotFound) => {
                return self.create_traffic(&version).await;
            }
            Err(e) => {
                lp.error(&format!(
                    "Failed to prepare traffic routing for Lambda function {}: {e}",
                    self.name()
                ));
                return StageStatus::Failure;
            }
        };
        if !self.save_original_traffic(&cfg).await {
            return StageStatus::Failure;
        }

        configure_traffic_routing(&mut cfg, &version, 100);
        if let Err(e) = self.client.update_traffic_config(&self.fm, &cfg).await {
            lp.error(&format!(
                "Failed to update traffic routing for Lambda function {} (version: {version}): {e}",
                self.name()
            ));
            return StageStatus::Failure;
        }
        lp.success(&format!(
            "Successfully applied the manifest for Lambda function {} version (v{version})",
            self.name()
        ));
        StageStatus::Success
    }

    async fn create_traffic(&self, version: &str) -> StageStatus {
        let lp = self.lp();
        if let Err(e) = self.client.create_traffic_config(&self.fm, version).await {
            lp.error(&format!(
                "Failed to create traffic routing for Lambda function {} (version: {version}): {e}",
                self.name()
            ));
            return StageStatus::Failure;
        }
        lp.success(&format!(
            "Successfully routed all traffic to the lambda function {} (version {version})",
            self.name()
        ));
        StageStatus::Success
    }

    async fn rollout(&self) -> StageStatus {
        let lp = self.lp();
        lp.info(&format!(
            "Start rolling out the lambda function: {}",
            self.name()
        ));
        let Some(version) = self.build().await else {
            lp.error(&format!(
                "Failed to build new version for Lambda function {}",
                self.name()
            ));
            return StageStatus::Failure;
        };

        let key = rollout_version_key(self.name());
        if let Err(e) = self.input.metadata_store.set(&key, &version).await {
            lp.error(&format!(
                "Failed to update latest version name to metadata store for Lambda function {}: {e}",
                self.name()
            ));
            return StageStatus::Failure;
        }

        if let Ok(cfg) = self.client.get_traffic_config(&self.fm).await {
            if !self.save_original_traffic(&cfg).await {
                return StageStatus::Failure;
            }
        }
        StageStatus::Success
    }

    async fn promote(&self) -> StageStatus {
        let lp = self.lp();
        lp.info(&format!(
            "Start promoting new version of the lambda function: {}",
            self.name()
        ));
        let Some(version) = self.input.metadata_store.get(&rollout_version_key(self.name())) else {
            lp.error(&format!(
                "Unable to prepare version to promote for Lambda function {}: Not found",
                self.name()
            ));
            return StageStatus::Failure;
        };
        let Some(percent) = self
            .input
            .stage_config
            .as_ref()
            .and_then(|c| c.promote_options())
            .map(|o| o.percent)
        else {
            lp.error(&format!(
                "Malformed configuration for stage {}",
                self.input.stage.name
            ));
            return StageStatus::Failure;
        };

        let mut cfg = match self.client.get_traffic_config(&self.fm).await {
            Ok(cfg) => cfg,
            Err(LambdaError::NotFound) => {
                if percent != 100 {
                    lp.error("No previous version available to handle traffic, new version has to get 100 percent of traffic");
                    return StageStatus::Failure;
                }
                return self.create_traffic(&version).await;
            }
            Err(e) => {
                lp.error(&format!(
                    "Failed to prepare traffic routing for Lambda function {}: {e}",
                    self.name()
                ));
                return StageStatus::Failure;
            }
        };

        configure_traffic_routing(&mut cfg, &version, percent);
        if let Err(e) = self.client.update_traffic_config(&self.fm, &cfg).await {
            lp.error(&format!(
                "Failed to update traffic routing for Lambda function {} (version: {version}): {e}",
                self.name()
            ));
            return StageStatus::Failure;
        }
        lp.success(&format!(
            "Successfully promoted new version (v{version}) of Lambda function {}, it will handle {percent} percent of traffic",
            self.name()
        ));
        StageStatus::Success
    }
}
