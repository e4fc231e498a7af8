// ABOUTME: Runs one deployment's stage graph from PLANNED to a terminal status.
// ABOUTME: Independent branches run as concurrent tasks; every status change goes through the store.

use chrono::Utc;
use snafu::ResultExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::dag::{all_succeeded, ready_stages};
use super::error::{ControllerError, PersistSnafu};
use super::CommandQueue;
use crate::backoff::{Backoff, Retry};
use crate::cache::Cache;
use crate::diagnostics::{Diagnostics, Warning};
use crate::executor::{
    DeploySourceProvider, Input, LogPersister, LogStore, MetadataStore, ProviderClients, Registry,
    StageLogPersister, StopSignal, StopSignalType, new_stop_signal,
};
use crate::model::{Deployment, DeploymentStatus, PipelineStage, StageStatus};
use crate::provider::kubernetes::Manifest;
use crate::repo::Repo;
use crate::store::{DeploymentStore, StoreError, Updater, updater};
use crate::types::{DeploymentId, StageId};

/// Collaborators shared by every deployment run of one controller.
#[derive(Clone)]
pub struct ControllerContext {
    pub store: Arc<dyn DeploymentStore>,
    pub registry: Arc<Registry>,
    pub repo: Arc<dyn Repo>,
    pub log_store: Arc<dyn LogStore>,
    pub app_manifests_cache: Arc<dyn Cache<Vec<Manifest>>>,
    pub clients: Arc<ProviderClients>,
    pub commands: Arc<CommandQueue>,
    /// Attempts made for each store update before the run gives up.
    pub persist_retries: u32,
    pub persist_backoff: Duration,
}

/// What a deployment run ended with.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Last durable state of the deployment.
    pub deployment: Deployment,
    /// The run stopped on TERMINATE and left the deployment resumable.
    pub terminated: bool,
    pub warnings: Vec<Warning>,
}

impl RunReport {
    pub fn status(&self) -> DeploymentStatus {
        self.deployment.status
    }
}

/// Apply an update, retrying transient store failures with exponential
/// backoff. A terminate signal cuts the waits short.
pub(super) async fn persist_with_retry<F>(
    ctx: &ControllerContext,
    id: &DeploymentId,
    sig: &StopSignal,
    make: F,
) -> Result<Deployment, ControllerError>
where
    F: Fn() -> Updater,
{
    let backoff = Backoff::Exponential {
        base: ctx.persist_backoff,
        max: ctx.persist_backoff.saturating_mul(16),
    };
    let mut retry = Retry::new(ctx.persist_retries.max(1), backoff);
    let mut last = None;
    while retry.wait_next(sig.terminated()).await {
        match ctx.store.update_deployment(id, make()).await {
            Ok(d) => return Ok(d),
            Err(e) if e.is_retryable() => {
                tracing::warn!(deployment = %id, attempt = retry.calls(), error = %e, "failed to persist deployment, retrying");
                last = Some(e);
            }
            Err(e) => return Err(e).context(PersistSnafu { deployment: id.clone() }),
        }
    }
    Err(ControllerError::PersistExhausted {
        deployment: id.clone(),
        attempts: retry.calls(),
        source: last.unwrap_or_else(|| StoreError::Unavailable("persistence was interrupted".into())),
    })
}

struct StageOutcome {
    stage_id: StageId,
    status: StageStatus,
    retried_count: u32,
    warnings: Vec<Warning>,
}

/// Everything a stage task needs, owned so the task can be spawned.
#[derive(Clone)]
struct StageRunner {
    ctx: ControllerContext,
    deployment: Arc<Deployment>,
    target_dsp: Arc<DeploySourceProvider>,
    running_dsp: Option<Arc<DeploySourceProvider>>,
    metadata: MetadataStore,
}

impl StageRunner {
    /// Run a stage, retrying failed attempts up to the configured budget.
    async fn run(self, mut stage: PipelineStage, sig: StopSignal) -> StageOutcome {
        let mut warnings = Vec::new();
        loop {
            let lp = Arc::new(StageLogPersister::new(
                self.deployment.id.clone(),
                stage.id.clone(),
                stage.retried_count,
                self.ctx.log_store.clone(),
            ));
            let (status, retries) = self.attempt(&stage, lp.clone(), sig.clone()).await;
            if let Err(e) = lp.complete().await {
                warnings.push(Warning::log_flush(
                    stage.id.clone(),
                    format!("failed to flush logs of stage {} ({e})", stage.id),
                ));
            }

            if status == StageStatus::Failure && stage.retried_count < retries && !sig.is_stopped() {
                stage.retried_count += 1;
                tracing::info!(
                    deployment = %self.deployment.id,
                    stage = %stage.id,
                    attempt = stage.retried_count,
                    "retrying failed stage"
                );
                continue;
            }
            tracing::info!(
                deployment = %self.deployment.id,
                stage = %stage.id,
                kind = %stage.name,
                status = %status,
                "stage finished"
            );
            return StageOutcome {
                stage_id: stage.id,
                status,
                retried_count: stage.retried_count,
                warnings,
            };
        }
    }

    /// One attempt. Returns the status and the retry budget of the stage.
    async fn attempt(
        &self,
        stage: &PipelineStage,
        lp: Arc<StageLogPersister>,
        sig: StopSignal,
    ) -> (StageStatus, u32) {
        let stage_config = if stage.predefined {
            None
        } else {
            match self.target_dsp.get(lp.as_ref()).await {
                Ok(source) => source.config.stage(stage.index).cloned(),
                Err(_) => return (StageStatus::Failure, 0),
            }
        };
        let retries = stage_config.as_ref().map(|c| c.retries).unwrap_or(0);

        let input = Input {
            deployment: self.deployment.clone(),
            stage: stage.clone(),
            stage_config,
            target_dsp: self.target_dsp.clone(),
            running_dsp: self.running_dsp.clone(),
            log_persister: lp.clone() as Arc<dyn LogPersister>,
            metadata_store: self.metadata.clone(),
            app_manifests_cache: self.ctx.app_manifests_cache.clone(),
            clients: self.ctx.clients.clone(),
            commands: self.ctx.commands.clone(),
        };
        let mut executor = match self.ctx.registry.executor(input) {
            Ok(e) => e,
            Err(e) => {
                lp.error(&format!("Unable to find the executor for stage {} ({e})", stage.name));
                return (StageStatus::Failure, 0);
            }
        };
        (executor.execute(sig).await, retries)
    }
}

/// Drives one deployment. Built per run; a later run resumes from whatever
/// the store holds.
pub struct Scheduler {
    ctx: ControllerContext,
    deployment: Deployment,
    target_dsp: Arc<DeploySourceProvider>,
    running_dsp: Option<Arc<DeploySourceProvider>>,
    metadata: MetadataStore,
    sig: StopSignal,
    diagnostics: Diagnostics,
}

impl Scheduler {
    pub fn new(ctx: ControllerContext, deployment: Deployment, sig: StopSignal) -> Self {
        let target_dsp = Arc::new(DeploySourceProvider::new(
            ctx.repo.clone(),
            "target",
            deployment.commit_hash().clone(),
            deployment.app_path.clone(),
        ));
        let running_dsp = deployment.running_commit_hash.clone().map(|commit| {
            Arc::new(DeploySourceProvider::new(
                ctx.repo.clone(),
                "running",
                commit,
                deployment.app_path.clone(),
            ))
        });
        let metadata = MetadataStore::new(&deployment, ctx.store.clone());
        Self {
            ctx,
            deployment,
            target_dsp,
            running_dsp,
            metadata,
            sig,
            diagnostics: Diagnostics::default(),
        }
    }

    pub async fn run(mut self) -> Result<RunReport, ControllerError> {
        tracing::info!(
            deployment = %self.deployment.id,
            status = %self.deployment.status,
            "start scheduling deployment"
        );
        if self.deployment.is_completed() {
            return Ok(self.into_report(false));
        }
        if self.deployment.status == DeploymentStatus::Planned {
            self.persist(|| updater::status(DeploymentStatus::Running, "The deployment is running"))
                .await?;
        }
        if self.deployment.status == DeploymentStatus::Running {
            self.run_stages().await?;
        }
        if self.sig.signal() == StopSignalType::Terminate {
            tracing::info!(deployment = %self.deployment.id, "terminated, leaving deployment resumable");
            return Ok(self.into_report(true));
        }
        self.finish().await
    }

    async fn persist<F>(&mut self, make: F) -> Result<(), ControllerError>
    where
        F: Fn() -> Updater,
    {
        self.deployment =
            persist_with_retry(&self.ctx, &self.deployment.id, &self.sig, make).await?;
        Ok(())
    }

    async fn persist_stage(
        &mut self,
        stage_id: &StageId,
        status: StageStatus,
        retried_count: u32,
    ) -> Result<(), ControllerError> {
        let completed_at = matches!(
            status,
            StageStatus::Success | StageStatus::Failure | StageStatus::Cancelled
        )
        .then(Utc::now);
        let stage_id = stage_id.clone();
        self.persist(move || {
            updater::stage_status_changed(
                stage_id.clone(),
                status,
                "",
                vec![],
                retried_count,
                completed_at,
            )
        })
        .await
    }

    fn runner(&self) -> StageRunner {
        StageRunner {
            ctx: self.ctx.clone(),
            deployment: Arc::new(self.deployment.clone()),
            target_dsp: self.target_dsp.clone(),
            running_dsp: self.running_dsp.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Launch ready stages until nothing is running and nothing more may
    /// start. A failed or cancelled stage stops new launches; stages already
    /// running are allowed to finish.
    async fn run_stages(&mut self) -> Result<(), ControllerError> {
        let mut launched: HashSet<StageId> = HashSet::new();
        let mut tasks: JoinSet<StageOutcome> = JoinSet::new();
        let mut halted = false;

        loop {
            if !halted && !self.sig.is_stopped() {
                let ready: Vec<PipelineStage> = ready_stages(&self.deployment, &launched)
                    .into_iter()
                    .cloned()
                    .collect();
                for stage in ready {
                    launched.insert(stage.id.clone());
                    self.persist_stage(&stage.id, StageStatus::Running, stage.retried_count)
                        .await?;
                    let stage = self.deployment.stage(&stage.id).cloned().unwrap_or(stage);
                    tracing::info!(
                        deployment = %self.deployment.id,
                        stage = %stage.id,
                        kind = %stage.name,
                        "starting stage"
                    );
                    tasks.spawn(self.runner().run(stage, self.sig.clone()));
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let outcome = joined.map_err(|e| ControllerError::Task {
                deployment: self.deployment.id.clone(),
                message: e.to_string(),
            })?;
            self.diagnostics.extend(outcome.warnings);

            if self.sig.signal() == StopSignalType::Terminate {
                continue;
            }
            self.persist_stage(&outcome.stage_id, outcome.status, outcome.retried_count)
                .await?;
            if matches!(outcome.status, StageStatus::Failure | StageStatus::Cancelled) {
                halted = true;
            }
        }
        Ok(())
    }

    /// Decide the terminal status, roll back when it is not a success, and
    /// complete the deployment.
    async fn finish(mut self) -> Result<RunReport, ControllerError> {
        let cancelled = self.sig.signal() == StopSignalType::Cancel
            || self
                .deployment
                .stages
                .iter()
                .any(|s| !s.is_rollback() && s.status == StageStatus::Cancelled);
        let status = if self.deployment.status == DeploymentStatus::Running
            && all_succeeded(&self.deployment)
        {
            DeploymentStatus::Success
        } else if cancelled {
            DeploymentStatus::Cancelled
        } else {
            DeploymentStatus::Failure
        };

        if status != DeploymentStatus::Success {
            let rollback = self.deployment.stages.iter().find(|s| s.is_rollback()).cloned();
            if let Some(rollback) = rollback {
                if rollback.status == StageStatus::NotStartedYet
                    || rollback.status == StageStatus::Running
                {
                    self.roll_back(rollback).await?;
                    if self.sig.signal() == StopSignalType::Terminate {
                        return Ok(self.into_report(true));
                    }
                }
            }
        }

        let description = match status {
            DeploymentStatus::Success => "The deployment was completed successfully".to_string(),
            DeploymentStatus::Cancelled => "The deployment was cancelled".to_string(),
            _ => {
                let failed = self
                    .deployment
                    .stages
                    .iter()
                    .find(|s| !s.is_rollback() && s.status == StageStatus::Failure)
                    .map(|s| s.id.to_string())
                    .unwrap_or_default();
                if failed.is_empty() {
                    "The deployment failed".to_string()
                } else {
                    format!("The deployment failed at stage {failed}")
                }
            }
        };

        let mut forced = HashMap::new();
        if status == DeploymentStatus::Cancelled {
            for s in &self.deployment.stages {
                if !s.is_rollback()
                    && matches!(s.status, StageStatus::NotStartedYet | StageStatus::Running)
                {
                    forced.insert(s.id.clone(), StageStatus::Cancelled);
                }
            }
        }
        let completed_at = Utc::now();
        self.persist(move || {
            updater::to_completed(status, forced.clone(), description.clone(), completed_at)
        })
        .await?;
        tracing::info!(deployment = %self.deployment.id, status = %status, "deployment completed");
        Ok(self.into_report(false))
    }

    /// Run the rollback stage. It ignores CANCEL and stops only on TERMINATE.
    async fn roll_back(&mut self, stage: PipelineStage) -> Result<(), ControllerError> {
        if self.deployment.status != DeploymentStatus::RollingBack {
            self.persist(|| {
                updater::status(DeploymentStatus::RollingBack, "Rolling back the deployment")
            })
            .await?;
        }
        self.persist_stage(&stage.id, StageStatus::Running, stage.retried_count)
            .await?;
        let stage = self.deployment.stage(&stage.id).cloned().unwrap_or(stage);
        tracing::info!(deployment = %self.deployment.id, stage = %stage.id, "rolling back");

        let (rollback_sig, rollback_handler) = new_stop_signal();
        let parent = self.sig.clone();
        let forward = tokio::spawn(async move {
            parent.terminated().await;
            rollback_handler.terminate();
        });
        let outcome = self.runner().run(stage, rollback_sig).await;
        forward.abort();
        self.diagnostics.extend(outcome.warnings);

        if self.sig.signal() == StopSignalType::Terminate {
            return Ok(());
        }
        self.persist_stage(&outcome.stage_id, outcome.status, outcome.retried_count)
            .await
    }

    fn into_report(self, terminated: bool) -> RunReport {
        RunReport {
            deployment: self.deployment,
            terminated,
            warnings: self.diagnostics.into_warnings(),
        }
    }
}
