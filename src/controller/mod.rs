// ABOUTME: Deployment controller: plans pending deployments and schedules planned ones.
// ABOUTME: Each deployment runs in its own task with its own stop signal.

mod command;
mod dag;
mod error;
mod scheduler;

pub use command::{ApprovalCommand, CommandQueue};
pub use dag::{all_succeeded, ready_stages};
pub use error::{ControllerError, ControllerErrorKind};
pub use scheduler::{ControllerContext, RunReport, Scheduler};

use futures::future::join_all;
use parking_lot::Mutex;
use snafu::ResultExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::executor::{
    DeploySourceProvider, LogPersister, StageLogPersister, StopSignal, StopSignalHandler,
    new_stop_signal,
};
use crate::model::{Deployment, DeploymentStatus};
use crate::planner::{PlannerInput, PlannerRegistry};
use crate::store::{Field, FieldValue, ListFilter, ListOptions, Operator, Order, StoreError, updater};
use crate::types::{CommitHash, DeploymentId, StageId};
use error::{AlreadyRunningSnafu, DeploySourceSnafu, ListSnafu, PersistSnafu};
use scheduler::persist_with_retry;

/// Stage id under which planning logs are stored.
pub const PLANNER_LOG_STAGE: &str = "planner";

struct Tracked {
    handler: StopSignalHandler,
    task: Option<JoinHandle<Result<RunReport, ControllerError>>>,
}

/// Untracks a deployment driven in the caller's task, even when that
/// task's future is dropped early.
struct TrackedGuard<'a> {
    tracked: &'a Mutex<HashMap<DeploymentId, Tracked>>,
    id: DeploymentId,
}

impl Drop for TrackedGuard<'_> {
    fn drop(&mut self) {
        self.tracked.lock().remove(&self.id);
    }
}

/// Tracks every deployment this process is driving.
pub struct Controller {
    ctx: ControllerContext,
    planners: Arc<PlannerRegistry>,
    tracked: Mutex<HashMap<DeploymentId, Tracked>>,
}

impl Controller {
    pub fn new(ctx: ControllerContext, planners: PlannerRegistry) -> Self {
        Self {
            ctx,
            planners: Arc::new(planners),
            tracked: Mutex::new(HashMap::new()),
        }
    }

    pub fn commands(&self) -> Arc<CommandQueue> {
        self.ctx.commands.clone()
    }

    /// Pick up every unfinished deployment not already being driven and
    /// start a task for it. Manifest cache housekeeping runs on each call.
    /// Returns how many were started.
    pub async fn sync_once(&self) -> Result<usize, ControllerError> {
        self.reap();
        self.ctx.app_manifests_cache.run_pending_tasks();
        let opts = ListOptions {
            filters: vec![ListFilter::is_in(
                Field::Status,
                [
                    DeploymentStatus::Pending,
                    DeploymentStatus::Planned,
                    DeploymentStatus::Running,
                    DeploymentStatus::RollingBack,
                ]
                .map(FieldValue::from),
            )],
            orders: vec![Order::asc(Field::CreatedAt), Order::asc(Field::Id)],
            ..Default::default()
        };
        let page = self
            .ctx
            .store
            .list_deployments(&opts)
            .await
            .context(ListSnafu)?;

        let mut started = 0;
        let mut tracked = self.tracked.lock();
        for d in page.deployments {
            if tracked.contains_key(&d.id) {
                continue;
            }
            let (sig, handler) = new_stop_signal();
            let ctx = self.ctx.clone();
            let planners = self.planners.clone();
            let id = d.id.clone();
            tracing::info!(deployment = %id, status = %d.status, "picked up deployment");
            let task = tokio::spawn(drive(ctx, planners, d, sig));
            tracked.insert(
                id,
                Tracked {
                    handler,
                    task: Some(task),
                },
            );
            started += 1;
        }
        Ok(started)
    }

    /// Forget finished tasks and log how they ended.
    fn reap(&self) {
        let mut tracked = self.tracked.lock();
        tracked.retain(|id, t| {
            let finished = t.task.as_ref().is_some_and(|h| h.is_finished());
            if finished {
                tracing::debug!(deployment = %id, "deployment task finished");
            }
            !finished
        });
    }

    /// Plan and run one deployment to completion in the calling task.
    /// Fails with `AlreadyRunning` when this controller already drives it.
    pub async fn run_deployment(&self, id: &DeploymentId) -> Result<RunReport, ControllerError> {
        let (sig, handler) = new_stop_signal();
        {
            let mut tracked = self.tracked.lock();
            if tracked.contains_key(id) {
                return AlreadyRunningSnafu { deployment: id.clone() }.fail();
            }
            tracked.insert(id.clone(), Tracked { handler, task: None });
        }
        let _guard = TrackedGuard {
            tracked: &self.tracked,
            id: id.clone(),
        };

        let deployment = self
            .ctx
            .store
            .get_deployment(id)
            .await
            .context(PersistSnafu { deployment: id.clone() })?;
        drive(self.ctx.clone(), self.planners.clone(), deployment, sig).await
    }

    /// Call `sync_once` every `interval` until `shutdown` resolves, then
    /// terminate and join every deployment task.
    pub async fn run(
        &self,
        interval: Duration,
        shutdown: impl Future<Output = ()>,
    ) -> Vec<Result<RunReport, ControllerError>> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match self.sync_once().await {
                    Ok(0) => {}
                    Ok(started) => tracing::info!(started, "started deployment tasks"),
                    Err(e) => tracing::warn!(error = %e, "failed to sync deployments"),
                },
            }
        }
        tracing::info!("controller stopping");
        self.shutdown().await
    }

    /// Operator cancel. Returns false when the deployment is not running here.
    pub fn cancel(&self, id: &DeploymentId) -> bool {
        match self.tracked.lock().get(id) {
            Some(t) => {
                tracing::info!(deployment = %id, "cancelling deployment");
                t.handler.cancel();
                true
            }
            None => false,
        }
    }

    pub fn approve(&self, id: &DeploymentId, stage: &StageId, commander: &str) {
        self.ctx
            .commands
            .approve(id.clone(), stage.clone(), commander);
    }

    pub fn is_tracking(&self, id: &DeploymentId) -> bool {
        self.tracked.lock().contains_key(id)
    }

    /// Send TERMINATE to every deployment and wait for the spawned ones.
    /// Deployments are left at their last durable state.
    pub async fn shutdown(&self) -> Vec<Result<RunReport, ControllerError>> {
        let tasks: Vec<(DeploymentId, JoinHandle<_>)> = {
            let mut tracked = self.tracked.lock();
            tracked
                .iter_mut()
                .filter_map(|(id, t)| {
                    t.handler.terminate();
                    t.task.take().map(|h| (id.clone(), h))
                })
                .collect()
        };
        let (ids, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut tracked = self.tracked.lock();
        ids.into_iter()
            .zip(joined)
            .map(|(id, joined)| {
                tracked.remove(&id);
                let result = joined.unwrap_or_else(|e| {
                    Err(ControllerError::Task {
                        deployment: id.clone(),
                        message: e.to_string(),
                    })
                });
                if let Err(e) = &result {
                    tracing::warn!(deployment = %id, error = %e, "deployment run ended with an error");
                }
                result
            })
            .collect()
    }
}

/// Plan if needed, then schedule until completion or stop.
async fn drive(
    ctx: ControllerContext,
    planners: Arc<PlannerRegistry>,
    deployment: Deployment,
    sig: StopSignal,
) -> Result<RunReport, ControllerError> {
    let deployment = if deployment.status == DeploymentStatus::Pending {
        plan(&ctx, &planners, deployment, &sig).await?
    } else {
        deployment
    };
    if deployment.is_completed() {
        return Ok(RunReport {
            deployment,
            terminated: false,
            warnings: Vec::new(),
        });
    }
    Scheduler::new(ctx, deployment, sig).run().await
}

/// The commit of the latest successful deployment of the same application.
async fn most_recent_successful_commit(
    ctx: &ControllerContext,
    d: &Deployment,
) -> Result<Option<CommitHash>, StoreError> {
    let opts = ListOptions {
        filters: vec![
            ListFilter::new(Field::ApplicationId, Operator::Eq, d.application_id.as_str()),
            ListFilter::new(Field::Status, Operator::Eq, DeploymentStatus::Success),
        ],
        orders: vec![Order::desc(Field::UpdatedAt), Order::desc(Field::Id)],
        limit: 1,
        ..Default::default()
    };
    let page = ctx.store.list_deployments(&opts).await?;
    Ok(page.deployments.first().map(|d| d.commit_hash().clone()))
}

/// Plan a PENDING deployment. A planner failure completes the deployment
/// as FAILURE; an unavailable checkout leaves it PENDING for a later sync.
async fn plan(
    ctx: &ControllerContext,
    planners: &PlannerRegistry,
    d: Deployment,
    sig: &StopSignal,
) -> Result<Deployment, ControllerError> {
    let planner = planners
        .get(d.kind)
        .map_err(|_| ControllerError::NoPlanner { kind: d.kind })?;
    let lp = StageLogPersister::new(
        d.id.clone(),
        StageId::new(PLANNER_LOG_STAGE),
        0,
        ctx.log_store.clone(),
    );

    let running_commit = match d.running_commit_hash.clone() {
        Some(c) => Some(c),
        None => most_recent_successful_commit(ctx, &d)
            .await
            .context(PersistSnafu { deployment: d.id.clone() })?,
    };
    let target = DeploySourceProvider::new(
        ctx.repo.clone(),
        "target",
        d.commit_hash().clone(),
        d.app_path.clone(),
    )
    .get(&lp)
    .await
    .context(DeploySourceSnafu { deployment: d.id.clone() })?;
    let running_app_dir = match &running_commit {
        Some(commit) => {
            let running = DeploySourceProvider::new(
                ctx.repo.clone(),
                "running",
                commit.clone(),
                d.app_path.clone(),
            );
            match running.get(&lp).await {
                Ok(source) => Some(source.app_dir.clone()),
                Err(e) => {
                    tracing::warn!(deployment = %d.id, error = %e, "unable to prepare running deploy source, planning as a first deployment");
                    None
                }
            }
        }
        None => None,
    };

    let input = PlannerInput {
        deployment: Arc::new(d.clone()),
        most_recent_successful_commit: running_commit.clone(),
        config: target.config.clone(),
        app_dir: target.app_dir.clone(),
        running_app_dir,
        app_manifests_cache: ctx.app_manifests_cache.clone(),
    };
    let planned = planner.plan(&input).await.map_err(|e| e.to_string()).and_then(|out| {
        let mut candidate = d.clone();
        candidate.stages = out.stages.clone();
        candidate
            .validate()
            .map(|_| out)
            .map_err(|e| format!("planned stages are invalid: {e}"))
    });

    let result = match planned {
        Ok(out) => {
            lp.success(&format!("Planned {} stage(s): {}", out.stages.len(), out.summary));
            tracing::info!(deployment = %d.id, version = %out.version, summary = %out.summary, "deployment planned");
            persist_with_retry(ctx, &d.id, sig, move || {
                updater::to_planned(
                    out.summary.clone(),
                    "The deployment has been planned",
                    running_commit.clone(),
                    out.version.clone(),
                    out.stages.clone(),
                )
            })
            .await
        }
        Err(message) => {
            lp.error(&format!("Unable to plan the deployment ({message})"));
            tracing::error!(deployment = %d.id, error = %message, "planning failed");
            let completed_at = chrono::Utc::now();
            persist_with_retry(ctx, &d.id, sig, move || {
                updater::to_completed(
                    DeploymentStatus::Failure,
                    HashMap::new(),
                    format!("Failed to plan the deployment ({message})"),
                    completed_at,
                )
            })
            .await
        }
    };
    if let Err(e) = lp.complete().await {
        tracing::warn!(deployment = %d.id, error = %e, "failed to flush planner logs");
    }
    result
}
