// ABOUTME: End-to-end tests for the deployment controller.
// ABOUTME: Plans and runs deployments against a recording cluster client and an in-memory store.

mod support;

use conveyor::config::AgentConfig;
use conveyor::controller::{Controller, ControllerErrorKind, PLANNER_LOG_STAGE};
use conveyor::executor::{ProviderClients, default_registry};
use conveyor::model::{ApplicationKind, DeploymentStatus, StageKind, StageStatus, SyncStrategy};
use conveyor::planner::default_planners;
use conveyor::store::DeploymentStore;
use conveyor::types::{DeploymentId, StageId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{Harness, RecordingApplier, init_tracing, pending_deployment, write_k8s_app};
use tempfile::TempDir;

const QUICK_SYNC: &str = "kind: Kubernetes\n";

const CANARY_PIPELINE: &str = r#"kind: Kubernetes
pipeline:
  stages:
    - name: K8S_CANARY_ROLLOUT
      with:
        replicas: 50%
    - name: K8S_TRAFFIC_ROUTING
      with:
        canary: 100
    - name: K8S_PRIMARY_ROLLOUT
"#;

const WAIT_PIPELINE: &str = r#"kind: Kubernetes
input:
  auto_rollback: false
pipeline:
  stages:
    - name: WAIT
      with:
        duration: 300ms
"#;

const LONG_WAIT_PIPELINE: &str = r#"kind: Kubernetes
input:
  auto_rollback: false
pipeline:
  stages:
    - name: WAIT
      with:
        duration: 1h
    - name: K8S_PRIMARY_ROLLOUT
"#;

const APPROVAL_PIPELINE: &str = r#"kind: Kubernetes
pipeline:
  stages:
    - name: WAIT_APPROVAL
      with:
        approvers: [bob]
        poll_interval: 20ms
    - name: K8S_PRIMARY_ROLLOUT
"#;

fn controller(h: &Harness, applier: Arc<RecordingApplier>) -> Controller {
    let clients = ProviderClients::new()
        .with_applier(applier)
        .with_apply_retry(3, Duration::from_millis(5));
    Controller::new(
        h.context(default_registry().unwrap(), clients),
        default_planners(),
    )
}

/// Add a deployment of one app at `hash` whose files live in a fresh directory.
async fn add_app(
    h: &Harness,
    tmp: &TempDir,
    hash: &str,
    config: &str,
    image: &str,
    strategy: SyncStrategy,
) -> DeploymentId {
    let root = tmp.path().join(hash);
    write_k8s_app(&root.join("app"), config, image);
    h.repo.add(hash, &root);
    let d = pending_deployment(ApplicationKind::Kubernetes, "web", hash, strategy);
    h.store.add_deployment(&d).await.unwrap();
    d.id
}

async fn wait_stage_running(h: &Harness, id: &DeploymentId, stage: &str) {
    let poll = async {
        loop {
            let d = h.store.get_deployment(id).await.unwrap();
            if d.stage(&StageId::new(stage))
                .is_some_and(|s| s.status == StageStatus::Running)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("stage never started");
}

#[tokio::test]
async fn first_deployment_quick_syncs_to_success() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(&h, &tmp, "aaaaaaa", QUICK_SYNC, "web:v1", SyncStrategy::Auto).await;
    let applier = Arc::new(RecordingApplier::new());

    let report = controller(&h, applier.clone())
        .run_deployment(&id)
        .await
        .unwrap();

    assert_eq!(report.status(), DeploymentStatus::Success);
    assert!(!report.terminated);
    let d = h.store.get_deployment(&id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Success);
    assert!(d.completed_at.is_some());
    assert_eq!(d.version, "v1");
    assert_eq!(d.stages[0].name, StageKind::K8sSync);
    assert_eq!(d.stages[0].status, StageStatus::Success);
    assert!(d.stages[0].completed_at.is_some());

    let applied = applier.applied();
    assert!(applied.contains(&"Deployment/web".to_string()));
    assert!(applied.contains(&"Service/web".to_string()));

    let planner_logs = h.logs.stage_lines(&id, &StageId::new(PLANNER_LOG_STAGE));
    assert!(planner_logs.iter().any(|l| l.starts_with("Planned 2 stage(s)")));
    let sync_logs = h.logs.stage_lines(&id, &StageId::new("stage-0"));
    assert!(sync_logs.iter().any(|l| l == "Successfully applied 2 manifests"));
}

#[tokio::test]
async fn failed_canary_rolls_back_and_fails_the_deployment() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    add_app(&h, &tmp, "aaaaaaa", CANARY_PIPELINE, "web:v1", SyncStrategy::QuickSync).await;
    let applier = Arc::new(RecordingApplier::failing_on("-canary"));
    let ctl = controller(&h, applier.clone());
    assert_eq!(ctl.sync_once().await.unwrap(), 1);
    let first = h.store.list_deployments(&Default::default()).await.unwrap();
    let first_id = first.deployments[0].id.clone();
    assert_eq!(
        h.wait_completed(&first_id).await.status,
        DeploymentStatus::Success
    );

    let id = add_app(&h, &tmp, "bbbbbbb", CANARY_PIPELINE, "web:v2", SyncStrategy::Auto).await;
    let report = ctl.run_deployment(&id).await.unwrap();

    let d = report.deployment;
    assert_eq!(d.status, DeploymentStatus::Failure);
    assert_eq!(d.status_description, "The deployment failed at stage stage-0");
    assert_eq!(d.running_commit_hash.as_ref().map(|c| c.as_str()), Some("aaaaaaa"));
    let status = |id: &str| d.stage(&StageId::new(id)).unwrap().status;
    assert_eq!(status("stage-0"), StageStatus::Failure);
    assert_eq!(status("stage-1"), StageStatus::NotStartedYet);
    assert_eq!(status("stage-2"), StageStatus::NotStartedYet);
    assert_eq!(status("rollback"), StageStatus::Success);

    let history = h.store.history(&id);
    assert!(
        history
            .iter()
            .any(|s| s.status == DeploymentStatus::RollingBack)
    );
    let rollback_logs = h.logs.stage_lines(&id, &StageId::new("rollback"));
    assert!(rollback_logs.iter().any(|l| l == "Start rolling back the deployment"));
}

#[tokio::test]
async fn cancel_stops_a_running_stage_promptly() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(
        &h,
        &tmp,
        "aaaaaaa",
        LONG_WAIT_PIPELINE,
        "web:v1",
        SyncStrategy::Pipeline,
    )
    .await;
    let ctl = controller(&h, Arc::new(RecordingApplier::new()));

    ctl.sync_once().await.unwrap();
    wait_stage_running(&h, &id, "stage-0").await;
    let started = Instant::now();
    assert!(ctl.cancel(&id));

    let d = h.wait_completed(&id).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(d.status, DeploymentStatus::Cancelled);
    assert_eq!(d.stages[0].status, StageStatus::Cancelled);
    assert_eq!(d.stages[1].status, StageStatus::Cancelled);
    assert!(!ctl.cancel(&DeploymentId::new("unknown")));
}

#[tokio::test]
async fn terminated_deployment_resumes_where_it_stopped() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(&h, &tmp, "aaaaaaa", WAIT_PIPELINE, "web:v1", SyncStrategy::Pipeline).await;

    let ctl = controller(&h, Arc::new(RecordingApplier::new()));
    ctl.sync_once().await.unwrap();
    wait_stage_running(&h, &id, "stage-0").await;
    let reports = ctl.shutdown().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].as_ref().unwrap().terminated);
    assert!(!ctl.is_tracking(&id));

    let d = h.store.get_deployment(&id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Running);
    assert_eq!(d.stages[0].status, StageStatus::Running);
    assert!(d.completed_at.is_none());

    let resumed = controller(&h, Arc::new(RecordingApplier::new()));
    let report = resumed.run_deployment(&id).await.unwrap();
    assert_eq!(report.status(), DeploymentStatus::Success);
    assert_eq!(report.deployment.stages[0].status, StageStatus::Success);
}

#[tokio::test]
async fn approval_from_a_listed_user_unblocks_the_pipeline() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(
        &h,
        &tmp,
        "aaaaaaa",
        APPROVAL_PIPELINE,
        "web:v1",
        SyncStrategy::Pipeline,
    )
    .await;
    let ctl = controller(&h, Arc::new(RecordingApplier::new()));

    ctl.sync_once().await.unwrap();
    wait_stage_running(&h, &id, "stage-0").await;
    ctl.approve(&id, &StageId::new("stage-0"), "mallory");
    ctl.approve(&id, &StageId::new("stage-0"), "bob");

    let d = h.wait_completed(&id).await;
    assert_eq!(d.status, DeploymentStatus::Success);
    assert_eq!(
        d.stages[0].metadata.get("Approver").map(String::as_str),
        Some("bob")
    );
    let logs = h.logs.stage_lines(&id, &StageId::new("stage-0"));
    assert!(logs.iter().any(|l| l == "User mallory is not allowed to approve this stage"));
    assert!(ctl.commands().is_empty());
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(&h, &tmp, "aaaaaaa", QUICK_SYNC, "web:v1", SyncStrategy::Auto).await;
    h.store.fail_next_updates(2);

    let report = controller(&h, Arc::new(RecordingApplier::new()))
        .run_deployment(&id)
        .await
        .unwrap();
    assert_eq!(report.status(), DeploymentStatus::Success);
}

#[tokio::test]
async fn exhausted_store_retries_leave_the_deployment_untouched() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(&h, &tmp, "aaaaaaa", QUICK_SYNC, "web:v1", SyncStrategy::Auto).await;
    h.store.fail_next_updates(100);

    let err = controller(&h, Arc::new(RecordingApplier::new()))
        .run_deployment(&id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ControllerErrorKind::PersistenceExhausted);
    assert_eq!(err.deployment(), Some(&id));
    let d = h.store.get_deployment(&id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Pending);
}

#[tokio::test]
async fn missing_commit_leaves_the_deployment_pending() {
    init_tracing();
    let h = Harness::new();
    let d = pending_deployment(
        ApplicationKind::Kubernetes,
        "web",
        "ccccccc",
        SyncStrategy::Auto,
    );
    h.store.add_deployment(&d).await.unwrap();

    let err = controller(&h, Arc::new(RecordingApplier::new()))
        .run_deployment(&d.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ControllerErrorKind::DeploySourceUnavailable);
    let stored = h.store.get_deployment(&d.id).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Pending);
}

#[tokio::test]
async fn broken_manifests_fail_planning() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(&h, &tmp, "aaaaaaa", QUICK_SYNC, "web:v1", SyncStrategy::Auto).await;
    std::fs::write(
        tmp.path().join("aaaaaaa/app/deployment.yaml"),
        "kind: [unterminated",
    )
    .unwrap();

    let report = controller(&h, Arc::new(RecordingApplier::new()))
        .run_deployment(&id)
        .await
        .unwrap();
    assert_eq!(report.status(), DeploymentStatus::Failure);
    assert!(
        report
            .deployment
            .status_description
            .starts_with("Failed to plan the deployment")
    );
    assert!(report.deployment.stages.is_empty());
}

#[tokio::test]
async fn transient_apply_failures_are_retried_within_the_stage() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(&h, &tmp, "aaaaaaa", QUICK_SYNC, "web:v1", SyncStrategy::Auto).await;
    let applier = Arc::new(RecordingApplier::new());
    applier.fail_next_applies(2);

    let report = controller(&h, applier.clone())
        .run_deployment(&id)
        .await
        .unwrap();

    assert_eq!(report.status(), DeploymentStatus::Success);
    assert_eq!(report.deployment.stages[0].retried_count, 0);
    assert_eq!(applier.applied().len(), 2);
    let logs = h.logs.stage_lines(&id, &StageId::new("stage-0"));
    let retries = logs
        .iter()
        .filter(|l| l.starts_with("Retrying to apply manifest"))
        .count();
    assert_eq!(retries, 2);
    assert!(logs.iter().any(|l| l == "Successfully applied 2 manifests"));
}

#[tokio::test]
async fn apply_failures_beyond_the_retry_budget_fail_the_stage() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(&h, &tmp, "aaaaaaa", QUICK_SYNC, "web:v1", SyncStrategy::Auto).await;
    let applier = Arc::new(RecordingApplier::new());
    applier.fail_next_applies(3);

    let report = controller(&h, applier.clone())
        .run_deployment(&id)
        .await
        .unwrap();

    assert_eq!(report.status(), DeploymentStatus::Failure);
    assert_eq!(report.deployment.stages[0].status, StageStatus::Failure);
    let logs = h.logs.stage_lines(&id, &StageId::new("stage-0"));
    assert!(logs.iter().any(|l| l.starts_with("Failed to apply manifest")));
}

#[tokio::test]
async fn second_driver_is_refused_and_cancel_still_reaches_the_first() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(
        &h,
        &tmp,
        "aaaaaaa",
        LONG_WAIT_PIPELINE,
        "web:v1",
        SyncStrategy::Pipeline,
    )
    .await;
    let ctl = controller(&h, Arc::new(RecordingApplier::new()));
    ctl.sync_once().await.unwrap();
    wait_stage_running(&h, &id, "stage-0").await;

    let second = tokio::time::timeout(Duration::from_secs(1), ctl.run_deployment(&id))
        .await
        .expect("second driver should return at once");
    let err = second.unwrap_err();
    assert_eq!(err.kind(), ControllerErrorKind::AlreadyRunning);
    assert_eq!(err.deployment(), Some(&id));
    assert!(ctl.is_tracking(&id));

    assert!(ctl.cancel(&id));
    let d = h.wait_completed(&id).await;
    assert_eq!(d.status, DeploymentStatus::Cancelled);
    assert_eq!(d.stages[0].status, StageStatus::Cancelled);
}

#[tokio::test]
async fn abandoned_run_is_no_longer_tracked() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let id = add_app(
        &h,
        &tmp,
        "aaaaaaa",
        LONG_WAIT_PIPELINE,
        "web:v1",
        SyncStrategy::Pipeline,
    )
    .await;
    let ctl = controller(&h, Arc::new(RecordingApplier::new()));

    let run = tokio::time::timeout(Duration::from_millis(200), ctl.run_deployment(&id)).await;

    assert!(run.is_err());
    assert!(!ctl.is_tracking(&id));
    assert!(!ctl.cancel(&id));
}

#[tokio::test]
async fn run_loop_picks_up_deployments_until_shutdown() {
    init_tracing();
    let h = Harness::new();
    let tmp = TempDir::new().unwrap();
    let agent = AgentConfig::from_yaml("sync_interval: 20ms\n").unwrap();
    let first = add_app(&h, &tmp, "aaaaaaa", QUICK_SYNC, "web:v1", SyncStrategy::Auto).await;
    let ctl = Arc::new(controller(&h, Arc::new(RecordingApplier::new())));
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    let agent_loop = tokio::spawn({
        let ctl = ctl.clone();
        async move {
            ctl.run(agent.sync_interval, async {
                let _ = stopped.await;
            })
            .await
        }
    });

    assert_eq!(h.wait_completed(&first).await.status, DeploymentStatus::Success);
    let second = add_app(&h, &tmp, "bbbbbbb", QUICK_SYNC, "web:v2", SyncStrategy::Auto).await;
    assert_eq!(h.wait_completed(&second).await.status, DeploymentStatus::Success);

    stop.send(()).unwrap();
    let reports = tokio::time::timeout(Duration::from_secs(5), agent_loop)
        .await
        .expect("run loop did not stop")
        .unwrap();
    assert!(reports.iter().all(|r| r.is_ok()));
    assert!(!ctl.is_tracking(&first));
    assert!(!ctl.is_tracking(&second));
}
