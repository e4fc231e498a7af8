// ABOUTME: Tests for the WAIT stage executor built through the default registry.
// ABOUTME: Covers the timed success path and prompt cancellation.

mod support;

use chrono::Utc;
use conveyor::cache::MemoryCache;
use conveyor::config::DeploymentConfig;
use conveyor::controller::CommandQueue;
use conveyor::executor::{
    DeploySourceProvider, Input, LogPersister, MemoryLogStore, MetadataStore, ProviderClients,
    StageLogPersister, StopSignal, default_registry, new_stop_signal,
};
use conveyor::model::{ApplicationKind, PipelineStage, StageKind, StageStatus, SyncStrategy};
use conveyor::provider::kubernetes::Manifest;
use conveyor::repo::StaticRepo;
use conveyor::store::{DeploymentStore, InMemoryDeploymentStore};
use conveyor::types::StageId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{commit, init_tracing, pending_deployment};

const CONFIG: &str = r#"kind: Kubernetes
pipeline:
  stages:
    - name: WAIT
      with:
        duration: 200ms
"#;

/// Run one WAIT stage and return its status, how long it took, and its log lines.
async fn run_wait(sig: StopSignal) -> (StageStatus, Duration, Vec<String>) {
    let logs = Arc::new(MemoryLogStore::new());
    let store = Arc::new(InMemoryDeploymentStore::new());
    let mut d = pending_deployment(
        ApplicationKind::Kubernetes,
        "web",
        "aaaaaaa",
        SyncStrategy::Pipeline,
    );
    let stage = PipelineStage::new("stage-0", StageKind::Wait, 0, Utc::now());
    d.stages = vec![stage.clone()];
    store.add_deployment(&d).await.unwrap();

    let config = DeploymentConfig::from_yaml(CONFIG).unwrap();
    let lp = Arc::new(StageLogPersister::new(
        d.id.clone(),
        stage.id.clone(),
        0,
        logs.clone(),
    ));
    let input = Input {
        deployment: Arc::new(d.clone()),
        stage,
        stage_config: config.stage(0).cloned(),
        target_dsp: Arc::new(DeploySourceProvider::new(
            Arc::new(StaticRepo::new(".")),
            "target",
            commit("aaaaaaa"),
            ".",
        )),
        running_dsp: None,
        log_persister: lp.clone() as Arc<dyn LogPersister>,
        metadata_store: MetadataStore::new(&d, store),
        app_manifests_cache: Arc::new(MemoryCache::<Vec<Manifest>>::new()),
        clients: Arc::new(ProviderClients::new()),
        commands: Arc::new(CommandQueue::new()),
    };

    let mut executor = default_registry().unwrap().executor(input).unwrap();
    let started = Instant::now();
    let status = executor.execute(sig).await;
    let elapsed = started.elapsed();
    lp.complete().await.unwrap();
    (status, elapsed, logs.stage_lines(&d.id, &StageId::new("stage-0")))
}

#[tokio::test]
async fn waits_for_the_configured_duration() {
    init_tracing();
    let (sig, _handler) = new_stop_signal();

    let (status, elapsed, lines) = run_wait(sig).await;

    assert_eq!(status, StageStatus::Success);
    assert!(elapsed >= Duration::from_millis(200));
    assert_eq!(
        lines,
        vec![
            "Waiting for 200ms...".to_string(),
            "Waited for 200ms".to_string()
        ]
    );
}

#[tokio::test]
async fn cancel_interrupts_the_wait() {
    init_tracing();
    let (sig, handler) = new_stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handler.cancel();
    });

    let (status, elapsed, lines) = run_wait(sig).await;

    assert_eq!(status, StageStatus::Cancelled);
    assert!(elapsed < Duration::from_millis(200));
    assert_eq!(lines, vec!["Waiting for 200ms...".to_string()]);
}

#[tokio::test]
async fn terminate_leaves_the_stage_status_unchanged() {
    init_tracing();
    let (sig, handler) = new_stop_signal();
    handler.terminate();

    let (status, _, _) = run_wait(sig).await;

    assert_eq!(status, StageStatus::NotStartedYet);
}
