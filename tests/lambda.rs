// ABOUTME: End-to-end tests for serverless function deployments.
// ABOUTME: Drives the controller against the in-memory function client.

mod support;

use conveyor::controller::Controller;
use conveyor::executor::{ProviderClients, default_registry};
use conveyor::model::{ApplicationKind, DeploymentStatus, StageKind, StageStatus, SyncStrategy};
use conveyor::planner::default_planners;
use conveyor::provider::lambda::InMemoryLambdaClient;
use conveyor::store::DeploymentStore;
use conveyor::types::{DeploymentId, StageId};
use std::sync::Arc;
use std::time::Duration;
use support::{Harness, init_tracing, pending_deployment, write_lambda_app};
use tempfile::TempDir;

const PIPELINE: &str = r#"kind: Lambda
input:
  cloud_provider: local
pipeline:
  stages:
    - name: LAMBDA_CANARY_ROLLOUT
    - name: LAMBDA_PROMOTE
      with:
        percent: 50
    - name: LAMBDA_PROMOTE
      with:
        percent: 100
"#;

struct Fixture {
    h: Harness,
    tmp: TempDir,
    client: Arc<InMemoryLambdaClient>,
    controller: Controller,
}

impl Fixture {
    fn new() -> Self {
        let h = Harness::new();
        let client = Arc::new(InMemoryLambdaClient::new());
        let clients = ProviderClients::new()
            .with_lambda("local", client.clone())
            .with_lambda_publish_retry(2, Duration::from_millis(10));
        let controller = Controller::new(
            h.context(default_registry().unwrap(), clients),
            default_planners(),
        );
        Self {
            h,
            tmp: TempDir::new().unwrap(),
            client,
            controller,
        }
    }

    async fn deploy(&self, hash: &str, image: &str) -> DeploymentId {
        let root = self.tmp.path().join(hash);
        write_lambda_app(&root.join("app"), PIPELINE, image);
        self.h.repo.add(hash, &root);
        let d = pending_deployment(ApplicationKind::Lambda, "thumbnailer", hash, SyncStrategy::Auto);
        self.h.store.add_deployment(&d).await.unwrap();
        self.controller.run_deployment(&d.id).await.unwrap();
        d.id
    }
}

#[tokio::test]
async fn first_deployment_syncs_the_function() {
    init_tracing();
    let f = Fixture::new();

    let id = f.deploy("aaaaaaa", "registry.local/thumbnailer:v1").await;

    let d = f.h.store.get_deployment(&id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Success);
    assert_eq!(d.version, "v1");
    assert_eq!(d.stages[0].name, StageKind::LambdaSync);
    assert_eq!(f.client.published_versions("thumbnailer"), 1);
    let traffic = f.client.traffic("thumbnailer").unwrap();
    assert_eq!(traffic.primary.version, "1");
    assert_eq!(traffic.primary.percent, 100.0);
}

#[tokio::test]
async fn new_image_is_promoted_through_the_pipeline() {
    init_tracing();
    let f = Fixture::new();
    f.deploy("aaaaaaa", "registry.local/thumbnailer:v1").await;

    let id = f.deploy("bbbbbbb", "registry.local/thumbnailer:v2").await;

    let d = f.h.store.get_deployment(&id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Success);
    assert_eq!(d.version, "v2");
    assert_eq!(
        d.summary,
        "Sync progressively because of updating image from registry.local/thumbnailer:v1 to registry.local/thumbnailer:v2"
    );
    let kinds: Vec<_> = d.stages.iter().map(|s| s.name).collect();
    assert_eq!(
        kinds,
        vec![
            StageKind::LambdaCanaryRollout,
            StageKind::LambdaPromote,
            StageKind::LambdaPromote,
            StageKind::Rollback
        ]
    );
    assert_eq!(f.client.published_versions("thumbnailer"), 2);
    assert_eq!(d.metadata.get("thumbnailer-rollout").map(String::as_str), Some("2"));

    let traffic = f.client.traffic("thumbnailer").unwrap();
    assert_eq!(traffic.primary.version, "2");
    assert_eq!(traffic.primary.percent, 100.0);
    let half = f.h.logs.stage_lines(&id, &StageId::new("stage-1"));
    assert!(half.iter().any(|l| l.contains("it will handle 50 percent of traffic")));
}

#[tokio::test]
async fn publish_failure_fails_the_rollout_and_keeps_traffic() {
    init_tracing();
    let f = Fixture::new();
    f.deploy("aaaaaaa", "registry.local/thumbnailer:v1").await;
    f.client.fail_next_publishes(5);

    let id = f.deploy("bbbbbbb", "registry.local/thumbnailer:v2").await;

    let d = f.h.store.get_deployment(&id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Failure);
    let status = |id: &str| d.stage(&StageId::new(id)).unwrap().status;
    assert_eq!(status("stage-0"), StageStatus::Failure);
    assert_eq!(status("stage-1"), StageStatus::NotStartedYet);
    assert_eq!(status("rollback"), StageStatus::Success);
    assert_eq!(f.client.published_versions("thumbnailer"), 1);
    assert_eq!(f.client.traffic("thumbnailer").unwrap().primary.version, "1");

    let logs = f.h.logs.stage_lines(&id, &StageId::new("stage-0"));
    assert!(
        logs.iter()
            .any(|l| l.starts_with("Failed to commit new version for Lambda function thumbnailer"))
    );
}
