// ABOUTME: Test support utilities.
// ABOUTME: Application fixtures, a recording cluster client, a flaky store, and a commit-mapped repo.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use conveyor::cache::MemoryCache;
use conveyor::controller::{CommandQueue, ControllerContext};
use conveyor::executor::{LogStore, MemoryLogStore, ProviderClients, Registry};
use conveyor::model::{ApplicationKind, Commit, Deployment, SyncStrategy, Trigger};
use conveyor::provider::kubernetes::{Applier, ApplyError, Manifest, ResourceKey};
use conveyor::repo::{Repo, RepoError};
use conveyor::store::{
    DeploymentPage, DeploymentStore, InMemoryDeploymentStore, ListOptions, StoreError, Updater,
};
use conveyor::types::{ApplicationId, CommitHash, DeploymentId, StageId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("conveyor=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn commit(hash: &str) -> CommitHash {
    CommitHash::new(hash).unwrap()
}

pub fn deployment_manifest(image: &str, replicas: u32) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: {replicas}
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
        - name: web
          image: {image}
"#
    )
}

pub const SERVICE_MANIFEST: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  selector:
    app: web
  ports:
    - port: 80
      targetPort: 8080
"#;

/// Write a Kubernetes application (config, Deployment and Service) into `dir`.
pub fn write_k8s_app(dir: &Path, config: &str, image: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(".conveyor.yaml"), config).unwrap();
    std::fs::write(dir.join("deployment.yaml"), deployment_manifest(image, 2)).unwrap();
    std::fs::write(dir.join("service.yaml"), SERVICE_MANIFEST).unwrap();
}

/// Write a serverless application (config and function manifest) into `dir`.
pub fn write_lambda_app(dir: &Path, config: &str, image: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(".conveyor.yaml"), config).unwrap();
    let function = format!(
        r#"apiVersion: conveyor.dev/v1
kind: LambdaFunction
spec:
  name: thumbnailer
  image: {image}
  role: arn:aws:iam::1:role/lambda
"#
    );
    std::fs::write(dir.join("function.yaml"), function).unwrap();
}

/// A PENDING deployment of `app` at `hash`.
pub fn pending_deployment(
    kind: ApplicationKind,
    app: &str,
    hash: &str,
    strategy: SyncStrategy,
) -> Deployment {
    let now = Utc::now();
    let trigger = Trigger {
        commit: Commit {
            hash: commit(hash),
            message: "change".to_string(),
            author: "dev".to_string(),
            branch: "main".to_string(),
            created_at: now,
        },
        commander: "alice".to_string(),
        timestamp: now,
        sync_strategy: strategy,
    };
    Deployment::new(ApplicationId::new(app), app, kind, "app", trigger)
}

/// Cluster client that records what it was asked to do. Applies of
/// resources whose name ends with the configured suffix fail.
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    live: Mutex<HashSet<String>>,
    fail_suffix: Option<String>,
    transient_failures: Mutex<u32>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(suffix: &str) -> Self {
        Self {
            fail_suffix: Some(suffix.to_string()),
            ..Self::default()
        }
    }

    /// Make the next `n` applies fail as if the API server were busy.
    pub fn fail_next_applies(&self, n: u32) {
        *self.transient_failures.lock() = n;
    }

    /// `Kind/name` of every successful apply, in order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl Applier for RecordingApplier {
    async fn apply(&self, manifest: &Manifest) -> Result<(), ApplyError> {
        let key = &manifest.key;
        {
            let mut failures = self.transient_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ApplyError::Command {
                    command: "kubectl apply".to_string(),
                    output: "the server is currently unable to handle the request".to_string(),
                });
            }
        }
        if let Some(suffix) = &self.fail_suffix
            && key.name.ends_with(suffix.as_str())
        {
            return Err(ApplyError::Command {
                command: "kubectl apply".to_string(),
                output: format!("admission webhook denied {}", key.name),
            });
        }
        let id = format!("{}/{}", key.kind, key.name);
        self.live.lock().insert(id.clone());
        self.applied.lock().push(id);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), ApplyError> {
        let id = format!("{}/{}", key.kind, key.name);
        if !self.live.lock().remove(&id) {
            return Err(ApplyError::NotFound);
        }
        self.deleted.lock().push(id);
        Ok(())
    }
}

/// Deployment store that keeps every committed snapshot and can be told to
/// fail the next updates as unavailable.
#[derive(Default)]
pub struct HistoryStore {
    inner: InMemoryDeploymentStore,
    history: Mutex<Vec<Deployment>>,
    failures: Mutex<u32>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_updates(&self, n: u32) {
        *self.failures.lock() = n;
    }

    pub fn history(&self, id: &DeploymentId) -> Vec<Deployment> {
        self.history
            .lock()
            .iter()
            .filter(|d| &d.id == id)
            .cloned()
            .collect()
    }

    fn take_failure(&self) -> bool {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl DeploymentStore for HistoryStore {
    async fn add_deployment(&self, deployment: &Deployment) -> Result<(), StoreError> {
        self.inner.add_deployment(deployment).await?;
        self.history.lock().push(deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment, StoreError> {
        self.inner.get_deployment(id).await
    }

    async fn list_deployments(&self, opts: &ListOptions) -> Result<DeploymentPage, StoreError> {
        self.inner.list_deployments(opts).await
    }

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        updater: Updater,
    ) -> Result<Deployment, StoreError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        let d = self.inner.update_deployment(id, updater).await?;
        self.history.lock().push(d.clone());
        Ok(d)
    }

    async fn put_deployment_metadata(
        &self,
        id: &DeploymentId,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.inner.put_deployment_metadata(id, metadata).await
    }

    async fn put_deployment_stage_metadata(
        &self,
        id: &DeploymentId,
        stage_id: &StageId,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.inner
            .put_deployment_stage_metadata(id, stage_id, metadata)
            .await
    }
}

/// Repository whose commits are plain directories on disk.
#[derive(Default)]
pub struct MapRepo {
    commits: Mutex<HashMap<String, PathBuf>>,
}

impl MapRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hash: &str, dir: impl Into<PathBuf>) {
        self.commits.lock().insert(commit(hash).to_string(), dir.into());
    }
}

#[async_trait]
impl Repo for MapRepo {
    async fn checkout(&self, commit: &CommitHash, _name: &str) -> Result<PathBuf, RepoError> {
        self.commits
            .lock()
            .get(commit.as_str())
            .cloned()
            .ok_or_else(|| RepoError::NotFound(PathBuf::from(commit.as_str())))
    }
}

/// Collaborators of one test controller.
pub struct Harness {
    pub store: Arc<HistoryStore>,
    pub repo: Arc<MapRepo>,
    pub logs: Arc<MemoryLogStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(HistoryStore::new()),
            repo: Arc::new(MapRepo::new()),
            logs: Arc::new(MemoryLogStore::new()),
        }
    }

    pub fn context(&self, registry: Registry, clients: ProviderClients) -> ControllerContext {
        ControllerContext {
            store: self.store.clone(),
            registry: Arc::new(registry),
            repo: self.repo.clone(),
            log_store: self.logs.clone() as Arc<dyn LogStore>,
            app_manifests_cache: Arc::new(MemoryCache::<Vec<Manifest>>::new()),
            clients: Arc::new(clients),
            commands: Arc::new(CommandQueue::new()),
            persist_retries: 3,
            persist_backoff: Duration::from_millis(5),
        }
    }

    /// Poll the store until the deployment completes.
    pub async fn wait_completed(&self, id: &DeploymentId) -> Deployment {
        let poll = async {
            loop {
                let d = self.store.get_deployment(id).await.unwrap();
                if d.is_completed() {
                    return d;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), poll)
            .await
            .expect("deployment did not complete in time")
    }
}
