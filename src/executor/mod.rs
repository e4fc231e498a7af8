// ABOUTME: Stage executor contract and the per-stage input handed to executors.
// ABOUTME: Executors are built fresh per stage attempt from registered factories.

mod clients;
mod deploysource;
pub mod kubernetes;
pub mod lambda;
mod log_persister;
mod metadata;
mod registry;
mod signal;
pub mod wait;
pub mod waitapproval;

pub use clients::{ClientError, ProviderClients};
pub use deploysource::{DeploySource, DeploySourceError, DeploySourceProvider};
pub use log_persister::{
    LogBlock, LogPersister, LogSeverity, LogStore, LogStoreError, MemoryLogStore,
    StageLogPersister,
};
pub use metadata::MetadataStore;
pub use registry::{Registry, RegistryError, default_registry};
pub use signal::{StopSignal, StopSignalHandler, StopSignalType, determine_stage_status, new_stop_signal};

use async_trait::async_trait;
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::StageConfig;
use crate::controller::CommandQueue;
use crate::model::{Deployment, PipelineStage, StageStatus};
use crate::provider::kubernetes::Manifest;

/// Runs one pipeline stage to a terminal status.
#[async_trait]
pub trait Executor: Send {
    /// Perform the stage. Must observe `sig` between externally visible
    /// actions and reconcile its result through [`determine_stage_status`].
    async fn execute(&mut self, sig: StopSignal) -> StageStatus;
}

pub type Factory = Arc<dyn Fn(Input) -> Box<dyn Executor> + Send + Sync>;

/// Everything an executor may use while running one stage.
#[derive(Clone)]
pub struct Input {
    pub deployment: Arc<Deployment>,
    pub stage: PipelineStage,
    /// Configuration of this stage; absent for planner-synthesized stages.
    pub stage_config: Option<StageConfig>,
    pub target_dsp: Arc<DeploySourceProvider>,
    /// Absent on the first deployment of an application.
    pub running_dsp: Option<Arc<DeploySourceProvider>>,
    pub log_persister: Arc<dyn LogPersister>,
    pub metadata_store: MetadataStore,
    pub app_manifests_cache: Arc<dyn Cache<Vec<Manifest>>>,
    pub clients: Arc<ProviderClients>,
    pub commands: Arc<CommandQueue>,
}
