// ABOUTME: Controller error types with SNAFU context selectors.
// ABOUTME: Failures end one deployment's run, never the process.

use snafu::Snafu;

use crate::executor::{DeploySourceError, RegistryError};
use crate::model::ApplicationKind;
use crate::store::StoreError;
use crate::types::DeploymentId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ControllerError {
    #[snafu(display("failed to persist deployment {deployment} after {attempts} attempts: {source}"))]
    PersistExhausted {
        deployment: DeploymentId,
        attempts: u32,
        source: StoreError,
    },

    #[snafu(display("failed to persist deployment {deployment}: {source}"))]
    Persist {
        deployment: DeploymentId,
        source: StoreError,
    },

    #[snafu(display("failed to list deployments: {source}"))]
    List { source: StoreError },

    #[snafu(display("deploy source for {deployment} is unavailable: {source}"))]
    DeploySource {
        deployment: DeploymentId,
        source: DeploySourceError,
    },

    #[snafu(display("no planner registered for {kind} applications"))]
    NoPlanner { kind: ApplicationKind },

    #[snafu(display("executor registry misconfigured: {source}"))]
    Registry { source: RegistryError },

    #[snafu(display("deployment {deployment} is already being driven by this controller"))]
    AlreadyRunning { deployment: DeploymentId },

    #[snafu(display("deployment task for {deployment} failed: {message}"))]
    Task {
        deployment: DeploymentId,
        message: String,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerErrorKind {
    /// The store kept failing; the deployment stays at its last durable state.
    PersistenceExhausted,
    /// The store rejected an update outright.
    Persistence,
    PlanningFailed,
    DeploySourceUnavailable,
    RegistryMisconfiguration,
    /// Another run of the same deployment is in progress here.
    AlreadyRunning,
    /// A deployment task panicked or was aborted.
    Task,
}

impl ControllerError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ControllerErrorKind {
        match self {
            ControllerError::PersistExhausted { .. } => ControllerErrorKind::PersistenceExhausted,
            ControllerError::Persist { .. } | ControllerError::List { .. } => {
                ControllerErrorKind::Persistence
            }
            ControllerError::NoPlanner { .. } => ControllerErrorKind::PlanningFailed,
            ControllerError::DeploySource { .. } => ControllerErrorKind::DeploySourceUnavailable,
            ControllerError::Registry { .. } => ControllerErrorKind::RegistryMisconfiguration,
            ControllerError::AlreadyRunning { .. } => ControllerErrorKind::AlreadyRunning,
            ControllerError::Task { .. } => ControllerErrorKind::Task,
        }
    }

    /// The deployment this error belongs to, when it is tied to one.
    pub fn deployment(&self) -> Option<&DeploymentId> {
        match self {
            ControllerError::PersistExhausted { deployment, .. }
            | ControllerError::Persist { deployment, .. }
            | ControllerError::DeploySource { deployment, .. }
            | ControllerError::AlreadyRunning { deployment }
            | ControllerError::Task { deployment, .. } => Some(deployment),
            ControllerError::List { .. }
            | ControllerError::NoPlanner { .. }
            | ControllerError::Registry { .. } => None,
        }
    }
}

impl From<RegistryError> for ControllerError {
    fn from(source: RegistryError) -> Self {
        ControllerError::Registry { source }
    }
}
