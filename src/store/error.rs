// ABOUTME: Error types for the deployment store.
// ABOUTME: Separates caller mistakes from transient backend failures.

use thiserror::Error;

use crate::model::{DeploymentStatus, StageStatus, ValidationError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("deployment already exists: {0}")]
    AlreadyExists(String),

    #[error("deployment {0} is already completed")]
    AlreadyCompleted(String),

    #[error("deployment status cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("stage {stage} status cannot move from {from} to {to}")]
    InvalidStageTransition {
        stage: String,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("stage {0} not found")]
    UnknownStage(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid deployment: {0}")]
    Validation(#[from] ValidationError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
