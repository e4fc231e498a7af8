// ABOUTME: Application-wide error types for conveyor.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::controller::ControllerError;
use crate::planner::PlannerError;
use crate::repo::RepoError;
use crate::store::StoreError;
use crate::types::CommitHashError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("deployment finished with status {0}")]
    DeploymentFailed(String),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("planning failed: {0}")]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("invalid commit: {0}")]
    CommitHash(#[from] CommitHashError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
