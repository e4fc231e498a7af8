// ABOUTME: Client contract for a serverless function platform.
// ABOUTME: Implementations wrap a cloud SDK; tests and dry runs use the in-memory one.

use async_trait::async_trait;
use thiserror::Error;

use super::{FunctionManifest, RoutingTrafficConfig};

#[derive(Debug, Error)]
pub enum LambdaError {
    #[error("not found")]
    NotFound,

    #[error("lambda API error: {0}")]
    Api(String),

    #[error("invalid function manifest: {0}")]
    Manifest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait LambdaClient: Send + Sync {
    async fn is_function_exist(&self, name: &str) -> Result<bool, LambdaError>;

    async fn create_function(&self, fm: &FunctionManifest) -> Result<(), LambdaError>;

    async fn update_function(&self, fm: &FunctionManifest) -> Result<(), LambdaError>;

    /// Commit the current function code and configuration as a new version.
    async fn publish_function(&self, fm: &FunctionManifest) -> Result<String, LambdaError>;

    /// Current traffic split of the function alias. [`LambdaError::NotFound`]
    /// when the alias does not exist yet.
    async fn get_traffic_config(
        &self,
        fm: &FunctionManifest,
    ) -> Result<RoutingTrafficConfig, LambdaError>;

    /// Create the alias routing all traffic to `version`.
    async fn create_traffic_config(
        &self,
        fm: &FunctionManifest,
        version: &str,
    ) -> Result<(), LambdaError>;

    async fn update_traffic_config(
        &self,
        fm: &FunctionManifest,
        config: &RoutingTrafficConfig,
    ) -> Result<(), LambdaError>;
}
