// ABOUTME: Durable deployment records and the mutation contract the controller uses.
// ABOUTME: Updates are atomic read-modify-validate-write transactions.

mod error;
mod list;
mod memory;
mod row;
pub mod updater;

pub use error::StoreError;
pub use list::{
    Direction, Field, FieldValue, ListFilter, ListOptions, Operator, Order, next_cursor,
};
pub use memory::InMemoryDeploymentStore;
pub use row::{StorageRow, ToStorageRow};
pub use updater::Updater;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::model::Deployment;
use crate::types::{DeploymentId, StageId};

/// One page of a deployment listing.
#[derive(Debug, Clone)]
pub struct DeploymentPage {
    pub deployments: Vec<Deployment>,
    /// Cursor for the following page; empty when the page was empty.
    pub cursor: String,
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn add_deployment(&self, deployment: &Deployment) -> Result<(), StoreError>;

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment, StoreError>;

    async fn list_deployments(&self, opts: &ListOptions) -> Result<DeploymentPage, StoreError>;

    /// Apply `updater` to a copy of the stored deployment, validate the
    /// result, and commit it. Returns the committed record.
    async fn update_deployment(
        &self,
        id: &DeploymentId,
        updater: Updater,
    ) -> Result<Deployment, StoreError>;

    /// Merge keys into the deployment-level metadata.
    async fn put_deployment_metadata(
        &self,
        id: &DeploymentId,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Merge keys into one stage's metadata.
    async fn put_deployment_stage_metadata(
        &self,
        id: &DeploymentId,
        stage_id: &StageId,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;
}
