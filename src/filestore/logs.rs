// ABOUTME: Log store that writes each completed stage's log blocks to a file store.
// ABOUTME: One JSON object per stage attempt: logs/{deployment}/{stage}/{retried_count}.json.

use async_trait::async_trait;
use std::sync::Arc;

use super::FileStore;
use crate::executor::{LogBlock, LogStore, LogStoreError};
use crate::types::{DeploymentId, StageId};

pub struct FileLogStore {
    store: Arc<dyn FileStore>,
}

impl FileLogStore {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    pub fn object_path(deployment: &DeploymentId, stage: &StageId, retried_count: u32) -> String {
        format!("logs/{deployment}/{stage}/{retried_count}.json")
    }

    /// Read back the blocks stored for one stage attempt.
    pub async fn stage_logs(
        &self,
        deployment: &DeploymentId,
        stage: &StageId,
        retried_count: u32,
    ) -> Result<Vec<LogBlock>, LogStoreError> {
        let object = self
            .store
            .get_object(&Self::object_path(deployment, stage, retried_count))
            .await?;
        Ok(serde_json::from_slice(&object.content)?)
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn report_stage_logs(
        &self,
        deployment: &DeploymentId,
        stage: &StageId,
        retried_count: u32,
        blocks: &[LogBlock],
    ) -> Result<(), LogStoreError> {
        let content = serde_json::to_vec(blocks)?;
        self.store
            .put_object(
                &Self::object_path(deployment, stage, retried_count),
                &content,
            )
            .await?;
        Ok(())
    }
}
