// ABOUTME: In-process deployment store backed by a mutex-guarded map.
// ABOUTME: Enforces forward-only status transitions and validation on every write.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::list::decode_cursor;
use super::updater::{self, Updater};
use super::{DeploymentPage, DeploymentStore, ListOptions, StoreError, next_cursor};
use crate::model::{Deployment, can_update_deployment_status, can_update_stage_status};
use crate::types::{DeploymentId, StageId};

#[derive(Default)]
pub struct InMemoryDeploymentStore {
    deployments: Mutex<HashMap<DeploymentId, Deployment>>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deployments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.lock().is_empty()
    }

    fn apply(&self, id: &DeploymentId, updater: Updater) -> Result<Deployment, StoreError> {
        let mut deployments = self.deployments.lock();
        let current = deployments
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if current.is_completed() {
            return Err(StoreError::AlreadyCompleted(id.to_string()));
        }

        let mut next = current.clone();
        updater(&mut next)?;
        check_transitions(current, &next)?;
        next.updated_at = Utc::now();
        next.validate()?;

        deployments.insert(id.clone(), next.clone());
        Ok(next)
    }
}

fn check_transitions(current: &Deployment, next: &Deployment) -> Result<(), StoreError> {
    if current.status != next.status && !can_update_deployment_status(current.status, next.status)
    {
        return Err(StoreError::InvalidStatusTransition {
            from: current.status,
            to: next.status,
        });
    }
    for stage in &next.stages {
        let Some(prev) = current.stage(&stage.id) else {
            continue;
        };
        if prev.status != stage.status && !can_update_stage_status(prev.status, stage.status) {
            return Err(StoreError::InvalidStageTransition {
                stage: stage.id.to_string(),
                from: prev.status,
                to: stage.status,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn add_deployment(&self, deployment: &Deployment) -> Result<(), StoreError> {
        deployment.validate()?;
        let mut deployments = self.deployments.lock();
        if deployments.contains_key(&deployment.id) {
            return Err(StoreError::AlreadyExists(deployment.id.to_string()));
        }
        deployments.insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment, StoreError> {
        self.deployments
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_deployments(&self, opts: &ListOptions) -> Result<DeploymentPage, StoreError> {
        opts.validate()?;
        let cursor = if opts.cursor.is_empty() {
            None
        } else {
            Some(decode_cursor(&opts.cursor, opts)?)
        };

        let mut rows: Vec<Deployment> = self
            .deployments
            .lock()
            .values()
            .filter(|d| opts.filters.iter().all(|f| f.matches(d)))
            .filter(|d| cursor.as_deref().is_none_or(|c| opts.is_after(d, c)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| opts.compare(a, b));
        if opts.limit > 0 {
            rows.truncate(opts.limit);
        }

        let cursor = next_cursor(&rows, opts)?;
        Ok(DeploymentPage {
            deployments: rows,
            cursor,
        })
    }

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        updater: Updater,
    ) -> Result<Deployment, StoreError> {
        self.apply(id, updater)
    }

    async fn put_deployment_metadata(
        &self,
        id: &DeploymentId,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.apply(id, updater::merge_metadata(metadata)).map(|_| ())
    }

    async fn put_deployment_stage_metadata(
        &self,
        id: &DeploymentId,
        stage_id: &StageId,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.apply(id, updater::merge_stage_metadata(stage_id.clone(), metadata))
            .map(|_| ())
    }
}
