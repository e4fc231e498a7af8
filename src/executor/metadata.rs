// ABOUTME: Key/value metadata shared between the stages of one deployment.
// ABOUTME: Writes go through the deployment store before becoming visible locally.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::model::Deployment;
use crate::store::{DeploymentStore, StoreError};
use crate::types::{DeploymentId, StageId};

/// Deployment-wide and per-stage metadata. Cloning shares the same view.
#[derive(Clone)]
pub struct MetadataStore {
    deployment: DeploymentId,
    store: Arc<dyn DeploymentStore>,
    shared: Arc<RwLock<BTreeMap<String, String>>>,
    stages: Arc<RwLock<HashMap<StageId, BTreeMap<String, String>>>>,
}

impl MetadataStore {
    pub fn new(deployment: &Deployment, store: Arc<dyn DeploymentStore>) -> Self {
        let stages = deployment
            .stages
            .iter()
            .map(|s| (s.id.clone(), s.metadata.clone()))
            .collect();
        Self {
            deployment: deployment.id.clone(),
            store,
            shared: Arc::new(RwLock::new(deployment.metadata.clone())),
            stages: Arc::new(RwLock::new(stages)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.shared.read().get(key).cloned()
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_multi(BTreeMap::from([(key.to_string(), value.to_string())]))
            .await
    }

    pub async fn set_multi(&self, values: BTreeMap<String, String>) -> Result<(), StoreError> {
        self.store
            .put_deployment_metadata(&self.deployment, values.clone())
            .await?;
        self.shared.write().extend(values);
        Ok(())
    }

    pub fn stage_get(&self, stage: &StageId, key: &str) -> Option<String> {
        self.stages
            .read()
            .get(stage)
            .and_then(|m| m.get(key).cloned())
    }

    pub async fn stage_set(
        &self,
        stage: &StageId,
        values: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.store
            .put_deployment_stage_metadata(&self.deployment, stage, values.clone())
            .await?;
        self.stages
            .write()
            .entry(stage.clone())
            .or_default()
            .extend(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests_support::sample_deployment;
    use crate::model::{ApplicationKind, PipelineStage, StageKind};
    use crate::store::InMemoryDeploymentStore;
    use chrono::Utc;

    #[tokio::test]
    async fn writes_are_persisted_and_visible() {
        let store = Arc::new(InMemoryDeploymentStore::new());
        let mut d = sample_deployment(ApplicationKind::Lambda);
        d.stages = vec![PipelineStage::new("s", StageKind::Wait, 0, Utc::now())];
        store.add_deployment(&d).await.unwrap();

        let md = MetadataStore::new(&d, store.clone());
        md.set("fn-rollout", "3").await.unwrap();
        md.stage_set(
            &StageId::new("s"),
            BTreeMap::from([("Approvers".into(), "alice".into())]),
        )
        .await
        .unwrap();

        assert_eq!(md.get("fn-rollout").as_deref(), Some("3"));
        assert_eq!(
            md.stage_get(&StageId::new("s"), "Approvers").as_deref(),
            Some("alice")
        );
        let stored = store.get_deployment(&d.id).await.unwrap();
        assert_eq!(stored.metadata.get("fn-rollout").map(String::as_str), Some("3"));
        assert_eq!(stored.stages[0].metadata.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_keys_all_land() {
        let store = Arc::new(InMemoryDeploymentStore::new());
        let mut d = sample_deployment(ApplicationKind::Kubernetes);
        d.stages = vec![PipelineStage::new("s", StageKind::Wait, 0, Utc::now())];
        store.add_deployment(&d).await.unwrap();
        let md = MetadataStore::new(&d, store.clone());
        let stage = StageId::new("s");

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let md = md.clone();
            let stage = stage.clone();
            tasks.spawn(async move {
                md.set(&format!("k{i}"), &i.to_string()).await.unwrap();
                md.stage_set(&stage, BTreeMap::from([(format!("s{i}"), i.to_string())]))
                    .await
                    .unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let stored = store.get_deployment(&d.id).await.unwrap();
        assert_eq!(stored.metadata.len(), 32);
        assert_eq!(stored.stages[0].metadata.len(), 32);
        for i in 0..32 {
            let value = i.to_string();
            assert_eq!(stored.metadata.get(&format!("k{i}")), Some(&value));
            assert_eq!(md.get(&format!("k{i}")), Some(value.clone()));
            assert_eq!(md.stage_get(&stage, &format!("s{i}")), Some(value));
        }
    }
}
