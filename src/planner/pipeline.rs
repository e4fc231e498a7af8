// ABOUTME: Builds pipeline stages from configuration, plus the hidden rollback stage.
// ABOUTME: Stages without explicit requires depend on the stage configured before them.

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use std::collections::BTreeMap;

use super::ROLLBACK_STAGE_ID;
use crate::config::StageConfig;
use crate::model::{PipelineStage, StageKind};
use crate::types::StageId;

pub const APPROVERS_METADATA_KEY: &str = "Approvers";

fn rollback_stage(at: DateTime<Utc>) -> PipelineStage {
    let mut stage = PipelineStage::new(ROLLBACK_STAGE_ID, StageKind::Rollback, 0, at);
    stage.desc = "Rollback the deployment".to_string();
    stage.predefined = true;
    stage.visible = false;
    stage
}

/// Metadata a stage starts with, derived from its configuration.
pub fn make_initial_stage_metadata(cfg: &StageConfig) -> BTreeMap<String, String> {
    match cfg.wait_approval_options() {
        Some(opts) if cfg.name == StageKind::WaitApproval => BTreeMap::from([(
            APPROVERS_METADATA_KEY.to_string(),
            opts.approvers.join(","),
        )]),
        _ => BTreeMap::new(),
    }
}

pub fn build_quick_sync_stages(
    sync: StageKind,
    auto_rollback: bool,
    at: DateTime<Utc>,
) -> Vec<PipelineStage> {
    let mut stage = PipelineStage::new("stage-0", sync, 0, at);
    stage.desc = "Sync by applying all manifests".to_string();
    stage.predefined = true;

    let mut stages = vec![stage];
    if auto_rollback {
        stages.push(rollback_stage(at));
    }
    stages
}

pub fn build_progressive_stages(
    configs: &NonEmpty<StageConfig>,
    auto_rollback: bool,
    at: DateTime<Utc>,
) -> Vec<PipelineStage> {
    let mut stages: Vec<PipelineStage> = Vec::with_capacity(configs.len() + 1);
    for (i, cfg) in configs.iter().enumerate() {
        let id = cfg.id.clone().unwrap_or_else(|| format!("stage-{i}"));
        let requires: Vec<StageId> = if cfg.requires.is_empty() {
            stages.last().map(|prev| prev.id.clone()).into_iter().collect()
        } else {
            cfg.requires.iter().map(StageId::new).collect()
        };

        let mut stage = PipelineStage::new(id, cfg.name, i as u32, at).requires(requires);
        stage.desc = cfg.desc.clone().unwrap_or_default();
        stage.metadata = make_initial_stage_metadata(cfg);
        stages.push(stage);
    }
    if auto_rollback {
        stages.push(rollback_stage(at));
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentConfig;

    fn stages(yaml: &str) -> NonEmpty<StageConfig> {
        DeploymentConfig::from_yaml(yaml).unwrap().pipeline.unwrap().stages
    }

    const PIPELINE: &str = r#"kind: Kubernetes
pipeline:
  stages:
    - name: K8S_CANARY_ROLLOUT
      with:
        replicas: 1
    - name: WAIT_APPROVAL
      with:
        approvers: [alice, bob]
    - id: promote
      name: K8S_PRIMARY_ROLLOUT
    - name: K8S_CANARY_CLEAN
      requires: [promote, stage-0]
"#;

    #[test]
    fn progressive_stages_chain_by_default() {
        let at = Utc::now();
        let built = build_progressive_stages(&stages(PIPELINE), true, at);
        let ids: Vec<_> = built.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["stage-0", "stage-1", "promote", "stage-3", "rollback"]);

        assert!(built[0].requires.is_empty());
        assert_eq!(built[1].requires, vec![StageId::new("stage-0")]);
        assert_eq!(built[2].requires, vec![StageId::new("stage-1")]);
        assert_eq!(
            built[3].requires,
            vec![StageId::new("promote"), StageId::new("stage-0")]
        );
        assert_eq!(
            built[1].metadata.get(APPROVERS_METADATA_KEY).map(String::as_str),
            Some("alice,bob")
        );

        let rollback = &built[4];
        assert!(rollback.is_rollback());
        assert!(!rollback.visible);
        assert!(rollback.predefined);
        assert!(built.iter().all(|s| s.created_at == at));
    }

    #[test]
    fn quick_sync_without_rollback() {
        let built = build_quick_sync_stages(StageKind::K8sSync, false, Utc::now());
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name, StageKind::K8sSync);
        assert!(built[0].predefined);
    }
}
