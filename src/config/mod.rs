// ABOUTME: Configuration types and parsing for .conveyor.yaml and the agent config.
// ABOUTME: Handles YAML parsing, stage option validation, and config discovery.

mod agent;
mod stage;

pub use agent::AgentConfig;
pub use stage::{
    BaselineRolloutStageOptions, CanaryRolloutStageOptions, MIN_APPROVAL_POLL_INTERVAL,
    PrimaryRolloutStageOptions,
    PromoteStageOptions, Replicas, StageConfig, StageOptions, TrafficRoutingStageOptions,
    WaitApprovalStageOptions, WaitStageOptions,
};

use crate::error::{Error, Result};
use crate::model::{ApplicationKind, StageKind};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILENAME: &str = ".conveyor.yaml";
pub const CONFIG_FILENAME_ALT: &str = ".conveyor.yml";

/// Per-application deployment configuration, read from the application
/// directory at the commit being deployed.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub kind: ApplicationKind,

    #[serde(default)]
    pub input: DeploymentInput,

    #[serde(default)]
    pub pipeline: Option<DeploymentPipeline>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentInput {
    /// Revert every stage's effect when one of them fails or is cancelled.
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,

    /// Workloads targeted by rollout stages. Empty means every Deployment.
    #[serde(default)]
    pub workloads: Vec<WorkloadRef>,

    /// Service switched by traffic routing. Defaults to the first Service.
    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub namespace: Option<String>,

    /// Named cloud provider for serverless applications.
    #[serde(default)]
    pub cloud_provider: Option<String>,

    #[serde(default = "default_function_manifest_file")]
    pub function_manifest_file: String,
}

impl Default for DeploymentInput {
    fn default() -> Self {
        DeploymentInput {
            auto_rollback: default_auto_rollback(),
            workloads: Vec::new(),
            service: None,
            namespace: None,
            cloud_provider: None,
            function_manifest_file: default_function_manifest_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadRef {
    #[serde(default = "default_workload_kind")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentPipeline {
    #[serde(deserialize_with = "deserialize_stages")]
    pub stages: NonEmpty<StageConfig>,
}

fn default_auto_rollback() -> bool {
    true
}

fn default_function_manifest_file() -> String {
    "function.yaml".to_string()
}

fn default_workload_kind() -> String {
    "Deployment".to_string()
}

impl DeploymentConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DeploymentConfig = serde_yaml::from_str(yaml).map_err(Error::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [dir.join(CONFIG_FILENAME), dir.join(CONFIG_FILENAME_ALT)];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Stage configuration at the given pipeline index.
    pub fn stage(&self, index: u32) -> Option<&StageConfig> {
        self.pipeline
            .as_ref()
            .and_then(|p| p.stages.iter().nth(index as usize))
    }

    /// The stage kind a quick sync uses for this application kind.
    pub fn quick_sync_stage(&self) -> StageKind {
        match self.kind {
            ApplicationKind::Kubernetes => StageKind::K8sSync,
            ApplicationKind::Lambda => StageKind::LambdaSync,
        }
    }

    fn validate(&self) -> Result<()> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        for stage in pipeline.stages.iter() {
            if !stage.name_fits(self.kind) {
                return Err(Error::InvalidConfig(format!(
                    "stage {} is not supported for {} applications",
                    stage.name, self.kind
                )));
            }
        }
        Ok(())
    }

    pub fn template(kind: ApplicationKind) -> String {
        match kind {
            ApplicationKind::Kubernetes => KUBERNETES_TEMPLATE.to_string(),
            ApplicationKind::Lambda => LAMBDA_TEMPLATE.to_string(),
        }
    }
}

const KUBERNETES_TEMPLATE: &str = r#"kind: Kubernetes
input:
  auto_rollback: true
pipeline:
  stages:
    - name: K8S_CANARY_ROLLOUT
      with:
        replicas: 10%
    - name: WAIT
      with:
        duration: 1m
    - name: K8S_PRIMARY_ROLLOUT
    - name: K8S_CANARY_CLEAN
"#;

const LAMBDA_TEMPLATE: &str = r#"kind: Lambda
input:
  cloud_provider: default
pipeline:
  stages:
    - name: LAMBDA_CANARY_ROLLOUT
    - name: LAMBDA_PROMOTE
      with:
        percent: 10
    - name: WAIT
      with:
        duration: 1m
    - name: LAMBDA_PROMOTE
      with:
        percent: 100
"#;

/// Write a template configuration into `dir`.
pub fn init_config(dir: &Path, kind: ApplicationKind, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, DeploymentConfig::template(kind))?;
    Ok(())
}

fn deserialize_stages<'de, D>(deserializer: D) -> std::result::Result<NonEmpty<StageConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let stages: Vec<StageConfig> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(stages)
        .ok_or_else(|| serde::de::Error::custom("pipeline must contain at least one stage"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_parse() {
        let k8s = DeploymentConfig::from_yaml(KUBERNETES_TEMPLATE).unwrap();
        assert_eq!(k8s.kind, ApplicationKind::Kubernetes);
        assert_eq!(k8s.pipeline.unwrap().stages.len(), 4);

        let lambda = DeploymentConfig::from_yaml(LAMBDA_TEMPLATE).unwrap();
        assert_eq!(lambda.kind, ApplicationKind::Lambda);
        assert_eq!(lambda.input.cloud_provider.as_deref(), Some("default"));
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        let yaml = "kind: Kubernetes\npipeline:\n  stages: []\n";
        assert!(DeploymentConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn foreign_stage_kind_is_rejected() {
        let yaml = "kind: Lambda\npipeline:\n  stages:\n    - name: K8S_SYNC\n";
        let err = DeploymentConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn stage_lookup_by_index() {
        let config = DeploymentConfig::from_yaml(KUBERNETES_TEMPLATE).unwrap();
        assert_eq!(config.stage(1).unwrap().name, StageKind::Wait);
        assert!(config.stage(9).is_none());
    }
}
