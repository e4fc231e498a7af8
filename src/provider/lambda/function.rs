// ABOUTME: Function manifest describing one serverless function and its image.
// ABOUTME: Read from the application directory at the deployed commit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::LambdaError;

pub const FUNCTION_MANIFEST_KIND: &str = "LambdaFunction";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionManifest {
    pub kind: String,
    pub api_version: String,
    pub spec: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    pub name: String,
    /// Container image holding the function code.
    #[serde(rename = "image")]
    pub image_uri: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub memory: Option<u32>,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub environments: BTreeMap<String, String>,
}

impl FunctionManifest {
    pub fn from_yaml(yaml: &str) -> Result<Self, LambdaError> {
        let fm: FunctionManifest =
            serde_yaml::from_str(yaml).map_err(|e| LambdaError::Manifest(e.to_string()))?;
        fm.validate()?;
        Ok(fm)
    }

    fn validate(&self) -> Result<(), LambdaError> {
        if self.kind != FUNCTION_MANIFEST_KIND {
            return Err(LambdaError::Manifest(format!(
                "kind must be {FUNCTION_MANIFEST_KIND}, got {}",
                self.kind
            )));
        }
        if self.spec.name.is_empty() {
            return Err(LambdaError::Manifest("spec.name is required".to_string()));
        }
        if self.spec.image_uri.is_empty() {
            return Err(LambdaError::Manifest("spec.image is required".to_string()));
        }
        Ok(())
    }

    /// Tag of the function image, used as the deployment version.
    pub fn image_tag(&self) -> Option<&str> {
        let image = self.spec.image_uri.rsplit('/').next()?;
        image.split_once(':').map(|(_, tag)| tag)
    }
}

pub async fn load_function_manifest(
    app_dir: &Path,
    file: &str,
) -> Result<FunctionManifest, LambdaError> {
    let content = tokio::fs::read_to_string(app_dir.join(file)).await?;
    FunctionManifest::from_yaml(&content)
}
