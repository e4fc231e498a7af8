// ABOUTME: Loads every Kubernetes manifest found under an application directory.
// ABOUTME: YAML files may hold several documents; results are sorted by resource key.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::{Manifest, ManifestError};

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if is_manifest_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every document of a YAML file. Empty documents are skipped.
pub fn parse_manifests(file: &str, content: &str) -> Result<Vec<Manifest>, ManifestError> {
    let mut manifests = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(doc).map_err(|source| ManifestError::Parse {
            file: file.to_string(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        manifests.push(Manifest::from_value(value)?);
    }
    Ok(manifests)
}

/// Load the manifests of the application rooted at `dir`. Hidden files,
/// including the deployment configuration, are ignored.
pub async fn load_manifests(dir: &Path) -> Result<Vec<Manifest>, ManifestError> {
    let mut manifests = Vec::new();
    for file in collect_files(dir).await? {
        let content = tokio::fs::read_to_string(&file).await?;
        manifests.extend(parse_manifests(&file.display().to_string(), &content)?);
    }
    manifests.sort_by(|a, b| a.key.cmp(&b.key));
    tracing::debug!(dir = %dir.display(), count = manifests.len(), "loaded manifests");
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const APP: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
---
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: prod
---
"#;

    #[tokio::test]
    async fn loads_multi_document_files_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.yaml"), APP).unwrap();
        std::fs::create_dir(dir.path().join("extra")).unwrap();
        std::fs::write(
            dir.path().join("extra/cm.yml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        )
        .unwrap();
        std::fs::write(dir.path().join(".conveyor.yaml"), "kind: Kubernetes\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "not yaml").unwrap();

        let manifests = load_manifests(dir.path()).await.unwrap();
        let kinds: Vec<_> = manifests.iter().map(|m| m.key.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment", "ConfigMap", "Service"]);
        assert_eq!(manifests[2].key.namespace, "prod");
    }

    #[test]
    fn invalid_yaml_names_the_file() {
        let err = parse_manifests("bad.yaml", "kind: [").unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
