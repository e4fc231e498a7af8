// ABOUTME: In-memory Kubernetes manifest with a stable resource key.
// ABOUTME: Duplicates are deep copies; editing one never touches the original.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::{DEFAULT_NAMESPACE, KIND_CONFIG_MAP, KIND_DEPLOYMENT, KIND_SECRET, KIND_SERVICE};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is missing {0}")]
    MissingField(&'static str),

    #[error("field {0} is not a map")]
    NotAMap(String),

    #[error("unsupported workload kind {0}")]
    UnsupportedKind(String),

    #[error("{0}")]
    VariantSelector(String),

    #[error("invalid resource key: {0}")]
    InvalidKey(String),

    #[error("failed to parse manifest in {file}: {source}")]
    Parse {
        file: String,
        source: serde_yaml::Error,
    },

    #[error("failed to encode manifest: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of one cluster resource. Ordering is the manifest sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn readable(&self) -> String {
        format!(
            "name=\"{}\", kind=\"{}\", namespace=\"{}\", apiVersion=\"{}\"",
            self.name, self.kind, self.namespace, self.api_version
        )
    }

    pub fn is_deployment(&self) -> bool {
        self.kind == KIND_DEPLOYMENT
    }

    pub fn is_service(&self) -> bool {
        self.kind == KIND_SERVICE
    }

    pub fn is_config_map(&self) -> bool {
        self.kind == KIND_CONFIG_MAP
    }

    pub fn is_secret(&self) -> bool {
        self.kind == KIND_SECRET
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.api_version, self.kind, self.namespace, self.name
        )
    }
}

impl FromStr for ResourceKey {
    type Err = ManifestError;

    // apiVersion may itself contain a slash but never a colon.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [api_version, kind, namespace, name] if !kind.is_empty() && !name.is_empty() => {
                Ok(ResourceKey {
                    api_version: api_version.to_string(),
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ManifestError::InvalidKey(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub key: ResourceKey,
    body: Value,
}

impl Manifest {
    pub fn from_value(body: Value) -> Result<Self, ManifestError> {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
        let api_version =
            text(body.get("apiVersion")).ok_or(ManifestError::MissingField("apiVersion"))?;
        let kind = text(body.get("kind")).ok_or(ManifestError::MissingField("kind"))?;
        let metadata = body.get("metadata");
        let name = text(metadata.and_then(|m| m.get("name")))
            .ok_or(ManifestError::MissingField("metadata.name"))?;
        let namespace = text(metadata.and_then(|m| m.get("namespace")))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Ok(Self {
            key: ResourceKey {
                api_version,
                kind,
                namespace,
                name,
            },
            body,
        })
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// A deep copy renamed to `name`.
    pub fn duplicate(&self, name: &str) -> Manifest {
        let mut copy = self.clone();
        copy.key.name = name.to_string();
        if let Some(metadata) = copy.body.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("name".to_string(), Value::String(name.to_string()));
        }
        copy
    }

    /// Move the resource into `namespace`.
    pub fn set_namespace(&mut self, namespace: &str) {
        self.key.namespace = namespace.to_string();
        if let Some(metadata) = self.body.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert(
                "namespace".to_string(),
                Value::String(namespace.to_string()),
            );
        }
    }

    pub fn add_annotations(&mut self, annotations: &BTreeMap<String, String>) {
        // metadata always exists once the key was parsed.
        let _ = self.add_string_map_values(annotations, &["metadata", "annotations"]);
    }

    /// Merge `values` into the string map at `fields`, creating missing maps.
    pub fn add_string_map_values(
        &mut self,
        values: &BTreeMap<String, String>,
        fields: &[&str],
    ) -> Result<(), ManifestError> {
        let target = nested_map_mut(&mut self.body, fields)?;
        for (k, v) in values {
            target.insert(k.clone(), Value::String(v.clone()));
        }
        Ok(())
    }

    /// The string map at `fields`; missing paths yield an empty map.
    pub fn nested_string_map(
        &self,
        fields: &[&str],
    ) -> Result<BTreeMap<String, String>, ManifestError> {
        let Some(value) = self.nested(fields) else {
            return Ok(BTreeMap::new());
        };
        let map = value
            .as_object()
            .ok_or_else(|| ManifestError::NotAMap(fields.join(".")))?;
        Ok(map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect())
    }

    pub fn nested(&self, fields: &[&str]) -> Option<&Value> {
        fields.iter().try_fold(&self.body, |v, f| v.get(*f))
    }

    pub fn nested_mut(&mut self, fields: &[&str]) -> Option<&mut Value> {
        fields.iter().try_fold(&mut self.body, |v, f| v.get_mut(*f))
    }

    /// Set the value at `fields`, creating intermediate maps.
    pub fn set_nested(&mut self, value: Value, fields: &[&str]) -> Result<(), ManifestError> {
        let Some((last, parents)) = fields.split_last() else {
            self.body = value;
            return Ok(());
        };
        nested_map_mut(&mut self.body, parents)?.insert(last.to_string(), value);
        Ok(())
    }

    pub fn remove_nested(&mut self, fields: &[&str]) {
        let Some((last, parents)) = fields.split_last() else {
            return;
        };
        if let Some(map) = self.nested_mut(parents).and_then(Value::as_object_mut) {
            map.remove(*last);
        }
    }

    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml::to_string(&self.body)?)
    }
}

fn nested_map_mut<'a>(
    mut value: &'a mut Value,
    fields: &[&str],
) -> Result<&'a mut Map<String, Value>, ManifestError> {
    for (i, field) in fields.iter().enumerate() {
        let map = value
            .as_object_mut()
            .ok_or_else(|| ManifestError::NotAMap(fields[..i].join(".")))?;
        value = map
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if value.is_null() {
            *value = Value::Object(Map::new());
        }
    }
    value
        .as_object_mut()
        .ok_or_else(|| ManifestError::NotAMap(fields.join(".")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "labels": {"app": "web"}},
            "spec": {
                "replicas": 4,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"metadata": {"labels": {"app": "web"}}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn key_defaults_namespace() {
        let m = deployment();
        assert_eq!(m.key.namespace, "default");
        assert_eq!(m.key.to_string(), "apps/v1:Deployment:default:web");
        assert_eq!(m.key.to_string().parse::<ResourceKey>().unwrap(), m.key);
    }

    #[test]
    fn duplicate_is_deep() {
        let original = deployment();
        let snapshot = original.to_yaml().unwrap();
        let mut copy = original.duplicate("web-canary");
        copy.add_string_map_values(
            &BTreeMap::from([("track".into(), "canary".into())]),
            &["spec", "template", "metadata", "labels"],
        )
        .unwrap();
        copy.set_nested(json!(1), &["spec", "replicas"]).unwrap();

        assert_eq!(copy.key.name, "web-canary");
        assert_eq!(original.key.name, "web");
        assert_eq!(original.to_yaml().unwrap(), snapshot);
    }

    #[test]
    fn nested_string_map_of_missing_path_is_empty() {
        let m = deployment();
        assert!(m.nested_string_map(&["spec", "nothing"]).unwrap().is_empty());
        assert_eq!(
            m.nested_string_map(&["spec", "selector", "matchLabels"])
                .unwrap()
                .get("app")
                .map(String::as_str),
            Some("web")
        );
        assert!(m.nested_string_map(&["spec", "replicas"]).is_err());
    }

    #[test]
    fn missing_kind_is_rejected() {
        let err = Manifest::from_value(json!({"apiVersion": "v1", "metadata": {"name": "x"}}))
            .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("kind")));
    }
}
