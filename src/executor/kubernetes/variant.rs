// ABOUTME: Generates canary and baseline variants of workloads and services.
// ABOUTME: Variants are renamed deep copies whose selectors only match their own pods.

use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};

use super::VARIANT_LABEL;
use crate::config::WorkloadRef;
use crate::provider::kubernetes::{KIND_DEPLOYMENT, Manifest, ManifestError};

const MATCH_LABELS: [&str; 3] = ["spec", "selector", "matchLabels"];
const POD_LABELS: [&str; 4] = ["spec", "template", "metadata", "labels"];

pub fn make_suffixed_name(name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        name.to_string()
    } else {
        format!("{name}-{suffix}")
    }
}

fn variant_labels(variant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(VARIANT_LABEL.to_string(), variant.to_string())])
}

/// Manifests of `kind`, optionally restricted to `name`.
pub fn find_manifests(kind: &str, name: Option<&str>, manifests: &[Manifest]) -> Vec<Manifest> {
    manifests
        .iter()
        .filter(|m| m.key.kind == kind)
        .filter(|m| name.is_none_or(|n| m.key.name == n))
        .cloned()
        .collect()
}

/// Workloads referenced by `refs`; every Deployment when `refs` is empty.
pub fn find_workload_manifests(manifests: &[Manifest], refs: &[WorkloadRef]) -> Vec<Manifest> {
    if refs.is_empty() {
        return find_manifests(KIND_DEPLOYMENT, None, manifests);
    }
    refs.iter()
        .flat_map(|r| {
            let kind = if r.kind.is_empty() {
                KIND_DEPLOYMENT
            } else {
                r.kind.as_str()
            };
            find_manifests(kind, Some(&r.name), manifests)
        })
        .collect()
}

pub fn find_config_map_manifests(manifests: &[Manifest]) -> Vec<Manifest> {
    manifests
        .iter()
        .filter(|m| m.key.is_config_map())
        .cloned()
        .collect()
}

pub fn find_secret_manifests(manifests: &[Manifest]) -> Vec<Manifest> {
    manifests
        .iter()
        .filter(|m| m.key.is_secret())
        .cloned()
        .collect()
}

pub fn duplicate_manifests(manifests: &[Manifest], suffix: &str) -> Vec<Manifest> {
    manifests
        .iter()
        .map(|m| m.duplicate(&make_suffixed_name(&m.key.name, suffix)))
        .collect()
}

/// ClusterIP copies of `services` selecting only pods of `variant`.
pub fn generate_variant_service_manifests(
    services: &[Manifest],
    variant: &str,
    suffix: &str,
) -> Result<Vec<Manifest>, ManifestError> {
    services
        .iter()
        .map(|m| {
            let mut s = m.duplicate(&make_suffixed_name(&m.key.name, suffix));
            s.set_nested(json!("ClusterIP"), &["spec", "type"])?;
            s.add_string_map_values(&variant_labels(variant), &["spec", "selector"])?;
            s.remove_nested(&["spec", "externalIPs"]);
            s.remove_nested(&["spec", "loadBalancerIP"]);
            s.remove_nested(&["spec", "loadBalancerSourceRanges"]);
            Ok(s)
        })
        .collect()
}

/// Variant copies of `workloads`. `replicas` maps the source replica count
/// (absent when unset) to the variant's. Volumes referring to one of the
/// duplicated config maps or secrets are pointed at the suffixed copy.
pub fn generate_variant_workload_manifests<F>(
    workloads: &[Manifest],
    config_maps: &[Manifest],
    secrets: &[Manifest],
    variant: &str,
    suffix: &str,
    replicas: F,
) -> Result<Vec<Manifest>, ManifestError>
where
    F: Fn(Option<u32>) -> u32,
{
    let cm_names: HashSet<&str> = config_maps.iter().map(|m| m.key.name.as_str()).collect();
    let secret_names: HashSet<&str> = secrets.iter().map(|m| m.key.name.as_str()).collect();
    let labels = variant_labels(variant);

    workloads
        .iter()
        .map(|m| {
            if !m.key.is_deployment() {
                return Err(ManifestError::UnsupportedKind(m.key.kind.clone()));
            }
            let mut d = m.duplicate(&make_suffixed_name(&m.key.name, suffix));
            let current = d
                .nested(&["spec", "replicas"])
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok());
            d.set_nested(json!(replicas(current)), &["spec", "replicas"])?;
            d.add_string_map_values(&labels, &MATCH_LABELS)?;
            d.add_string_map_values(&labels, &POD_LABELS)?;

            let volumes = d
                .nested_mut(&["spec", "template", "spec", "volumes"])
                .and_then(Value::as_array_mut);
            for volume in volumes.into_iter().flatten() {
                rename_volume_ref(volume, "/configMap/name", &cm_names, suffix);
                rename_volume_ref(volume, "/secret/secretName", &secret_names, suffix);
            }
            Ok(d)
        })
        .collect()
}

fn rename_volume_ref(volume: &mut Value, pointer: &str, names: &HashSet<&str>, suffix: &str) {
    let Some(field) = volume.pointer_mut(pointer) else {
        return;
    };
    let renamed = match field.as_str() {
        Some(name) if names.contains(name) => make_suffixed_name(name, suffix),
        _ => return,
    };
    *field = Value::String(renamed);
}

/// Verify both the selector and the pod template carry `variant`.
pub fn check_variant_selector_in_workload(
    m: &Manifest,
    variant: &str,
) -> Result<(), ManifestError> {
    for fields in [&MATCH_LABELS[..], &POD_LABELS[..]] {
        let path = fields.join(".");
        match m.nested_string_map(fields)?.get(VARIANT_LABEL) {
            None => {
                return Err(ManifestError::VariantSelector(format!(
                    "missing {VARIANT_LABEL} key in {path}"
                )));
            }
            Some(v) if v != variant => {
                return Err(ManifestError::VariantSelector(format!(
                    "require {variant} but got {v} for {VARIANT_LABEL} key in {path}"
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Label the pod template only, leaving the immutable selector alone.
pub fn add_variant_label_to_pods(m: &mut Manifest, variant: &str) -> Result<(), ManifestError> {
    m.add_string_map_values(&variant_labels(variant), &POD_LABELS)
}

pub fn ensure_variant_selector_in_workload(
    m: &mut Manifest,
    variant: &str,
) -> Result<(), ManifestError> {
    let labels = variant_labels(variant);
    m.add_string_map_values(&labels, &MATCH_LABELS)?;
    m.add_string_map_values(&labels, &POD_LABELS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Replicas;
    use crate::executor::kubernetes::{CANARY_VARIANT, PRIMARY_VARIANT};

    fn manifest(v: Value) -> Manifest {
        Manifest::from_value(v).unwrap()
    }

    fn web() -> Manifest {
        manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {
                "replicas": 10,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {
                    "metadata": {"labels": {"app": "web"}},
                    "spec": {
                        "volumes": [
                            {"name": "cfg", "configMap": {"name": "settings"}},
                            {"name": "ext", "configMap": {"name": "shared"}},
                            {"name": "creds", "secret": {"secretName": "token"}}
                        ]
                    }
                }
            }
        }))
    }

    fn config_map(name: &str) -> Manifest {
        manifest(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name}}))
    }

    fn secret(name: &str) -> Manifest {
        manifest(json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": name}}))
    }

    #[test]
    fn canary_workload_follows_replica_policy_and_variant_label() {
        let replicas = Replicas::parse("25%").unwrap();
        let generated = generate_variant_workload_manifests(
            &[web()],
            &[config_map("settings")],
            &[secret("token")],
            CANARY_VARIANT,
            "canary",
            |n| replicas.calculate(n),
        )
        .unwrap();
        let canary = &generated[0];

        assert_eq!(canary.key.name, "web-canary");
        assert_eq!(canary.nested(&["spec", "replicas"]), Some(&json!(3)));
        check_variant_selector_in_workload(canary, CANARY_VARIANT).unwrap();
        assert!(check_variant_selector_in_workload(canary, PRIMARY_VARIANT).is_err());

        let volumes = canary.nested(&["spec", "template", "spec", "volumes"]).unwrap();
        assert_eq!(volumes[0]["configMap"]["name"], "settings-canary");
        assert_eq!(volumes[1]["configMap"]["name"], "shared");
        assert_eq!(volumes[2]["secret"]["secretName"], "token-canary");
    }

    #[test]
    fn primary_and_canary_selectors_are_disjoint() {
        let mut primary = web();
        ensure_variant_selector_in_workload(&mut primary, PRIMARY_VARIANT).unwrap();
        let canary = generate_variant_workload_manifests(
            &[web()],
            &[],
            &[],
            CANARY_VARIANT,
            "canary",
            |_| 1,
        )
        .unwrap()
        .remove(0);

        let selects = |selector: &Manifest, pod: &Manifest| {
            let wanted = selector
                .nested_string_map(&["spec", "selector", "matchLabels"])
                .unwrap();
            let labels = pod
                .nested_string_map(&["spec", "template", "metadata", "labels"])
                .unwrap();
            wanted.iter().all(|(k, v)| labels.get(k) == Some(v))
        };
        assert!(selects(&primary, &primary));
        assert!(selects(&canary, &canary));
        assert!(!selects(&primary, &canary));
        assert!(!selects(&canary, &primary));
    }

    #[test]
    fn unset_replicas_count_as_one() {
        let mut w = web();
        w.remove_nested(&["spec", "replicas"]);
        let replicas = Replicas::parse("50%").unwrap();
        let generated =
            generate_variant_workload_manifests(&[w], &[], &[], "canary", "canary", |n| {
                replicas.calculate(n)
            })
            .unwrap();
        assert_eq!(generated[0].nested(&["spec", "replicas"]), Some(&json!(1)));
    }

    #[test]
    fn only_deployments_are_supported() {
        let sts = manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": {"name": "db"}
        }));
        let err = generate_variant_workload_manifests(&[sts], &[], &[], "canary", "canary", |_| 1)
            .unwrap_err();
        assert!(matches!(err, ManifestError::UnsupportedKind(k) if k == "StatefulSet"));
    }

    #[test]
    fn variant_service_is_cluster_internal() {
        let svc = manifest(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web"},
            "spec": {
                "type": "LoadBalancer",
                "selector": {"app": "web"},
                "externalIPs": ["10.0.0.1"],
                "loadBalancerIP": "1.2.3.4",
                "loadBalancerSourceRanges": ["0.0.0.0/0"]
            }
        }));
        let out = generate_variant_service_manifests(&[svc.clone()], "canary", "canary").unwrap();
        let s = &out[0];
        assert_eq!(s.key.name, "web-canary");
        assert_eq!(s.nested(&["spec", "type"]), Some(&json!("ClusterIP")));
        assert_eq!(
            s.nested(&["spec", "selector", VARIANT_LABEL]),
            Some(&json!("canary"))
        );
        assert!(s.nested(&["spec", "externalIPs"]).is_none());
        assert!(s.nested(&["spec", "loadBalancerIP"]).is_none());
        assert!(s.nested(&["spec", "loadBalancerSourceRanges"]).is_none());
        assert_eq!(svc.nested(&["spec", "type"]), Some(&json!("LoadBalancer")));
    }

    #[test]
    fn workload_refs_select_by_kind_and_name() {
        let manifests = vec![web(), web().duplicate("api"), config_map("settings")];
        assert_eq!(find_workload_manifests(&manifests, &[]).len(), 2);
        let refs = vec![WorkloadRef {
            kind: "Deployment".into(),
            name: "api".into(),
        }];
        let found = find_workload_manifests(&manifests, &refs);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.name, "api");
    }
}
