//! Cross-reference detector (§4.5): finds ConfigMap/Secret references off a
//! workload or Pod that are owned by a different tool than the workload
//! itself — the only edges worth surfacing are real cross-owner ones.

use std::collections::BTreeSet;

use kube::core::DynamicObject;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::classifier::classify_object;
use crate::kinds::api_resource_for;
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession};

pub(crate) struct RawRef {
    pub(crate) kind: &'static str,
    pub(crate) name: String,
    pub(crate) ref_type: &'static str,
}

fn array_at(value: &Value, path: &str) -> Vec<Value> {
    value.pointer(path).and_then(Value::as_array).cloned().unwrap_or_default()
}

fn extract_container_refs(containers: &[Value]) -> Vec<RawRef> {
    let mut refs = Vec::new();
    for container in containers {
        for env_from in array_at(container, "/envFrom") {
            if let Some(name) = env_from.pointer("/configMapRef/name").and_then(Value::as_str) {
                refs.push(RawRef { kind: "ConfigMap", name: name.to_string(), ref_type: "envFrom.configMapRef" });
            }
            if let Some(name) = env_from.pointer("/secretRef/name").and_then(Value::as_str) {
                refs.push(RawRef { kind: "Secret", name: name.to_string(), ref_type: "envFrom.secretRef" });
            }
        }
        for env in array_at(container, "/env") {
            if let Some(name) = env.pointer("/valueFrom/configMapKeyRef/name").and_then(Value::as_str) {
                refs.push(RawRef { kind: "ConfigMap", name: name.to_string(), ref_type: "env.valueFrom.configMapKeyRef" });
            }
            if let Some(name) = env.pointer("/valueFrom/secretKeyRef/name").and_then(Value::as_str) {
                refs.push(RawRef { kind: "Secret", name: name.to_string(), ref_type: "env.valueFrom.secretKeyRef" });
            }
        }
    }
    refs
}

fn extract_volume_refs(volumes: &[Value]) -> Vec<RawRef> {
    let mut refs = Vec::new();
    for volume in volumes {
        if let Some(name) = volume.pointer("/configMap/name").and_then(Value::as_str) {
            refs.push(RawRef { kind: "ConfigMap", name: name.to_string(), ref_type: "volume.configMap" });
        }
        if let Some(name) = volume.pointer("/secret/secretName").and_then(Value::as_str) {
            refs.push(RawRef { kind: "Secret", name: name.to_string(), ref_type: "volume.secret" });
        }
        for source in array_at(volume, "/projected/sources") {
            if let Some(name) = source.pointer("/configMap/name").and_then(Value::as_str) {
                refs.push(RawRef { kind: "ConfigMap", name: name.to_string(), ref_type: "volume.projected.configMap" });
            }
            if let Some(name) = source.pointer("/secret/name").and_then(Value::as_str) {
                refs.push(RawRef { kind: "Secret", name: name.to_string(), ref_type: "volume.projected.secret" });
            }
        }
    }
    refs
}

fn pod_spec_pointer(kind: &str) -> &'static str {
    if kind == "Pod" {
        "/spec"
    } else {
        "/spec/template/spec"
    }
}

pub(crate) fn extract_refs(object: &DynamicObject, kind: &str) -> Vec<RawRef> {
    let Some(spec) = object.data.pointer(pod_spec_pointer(kind)) else {
        return Vec::new();
    };
    let mut containers = array_at(spec, "/containers");
    containers.extend(array_at(spec, "/initContainers"));
    let volumes = array_at(spec, "/volumes");

    let mut refs = extract_container_refs(&containers);
    refs.extend(extract_volume_refs(&volumes));

    let mut seen = BTreeSet::new();
    refs.retain(|r| seen.insert((r.kind, r.name.clone())));
    refs
}

/// Detect cross-owner references off `object` (a workload or Pod), whose
/// ownership has already been classified as `source_ownership`.
pub async fn detect_cross_references<S: ClusterSession>(
    session: &S,
    object: &DynamicObject,
    kind: &str,
    source_ownership: &Ownership,
    token: &CancellationToken,
) -> Result<Vec<CrossReference>> {
    let source_ref = ResourceRef::namespaced(kind, object.metadata.name.clone().unwrap_or_default(), object.metadata.namespace.clone().unwrap_or_default());
    let namespace = object.metadata.namespace.clone().unwrap_or_default();

    let mut out = Vec::new();
    for raw in extract_refs(object, kind) {
        check_cancelled(token)?;
        let Ok(gvr) = api_resource_for(raw.kind) else {
            continue;
        };
        let Some(target) = session.get(&gvr, &namespace, &raw.name, token).await? else {
            continue;
        };
        let target_ownership = classify_object(&target);
        if target_ownership.owner_type == source_ownership.owner_type {
            continue;
        }
        out.push(CrossReference {
            source: source_ref.clone(),
            target: ResourceRef::namespaced(raw.kind, raw.name, namespace.clone()),
            ref_type: raw.ref_type.to_string(),
            status: ReferenceStatus::Exists,
            target_ownership: Some(target_ownership),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_dedupes_references_from_a_deployment() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "app", "namespace": "demo"},
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": "app",
                            "envFrom": [{"configMapRef": {"name": "shared-config"}}],
                            "env": [{"name": "X", "valueFrom": {"secretKeyRef": {"name": "shared-secret"}}}],
                        }],
                        "volumes": [
                            {"name": "cfg", "configMap": {"name": "shared-config"}},
                        ],
                    }
                }
            }
        }))
        .unwrap();
        let refs = extract_refs(&object, "Deployment");
        assert_eq!(refs.len(), 2, "shared-config referenced twice dedupes to one entry");
        assert!(refs.iter().any(|r| r.kind == "ConfigMap" && r.name == "shared-config"));
        assert!(refs.iter().any(|r| r.kind == "Secret" && r.name == "shared-secret"));
    }

    #[test]
    fn pod_reads_spec_directly_not_a_template() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p", "namespace": "demo"},
            "spec": {
                "containers": [{"name": "c", "envFrom": [{"secretRef": {"name": "s"}}]}],
            }
        }))
        .unwrap();
        let refs = extract_refs(&object, "Pod");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "Secret");
    }
}
