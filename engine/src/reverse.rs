//! The reverse tracer (§4.4): walks `ownerReferences` upward from an
//! arbitrary object to its top-of-chain owner, then classifies that owner.

use kube::core::{DynamicObject, ObjectMeta};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::classifier::{classify, OwnerRefInfo};
use crate::kinds::api_resource_for_owner;
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession};

const LAST_APPLIED_CONFIG_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

fn condition_true(value: &Value, kind: &str) -> Option<bool> {
    let conditions = value.pointer("/status/conditions")?.as_array()?;
    conditions.iter().find_map(|c| {
        let ty = c.get("type")?.as_str()?;
        if ty != kind {
            return None;
        }
        Some(c.get("status")?.as_str()? == "True")
    })
}

fn replica_ready(value: &Value) -> Option<bool> {
    let status = value.pointer("/status")?;
    let replicas = status.get("replicas")?.as_i64()?;
    let ready_replicas = status.get("readyReplicas")?.as_i64().unwrap_or(0);
    Some(replicas > 0 && ready_replicas == replicas)
}

fn phase_ready(value: &Value) -> Option<bool> {
    let phase = value.pointer("/status/phase")?.as_str()?;
    Some(matches!(phase, "Running" | "Succeeded"))
}

/// Derive readiness from an object's status, per §4.4's fallback chain:
/// a true `Ready`/`Available` condition, else replica math, else phase,
/// else default to ready.
fn derive_readiness(value: &Value) -> bool {
    condition_true(value, "Ready")
        .or_else(|| condition_true(value, "Available"))
        .or_else(|| replica_ready(value))
        .or_else(|| phase_ready(value))
        .unwrap_or(true)
}

fn to_link(object: &DynamicObject) -> ChainLink {
    let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    let name = object.metadata.name.clone().unwrap_or_default();
    let namespace = object.metadata.namespace.clone().unwrap_or_default();
    let ready = derive_readiness(&object.data);
    ChainLink {
        kind,
        name,
        namespace,
        ready,
        status: String::new(),
        status_reason: None,
        revision: None,
        path: None,
        url: None,
        last_transition_time: None,
        message: None,
        children: Vec::new(),
        oci_source: None,
    }
}

fn owner_refs(meta: &ObjectMeta) -> Vec<OwnerRefInfo<'_>> {
    meta.owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .map(|r| OwnerRefInfo {
                    api_version: r.api_version.as_str(),
                    kind: r.kind.as_str(),
                    controller: r.controller.unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn pick_owner_ref(meta: &ObjectMeta) -> Option<(String, String)> {
    let refs = meta.owner_references.as_ref()?;
    let chosen = refs.iter().find(|r| r.controller.unwrap_or(false)).or_else(|| refs.first())?;
    Some((chosen.api_version.clone(), chosen.kind.clone()))
}

fn orphan_metadata(object: &DynamicObject) -> OrphanMetadata {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    let mut annotations = object.metadata.annotations.clone().unwrap_or_default();
    let last_applied_configuration = annotations.remove(LAST_APPLIED_CONFIG_ANNOTATION);
    let created_at = object.metadata.creation_timestamp.as_ref().map(|t| t.0);
    OrphanMetadata {
        labels,
        annotations,
        last_applied_configuration,
        created_at,
    }
}

/// Walk `ownerReferences` upward from `resource`, building a chain from the
/// starting object to its top-of-chain owner, then classify that owner.
///
/// Never errors on a broken link: an owner that cannot be resolved or
/// fetched simply terminates the chain, per the ResourceLookup class in
/// the error taxonomy.
pub async fn reverse_trace<S: ClusterSession>(
    session: &S,
    start: &kube::core::ApiResource,
    namespace: &str,
    name: &str,
    token: &CancellationToken,
) -> Result<ReverseTraceResult> {
    check_cancelled(token)?;
    let Some(mut current) = session.get(start, namespace, name, token).await? else {
        return Ok(ReverseTraceResult {
            chain: Vec::new(),
            owner: "unknown".to_string(),
            orphan: None,
        });
    };

    let mut chain = vec![to_link(&current)];

    loop {
        check_cancelled(token)?;
        let Some((api_version, kind)) = pick_owner_ref(&current.metadata) else { break };
        let Ok(gvr) = api_resource_for_owner(&api_version, &kind) else { break };
        let owner_namespace = if gvr.group.is_empty() && kind == "Namespace" { "" } else { current.metadata.namespace.as_deref().unwrap_or("") };
        let owner_name = current
            .metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.iter().find(|r| r.api_version == api_version && r.kind == kind))
            .map(|r| r.name.clone())
            .unwrap_or_default();

        match session.get(&gvr, owner_namespace, &owner_name, token).await {
            Ok(Some(owner)) => {
                chain.push(to_link(&owner));
                current = owner;
            }
            _ => break,
        }
    }

    let labels = current.metadata.labels.clone().unwrap_or_default();
    let annotations = current.metadata.annotations.clone().unwrap_or_default();
    let owned = classify(&labels, &annotations, &owner_refs(&current.metadata));

    let owner_str = match owned.owner_type {
        OwnerType::Flux => "flux",
        OwnerType::Argo => "argo",
        OwnerType::Helm => "helm",
        OwnerType::ConfigHub => "confighub",
        OwnerType::Terraform => "terraform",
        OwnerType::Crossplane => "crossplane",
        OwnerType::K8s => "native",
        OwnerType::Unknown => "unknown",
    };

    let orphan = if owner_str == "native" { Some(orphan_metadata(&current)) } else { None };

    Ok(ReverseTraceResult {
        chain,
        owner: owner_str.to_string(),
        orphan,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ready_condition_true_wins_over_replica_math() {
        let value = json!({
            "status": {
                "conditions": [{"type": "Ready", "status": "True"}],
                "replicas": 3,
                "readyReplicas": 0,
            }
        });
        assert!(derive_readiness(&value));
    }

    #[test]
    fn falls_back_to_replica_math_without_conditions() {
        let value = json!({"status": {"replicas": 3, "readyReplicas": 3}});
        assert!(derive_readiness(&value));
        let value = json!({"status": {"replicas": 3, "readyReplicas": 1}});
        assert!(!derive_readiness(&value));
    }

    #[test]
    fn falls_back_to_phase_when_no_replicas_or_conditions() {
        let value = json!({"status": {"phase": "Running"}});
        assert!(derive_readiness(&value));
        let value = json!({"status": {"phase": "Pending"}});
        assert!(!derive_readiness(&value));
    }

    #[test]
    fn unknown_shape_defaults_to_ready() {
        assert!(derive_readiness(&json!({})));
    }
}
