//! The context snapshotter (§4.10): a point-in-time cluster summary used
//! for triage — sampled workload health, an ownership breakdown, the most
//! recent Events, and a dependency graph scoped to whatever sampled
//! critical.

use jiff::SignedDuration;
use kube::core::DynamicObject;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::classifier::classify_object;
use crate::crossref::{extract_refs, RawRef};
use crate::kinds::api_resource_for;
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession, ListParams};

const RECENT_EVENT_WINDOW: SignedDuration = SignedDuration::from_secs(3600);
const MAX_RECENT_EVENTS: usize = 20;

const EVENT_COMPONENT_OWNERS: &[(&str, OwnerType)] = &[
    ("kustomize-controller", OwnerType::Flux),
    ("helm-controller", OwnerType::Flux),
    ("source-controller", OwnerType::Flux),
    ("argocd-application-controller", OwnerType::Argo),
    ("argocd-repo-server", OwnerType::Argo),
    ("crossplane", OwnerType::Crossplane),
];

fn classify_component(component: &str) -> Option<OwnerType> {
    EVENT_COMPONENT_OWNERS.iter().find(|(needle, _)| component.contains(needle)).map(|(_, owner)| *owner)
}

fn workload_health(value: &Value) -> WorkloadHealth {
    let desired = value.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
    if desired == 0 {
        return WorkloadHealth::Healthy;
    }
    let ready = value.pointer("/status/readyReplicas").and_then(Value::as_i64).unwrap_or(0);
    let available_false = value.pointer("/status/conditions").and_then(Value::as_array).is_some_and(|conds| {
        conds.iter().any(|c| c.get("type").and_then(Value::as_str) == Some("Available") && c.get("status").and_then(Value::as_str) == Some("False"))
    });

    if ready == 0 || available_false {
        WorkloadHealth::Critical
    } else if ready < desired {
        WorkloadHealth::Degraded
    } else {
        WorkloadHealth::Healthy
    }
}

fn to_ref(object: &DynamicObject) -> ResourceRef {
    let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    ResourceRef::namespaced(kind, object.metadata.name.clone().unwrap_or_default(), object.metadata.namespace.clone().unwrap_or_default())
}

async fn sample_workloads<S: ClusterSession>(session: &S, kind: &str, token: &CancellationToken) -> Result<Vec<(DynamicObject, WorkloadSummary)>> {
    let gvr = api_resource_for(kind)?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut out = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let ownership = classify_object(&object);
        let health = workload_health(&object.data);
        let summary = WorkloadSummary { resource: to_ref(&object), ownership, health };
        out.push((object, summary));
    }
    Ok(out)
}

fn event_to_summary(event: &Value) -> Option<EventSummary> {
    let involved = event.get("involvedObject")?;
    let resource = ResourceRef {
        kind: involved.get("kind").and_then(Value::as_str).unwrap_or_default().to_string(),
        name: involved.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        namespace: involved.get("namespace").and_then(Value::as_str).unwrap_or_default().to_string(),
        group: None,
        version: None,
    };
    let component = event.pointer("/source/component").and_then(Value::as_str).unwrap_or_default().to_string();
    let last_seen: Timestamp = event.get("lastTimestamp").or_else(|| event.get("eventTime")).and_then(Value::as_str).and_then(|s| s.parse().ok())?;
    Some(EventSummary {
        involved_object: resource,
        reason: event.get("reason").and_then(Value::as_str).unwrap_or_default().to_string(),
        message: event.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
        tool: classify_component(&component),
        component,
        last_seen,
    })
}

async fn recent_events<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<EventSummary>> {
    let gvr = api_resource_for("Event")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let now = Timestamp::now();
    let mut events: Vec<EventSummary> = objects.iter().filter_map(|o| event_to_summary(&o.data)).filter(|e| now.duration_since(e.last_seen) <= RECENT_EVENT_WINDOW).collect();
    events.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    events.truncate(MAX_RECENT_EVENTS);
    Ok(events)
}

fn dependency_edges_for(object: &DynamicObject, kind: &str) -> Vec<DependencyEdge> {
    let from = to_ref(object);
    extract_refs(object, kind)
        .into_iter()
        .map(|r: RawRef| DependencyEdge { to: ResourceRef::namespaced(r.kind, r.name, from.namespace.clone()), from: from.clone(), ref_type: r.ref_type.to_string() })
        .collect()
}

/// Build a point-in-time [`ContextSnapshot`] of the cluster.
pub async fn snapshot<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<ContextSnapshot> {
    let mut sampled = sample_workloads(session, "Deployment", token).await?;
    sampled.extend(sample_workloads(session, "StatefulSet", token).await?);
    sampled.extend(sample_workloads(session, "DaemonSet", token).await?);

    let mut ownership_breakdown: BTreeMap<OwnerType, usize> = BTreeMap::new();
    for (_, summary) in &sampled {
        *ownership_breakdown.entry(summary.ownership.owner_type).or_insert(0) += 1;
    }

    let mut dependency_edges = Vec::new();
    for (object, summary) in &sampled {
        if summary.health == WorkloadHealth::Critical {
            let kind = object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
            dependency_edges.extend(dependency_edges_for(object, kind));
        }
    }

    let recent_events = recent_events(session, token).await?;
    let workloads = sampled.into_iter().map(|(_, summary)| summary).collect();

    Ok(ContextSnapshot { workloads, ownership_breakdown, recent_events, dependency_edges })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_desired_replicas_is_healthy() {
        let value = serde_json::json!({"spec": {"replicas": 0}, "status": {}});
        assert_eq!(workload_health(&value), WorkloadHealth::Healthy);
    }

    #[test]
    fn no_ready_replicas_is_critical() {
        let value = serde_json::json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 0}});
        assert_eq!(workload_health(&value), WorkloadHealth::Critical);
    }

    #[test]
    fn partial_readiness_is_degraded() {
        let value = serde_json::json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 2}});
        assert_eq!(workload_health(&value), WorkloadHealth::Degraded);
    }

    #[test]
    fn available_false_condition_overrides_full_replica_count() {
        let value = serde_json::json!({
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3, "conditions": [{"type": "Available", "status": "False"}]},
        });
        assert_eq!(workload_health(&value), WorkloadHealth::Critical);
    }

    #[test]
    fn component_substrings_classify_to_owning_tool() {
        assert_eq!(classify_component("kustomize-controller"), Some(OwnerType::Flux));
        assert_eq!(classify_component("argocd-application-controller"), Some(OwnerType::Argo));
        assert_eq!(classify_component("kubelet"), None);
    }
}
