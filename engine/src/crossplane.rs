//! The Crossplane lineage resolver (§4.6): purely local, resolving a
//! managed-resource → composite → optional-claim lineage from labels,
//! annotations, and a caller-supplied set of candidate objects.

use kube::core::DynamicObject;

use crate::classifier::classify_object;
use crate::prelude::*;

fn find_by_name<'a>(candidates: &'a [DynamicObject], name: &str) -> Option<&'a DynamicObject> {
    candidates.iter().find(|o| o.metadata.name.as_deref() == Some(name))
}

fn to_ref(object: &DynamicObject) -> ResourceRef {
    let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    ResourceRef {
        kind,
        name: object.metadata.name.clone().unwrap_or_default(),
        namespace: object.metadata.namespace.clone().unwrap_or_default(),
        group: None,
        version: None,
    }
}

/// Resolve the Crossplane lineage of `target`, against `candidates` as the
/// index of objects the composite/claim might be found in.
///
/// Returns `None` when `target`'s ownership is not Crossplane.
pub fn resolve_lineage(target: &DynamicObject, candidates: &[DynamicObject]) -> Option<CrossplaneLineage> {
    let ownership = classify_object(target);
    if ownership.owner_type != OwnerType::Crossplane {
        return None;
    }

    let labels = target.metadata.labels.clone().unwrap_or_default();
    let mut evidence = Vec::new();

    let composite_name = labels.get("crossplane.io/composite").cloned();
    let composite = if let Some(name) = &composite_name {
        evidence.push("label:crossplane.io/composite".to_string());
        Some(name.clone())
    } else if let Some(owner) = target
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.api_version.contains("crossplane.io") || r.api_version.contains("upbound.io")))
    {
        evidence.push(format!("ownerRef:{}/{}", owner.api_version, owner.kind));
        Some(owner.name.clone())
    } else {
        None
    };

    let composite_object = composite.as_deref().and_then(|name| find_by_name(candidates, name));
    let composite_node = composite.as_ref().map(|name| match composite_object {
        Some(obj) => LineageNode { resource: to_ref(obj), present: true },
        None => LineageNode {
            resource: ResourceRef::cluster_scoped("Composite", name.clone()),
            present: false,
        },
    });
    if composite.is_some() && composite_object.is_none() {
        evidence.push("xr:unresolved".to_string());
    }

    let claim_source = composite_object.map(|o| o.metadata.labels.clone().unwrap_or_default()).unwrap_or_else(|| labels.clone());
    let claim_name = claim_source.get("crossplane.io/claim-name").or_else(|| labels.get("crossplane.io/claim-name")).cloned();
    let claim = claim_name.map(|name| {
        evidence.push("label:crossplane.io/claim-name".to_string());
        let namespace = claim_source
            .get("crossplane.io/claim-namespace")
            .or_else(|| labels.get("crossplane.io/claim-namespace"))
            .cloned()
            .unwrap_or_default();
        match candidates
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some(name.as_str()) && o.metadata.namespace.as_deref().unwrap_or_default() == namespace)
        {
            Some(obj) => LineageNode { resource: to_ref(obj), present: true },
            None => LineageNode {
                resource: ResourceRef::namespaced("Claim", name, namespace),
                present: false,
            },
        }
    });

    Some(CrossplaneLineage {
        managed: LineageNode { resource: to_ref(target), present: true },
        composite: composite_node,
        claim,
        evidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(kind: &str, name: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let labels: BTreeMap<String, String> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        serde_json::from_value(serde_json::json!({
            "apiVersion": "example.org/v1",
            "kind": kind,
            "metadata": {"name": name, "labels": labels},
        }))
        .unwrap()
    }

    #[test]
    fn non_crossplane_target_yields_no_lineage() {
        let target = object("Deployment", "app", &[]);
        assert!(resolve_lineage(&target, &[]).is_none());
    }

    #[test]
    fn resolves_composite_and_claim_when_present_in_candidates() {
        let composite = object("XBucket", "xbucket-abc", &[("crossplane.io/claim-name", "my-bucket"), ("crossplane.io/claim-namespace", "team-a")]);
        let claim = {
            let mut c = object("Bucket", "my-bucket", &[]);
            c.metadata.namespace = Some("team-a".to_string());
            c
        };
        let target = object("Bucket", "managed-bucket", &[("crossplane.io/composite", "xbucket-abc")]);
        let lineage = resolve_lineage(&target, &[composite, claim]).unwrap();
        assert!(lineage.composite.unwrap().present);
        assert!(lineage.claim.unwrap().present);
        assert!(lineage.evidence.contains(&"label:crossplane.io/composite".to_string()));
    }

    #[test]
    fn unresolved_composite_is_marked_absent_with_evidence() {
        let target = object("Bucket", "managed-bucket", &[("crossplane.io/composite", "xbucket-missing")]);
        let lineage = resolve_lineage(&target, &[]).unwrap();
        assert!(!lineage.composite.unwrap().present);
        assert!(lineage.evidence.contains(&"xr:unresolved".to_string()));
    }
}
