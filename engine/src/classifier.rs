//! The ownership classifier (§4.2): a pure function from labels/annotations
//! (plus ownerReferences, for the native-kind fallback only) to an
//! [`Ownership`]. Detection runs in a fixed priority order and returns on
//! the first match — the order is the specification, not an implementation
//! detail.

use std::collections::BTreeMap;

use kube::core::DynamicObject;

use crate::prelude::*;

/// One ownerReference, reduced to the fields the classifier needs.
#[derive(Clone, Debug, Default)]
pub struct OwnerRefInfo<'a> {
    /// `apiVersion` of the owner.
    pub api_version: &'a str,
    /// `kind` of the owner.
    pub kind: &'a str,
    /// `controller` flag, defaulting to `false` when absent.
    pub controller: bool,
}

fn get<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Classify ownership from labels, annotations, and ownerReferences.
///
/// Pure: takes no cluster session and performs no I/O.
pub fn classify(
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    owner_refs: &[OwnerRefInfo<'_>],
) -> Ownership {
    // 1. Flux
    if let Some(name) = get(labels, "kustomize.toolkit.fluxcd.io/name") {
        return Ownership {
            owner_type: OwnerType::Flux,
            sub_type: "kustomization".to_string(),
            name: Some(name.to_string()),
            namespace: get(labels, "kustomize.toolkit.fluxcd.io/namespace").map(str::to_string),
        };
    }
    if let Some(name) = get(labels, "helm.toolkit.fluxcd.io/name") {
        return Ownership {
            owner_type: OwnerType::Flux,
            sub_type: "helmrelease".to_string(),
            name: Some(name.to_string()),
            namespace: get(labels, "helm.toolkit.fluxcd.io/namespace").map(str::to_string),
        };
    }

    // 2. Argo
    let instance = get(labels, "app.kubernetes.io/instance");
    let argo_instance = get(labels, "argocd.argoproj.io/instance");
    if instance.is_some() && argo_instance.is_some() {
        let name = argo_instance.filter(|v| !v.is_empty()).or(instance).unwrap_or_default();
        return Ownership {
            owner_type: OwnerType::Argo,
            sub_type: "application".to_string(),
            name: Some(name.to_string()),
            namespace: None,
        };
    }
    if let Some(tracking_id) = get(annotations, "argocd.argoproj.io/tracking-id") {
        if let Some((app, _)) = tracking_id.split_once(':') {
            if !app.is_empty() {
                return Ownership {
                    owner_type: OwnerType::Argo,
                    sub_type: "application".to_string(),
                    name: Some(app.to_string()),
                    namespace: None,
                };
            }
        }
    }

    // 3. Helm
    if get(labels, "app.kubernetes.io/managed-by") == Some("Helm") {
        return Ownership {
            owner_type: OwnerType::Helm,
            sub_type: "release".to_string(),
            name: get(labels, "app.kubernetes.io/instance").map(str::to_string),
            namespace: None,
        };
    }
    if let Some(chart) = get(labels, "helm.sh/chart") {
        let name = instance.unwrap_or(chart);
        return Ownership {
            owner_type: OwnerType::Helm,
            sub_type: "release".to_string(),
            name: Some(name.to_string()),
            namespace: None,
        };
    }

    // 4. Terraform
    if get(annotations, "app.terraform.io/run-id").is_some() {
        return Ownership {
            owner_type: OwnerType::Terraform,
            sub_type: "workspace".to_string(),
            name: get(annotations, "app.terraform.io/workspace-name").map(str::to_string),
            namespace: None,
        };
    }
    if get(labels, "app.terraform.io/managed").is_some() {
        return Ownership {
            owner_type: OwnerType::Terraform,
            sub_type: "managed".to_string(),
            name: None,
            namespace: None,
        };
    }

    // 5. ConfigHub
    let unit_slug = get(labels, "confighub.com/UnitSlug").or_else(|| get(annotations, "confighub.com/UnitSlug"));
    if let Some(slug) = unit_slug {
        let space = get(annotations, "confighub.com/SpaceName").or_else(|| get(labels, "confighub.com/SpaceName"));
        return Ownership {
            owner_type: OwnerType::ConfigHub,
            sub_type: "unit".to_string(),
            name: Some(slug.to_string()),
            namespace: space.map(str::to_string),
        };
    }

    // 6. Crossplane
    if let Some(claim) = get(labels, "crossplane.io/claim-name") {
        return Ownership {
            owner_type: OwnerType::Crossplane,
            sub_type: "claim".to_string(),
            name: Some(claim.to_string()),
            namespace: get(labels, "crossplane.io/claim-namespace").map(str::to_string),
        };
    }
    if let Some(composite) = get(labels, "crossplane.io/composite") {
        return Ownership {
            owner_type: OwnerType::Crossplane,
            sub_type: "composite".to_string(),
            name: Some(composite.to_string()),
            namespace: None,
        };
    }
    if let Some(name) = get(annotations, "crossplane.io/composition-resource-name") {
        return Ownership {
            owner_type: OwnerType::Crossplane,
            sub_type: "managed-resource".to_string(),
            name: Some(name.to_string()),
            namespace: None,
        };
    }
    if let Some(owner) = owner_refs
        .iter()
        .find(|o| o.api_version.contains("crossplane.io") || o.api_version.contains("upbound.io"))
    {
        return Ownership {
            owner_type: OwnerType::Crossplane,
            sub_type: owner.kind.to_ascii_lowercase(),
            name: None,
            namespace: None,
        };
    }

    // 7. Native Kubernetes
    if !owner_refs.is_empty() {
        let owner = owner_refs.iter().find(|o| o.controller).unwrap_or(&owner_refs[0]);
        return Ownership {
            owner_type: OwnerType::K8s,
            sub_type: owner.kind.to_ascii_lowercase(),
            name: None,
            namespace: None,
        };
    }

    // 8. unknown
    Ownership::unknown()
}

/// Convenience wrapper extracting labels/annotations/ownerReferences from a
/// live cluster object before delegating to [`classify`].
pub fn classify_object(object: &DynamicObject) -> Ownership {
    let empty = BTreeMap::new();
    let labels = object.metadata.labels.as_ref().unwrap_or(&empty);
    let annotations = object.metadata.annotations.as_ref().unwrap_or(&empty);
    let owner_refs: Vec<OwnerRefInfo<'_>> = object
        .metadata
        .owner_references
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
        .unwrap_or_default();
    classify(labels, annotations, &owner_refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn flux_kustomization_outranks_helm_label() {
        let l = labels(&[
            ("kustomize.toolkit.fluxcd.io/name", "apps"),
            ("app.kubernetes.io/managed-by", "Helm"),
        ]);
        let owned = classify(&l, &BTreeMap::new(), &[]);
        assert_eq!(owned.owner_type, OwnerType::Flux);
        assert_eq!(owned.sub_type, "kustomization");
        assert_eq!(owned.name.as_deref(), Some("apps"));
    }

    #[test]
    fn argo_prefers_argo_specific_instance_label() {
        let l = labels(&[
            ("app.kubernetes.io/instance", "generic-name"),
            ("argocd.argoproj.io/instance", "argo-name"),
        ]);
        let owned = classify(&l, &BTreeMap::new(), &[]);
        assert_eq!(owned.owner_type, OwnerType::Argo);
        assert_eq!(owned.name.as_deref(), Some("argo-name"));
    }

    #[test]
    fn argo_tracking_id_fallback_parses_leading_field() {
        let a = labels(&[("argocd.argoproj.io/tracking-id", "guestbook:apps/Deployment:default/guestbook-ui")]);
        let owned = classify(&BTreeMap::new(), &a, &[]);
        assert_eq!(owned.owner_type, OwnerType::Argo);
        assert_eq!(owned.name.as_deref(), Some("guestbook"));
    }

    #[test]
    fn tracking_id_with_leading_colon_is_not_argo_ownership() {
        let a = labels(&[("argocd.argoproj.io/tracking-id", ":apps/Deployment:default/x")]);
        let owned = classify(&BTreeMap::new(), &a, &[]);
        assert!(owned.is_unknown());
    }

    #[test]
    fn helm_legacy_chart_label_falls_back_without_instance() {
        let l = labels(&[("helm.sh/chart", "nginx-1.2.3")]);
        let owned = classify(&l, &BTreeMap::new(), &[]);
        assert_eq!(owned.owner_type, OwnerType::Helm);
        assert_eq!(owned.name.as_deref(), Some("nginx-1.2.3"));
    }

    #[test]
    fn crossplane_claim_outranks_composite_and_owner_refs() {
        let l = labels(&[
            ("crossplane.io/claim-name", "my-claim"),
            ("crossplane.io/claim-namespace", "team-a"),
            ("crossplane.io/composite", "composite-x"),
        ]);
        let owned = classify(&l, &BTreeMap::new(), &[]);
        assert_eq!(owned.owner_type, OwnerType::Crossplane);
        assert_eq!(owned.sub_type, "claim");
        assert_eq!(owned.namespace.as_deref(), Some("team-a"));
    }

    #[test]
    fn native_fallback_prefers_controller_owner_ref() {
        let owners = vec![
            OwnerRefInfo { api_version: "apps/v1", kind: "ReplicaSet", controller: false },
            OwnerRefInfo { api_version: "apps/v1", kind: "Deployment", controller: true },
        ];
        let owned = classify(&BTreeMap::new(), &BTreeMap::new(), &owners);
        assert_eq!(owned.owner_type, OwnerType::K8s);
        assert_eq!(owned.sub_type, "deployment");
    }

    #[test]
    fn no_signals_at_all_is_unknown() {
        let owned = classify(&BTreeMap::new(), &BTreeMap::new(), &[]);
        assert!(owned.is_unknown());
    }
}
