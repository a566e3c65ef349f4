//! The closed kind-alias table (§4.1): plural/short aliases resolve to one
//! canonical kind, and canonical kinds resolve to the `ApiResource` the
//! dynamic client needs.

use kube::core::ApiResource;

use crate::{Error, Result};

/// One entry in the static kind table.
struct KindEntry {
    kind: &'static str,
    group: &'static str,
    version: &'static str,
    plural: &'static str,
    aliases: &'static [&'static str],
}

const KINDS: &[KindEntry] = &[
    KindEntry { kind: "Pod", group: "", version: "v1", plural: "pods", aliases: &["pod", "pods", "po"] },
    KindEntry { kind: "Deployment", group: "apps", version: "v1", plural: "deployments", aliases: &["deploy", "deployment", "deployments"] },
    KindEntry { kind: "ReplicaSet", group: "apps", version: "v1", plural: "replicasets", aliases: &["rs", "replicaset", "replicasets"] },
    KindEntry { kind: "StatefulSet", group: "apps", version: "v1", plural: "statefulsets", aliases: &["sts", "statefulset", "statefulsets"] },
    KindEntry { kind: "DaemonSet", group: "apps", version: "v1", plural: "daemonsets", aliases: &["ds", "daemonset", "daemonsets"] },
    KindEntry { kind: "Job", group: "batch", version: "v1", plural: "jobs", aliases: &["job", "jobs"] },
    KindEntry { kind: "CronJob", group: "batch", version: "v1", plural: "cronjobs", aliases: &["cj", "cronjob", "cronjobs"] },
    KindEntry { kind: "Service", group: "", version: "v1", plural: "services", aliases: &["svc", "service", "services"] },
    KindEntry { kind: "Ingress", group: "networking.k8s.io", version: "v1", plural: "ingresses", aliases: &["ing", "ingress", "ingresses"] },
    KindEntry { kind: "NetworkPolicy", group: "networking.k8s.io", version: "v1", plural: "networkpolicies", aliases: &["netpol", "networkpolicy", "networkpolicies"] },
    KindEntry { kind: "ConfigMap", group: "", version: "v1", plural: "configmaps", aliases: &["cm", "configmap", "configmaps"] },
    KindEntry { kind: "Secret", group: "", version: "v1", plural: "secrets", aliases: &["secret", "secrets"] },
    KindEntry { kind: "PersistentVolumeClaim", group: "", version: "v1", plural: "persistentvolumeclaims", aliases: &["pvc", "persistentvolumeclaim", "persistentvolumeclaims"] },
    KindEntry { kind: "Namespace", group: "", version: "v1", plural: "namespaces", aliases: &["ns", "namespace", "namespaces"] },
    KindEntry { kind: "Event", group: "", version: "v1", plural: "events", aliases: &["ev", "event", "events"] },
    KindEntry { kind: "ResourceQuota", group: "", version: "v1", plural: "resourcequotas", aliases: &["quota", "resourcequota", "resourcequotas"] },
    KindEntry { kind: "HorizontalPodAutoscaler", group: "autoscaling", version: "v2", plural: "horizontalpodautoscalers", aliases: &["hpa", "horizontalpodautoscaler", "horizontalpodautoscalers"] },
    KindEntry { kind: "VerticalPodAutoscaler", group: "autoscaling.k8s.io", version: "v1", plural: "verticalpodautoscalers", aliases: &["vpa", "verticalpodautoscaler", "verticalpodautoscalers"] },
    KindEntry { kind: "PodDisruptionBudget", group: "policy", version: "v1", plural: "poddisruptionbudgets", aliases: &["pdb", "poddisruptionbudget", "poddisruptionbudgets"] },
    // Flux
    KindEntry { kind: "GitRepository", group: "source.toolkit.fluxcd.io", version: "v1", plural: "gitrepositories", aliases: &["gitrepository", "gitrepositories"] },
    KindEntry { kind: "OCIRepository", group: "source.toolkit.fluxcd.io", version: "v1beta2", plural: "ocirepositories", aliases: &["ocirepository", "ocirepositories"] },
    KindEntry { kind: "HelmRepository", group: "source.toolkit.fluxcd.io", version: "v1", plural: "helmrepositories", aliases: &["helmrepository", "helmrepositories"] },
    KindEntry { kind: "HelmChart", group: "source.toolkit.fluxcd.io", version: "v1", plural: "helmcharts", aliases: &["helmchart", "helmcharts"] },
    KindEntry { kind: "Bucket", group: "source.toolkit.fluxcd.io", version: "v1", plural: "buckets", aliases: &["bucket", "buckets"] },
    KindEntry { kind: "Kustomization", group: "kustomize.toolkit.fluxcd.io", version: "v1", plural: "kustomizations", aliases: &["ks", "kustomization", "kustomizations"] },
    KindEntry { kind: "HelmRelease", group: "helm.toolkit.fluxcd.io", version: "v2", plural: "helmreleases", aliases: &["hr", "helmrelease", "helmreleases"] },
    // Argo
    KindEntry { kind: "Application", group: "argoproj.io", version: "v1alpha1", plural: "applications", aliases: &["app", "application", "applications"] },
    // cert-manager
    KindEntry { kind: "Certificate", group: "cert-manager.io", version: "v1", plural: "certificates", aliases: &["cert", "certificate", "certificates"] },
    // Trivy / Kyverno adapters
    KindEntry { kind: "VulnerabilityReport", group: "aquasecurity.github.io", version: "v1alpha1", plural: "vulnerabilityreports", aliases: &["vulnerabilityreport", "vulnerabilityreports"] },
    KindEntry { kind: "ConfigAuditReport", group: "aquasecurity.github.io", version: "v1alpha1", plural: "configauditreports", aliases: &["configauditreport", "configauditreports"] },
    KindEntry { kind: "PolicyReport", group: "wgpolicyk8s.io", version: "v1alpha2", plural: "policyreports", aliases: &["policyreport", "policyreports"] },
    KindEntry { kind: "ClusterPolicyReport", group: "wgpolicyk8s.io", version: "v1alpha2", plural: "clusterpolicyreports", aliases: &["clusterpolicyreport", "clusterpolicyreports"] },
];

fn find(alias: &str) -> Option<&'static KindEntry> {
    let needle = alias.to_ascii_lowercase();
    KINDS.iter().find(|e| e.aliases.contains(&needle.as_str()))
}

/// Resolve an alias (e.g. `deploy`, `deployments`, `Deployment`) to its
/// canonical kind name. Fails for kinds outside the closed table.
pub fn normalize_kind(alias: &str) -> Result<&'static str> {
    find(alias).map(|e| e.kind).ok_or_else(|| Error::UnknownKind(alias.to_string()))
}

/// Resolve an alias to the `ApiResource` the dynamic client needs to list or
/// get objects of that kind.
pub fn api_resource_for(alias: &str) -> Result<ApiResource> {
    let entry = find(alias).ok_or_else(|| Error::UnknownKind(alias.to_string()))?;
    Ok(ApiResource {
        group: entry.group.to_string(),
        version: entry.version.to_string(),
        api_version: if entry.group.is_empty() {
            entry.version.to_string()
        } else {
            format!("{}/{}", entry.group, entry.version)
        },
        kind: entry.kind.to_string(),
        plural: entry.plural.to_string(),
    })
}

/// Resolve an owner's `apiVersion` + `kind` (as found in an `ownerReference`)
/// to the `ApiResource` needed to fetch it. Pairs the reference's own
/// group/version with the plural from the static table, so a cluster
/// running a different CRD version than our table still resolves correctly.
pub fn api_resource_for_owner(api_version: &str, kind: &str) -> Result<ApiResource> {
    let entry = find(kind).ok_or_else(|| Error::UnknownKind(kind.to_string()))?;
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    Ok(ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: entry.kind.to_string(),
        plural: entry.plural.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_kind() {
        assert_eq!(normalize_kind("deploy").unwrap(), "Deployment");
        assert_eq!(normalize_kind("po").unwrap(), "Pod");
        assert_eq!(normalize_kind("Deployment").unwrap(), "Deployment");
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(normalize_kind("frobnicator").is_err());
    }

    #[test]
    fn owner_gvr_pairs_reference_version_with_table_plural() {
        let gvr = api_resource_for_owner("apps/v1", "ReplicaSet").unwrap();
        assert_eq!(gvr.group, "apps");
        assert_eq!(gvr.version, "v1");
        assert_eq!(gvr.plural, "replicasets");
    }
}
