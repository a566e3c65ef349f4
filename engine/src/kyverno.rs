//! The Kyverno adapter (§4.9): lists `PolicyReport`/`ClusterPolicyReport`
//! objects (both the `v1alpha2` and `v1beta1` group versions), drops
//! `pass`/`skip` results, and normalizes the rest into the common
//! [`Finding`] shape. A local catalog of `KPOL-*.yaml` files can override a
//! finding's category and severity by matching the originating Kyverno
//! policy name.

use kube::core::{ApiResource, DynamicObject};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession, ListParams};

/// Where a [`CatalogEntry`] was derived from, for matching against a live
/// Kyverno policy report result.
#[derive(Clone, Debug, Deserialize)]
pub struct DerivedFrom {
    /// The Kyverno `ClusterPolicy`/`Policy` name this entry documents.
    pub policy_name: String,
    /// The specific rule name within the policy, if the catalog is that
    /// fine-grained.
    #[serde(default)]
    pub rule_name: Option<String>,
}

/// One `KPOL-*.yaml` catalog entry.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    /// Catalog entry id, e.g. `KPOL-0012`.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Category to apply in place of [`FindingCategory::Unresolved`].
    pub category: String,
    /// Severity to apply in place of the normalized report severity.
    pub severity: String,
    /// The policy (and optionally rule) this entry matches.
    pub derived_from: DerivedFrom,
}

/// A loaded set of `KPOL-*.yaml` catalog entries, keyed by a case-folded,
/// dash-to-underscore form of the policy name they derive from.
#[derive(Clone, Debug, Default)]
pub struct PolicyCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

fn catalog_key(policy_name: &str) -> String {
    policy_name.to_ascii_lowercase().replace('-', "_")
}

impl PolicyCatalog {
    /// Load every `KPOL-*.yaml` file directly under `dir` into a catalog.
    pub fn load_dir(dir: &std::path::Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let read_dir = std::fs::read_dir(dir).map_err(|e| crate::Error::Parse(format!("reading kyverno catalog dir {}: {e}", dir.display())))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| crate::Error::Parse(e.to_string()))?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.starts_with("KPOL-") || !file_name.ends_with(".yaml") {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| crate::Error::Parse(format!("reading {}: {e}", path.display())))?;
            let parsed: CatalogEntry = serde_yaml::from_str(&text)?;
            entries.insert(catalog_key(&parsed.derived_from.policy_name), parsed);
        }
        Ok(Self { entries })
    }

    fn lookup(&self, policy_name: &str) -> Option<&CatalogEntry> {
        self.entries.get(&catalog_key(policy_name))
    }
}

fn normalize_severity(result: &str, severity: Option<&str>) -> Severity {
    match severity.map(str::to_ascii_lowercase).as_deref() {
        Some("critical") | Some("high") => Severity::Critical,
        Some("medium") => Severity::Warning,
        Some("low") | Some("info") => Severity::Info,
        _ if result == "fail" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn result_to_finding(report_name: &str, result: &Value, catalog: Option<&PolicyCatalog>) -> Option<Finding> {
    let outcome = result.get("result").and_then(Value::as_str).unwrap_or_default();
    if outcome == "pass" || outcome == "skip" {
        return None;
    }
    let policy = result.get("policy").and_then(Value::as_str).unwrap_or_default();
    let rule = result.get("rule").and_then(Value::as_str).unwrap_or_default();
    let message = result.get("message").and_then(Value::as_str).unwrap_or_default();
    let severity_field = result.get("severity").and_then(Value::as_str);

    let resource = result.pointer("/resources/0");
    let kind = resource.and_then(|r| r.get("kind")).and_then(Value::as_str).unwrap_or_default().to_string();
    let name = resource.and_then(|r| r.get("name")).and_then(Value::as_str).unwrap_or_default().to_string();
    let namespace = resource.and_then(|r| r.get("namespace")).and_then(Value::as_str).unwrap_or_default().to_string();

    let mut category = FindingCategory::Unresolved;
    let mut severity = normalize_severity(outcome, severity_field);

    if let Some(entry) = catalog.and_then(|c| c.lookup(policy)) {
        if let Ok(parsed) = entry.category.to_ascii_uppercase().parse() {
            category = parsed;
        }
        if let Ok(parsed) = entry.severity.to_ascii_lowercase().parse() {
            severity = parsed;
        }
    }

    let condition = format!("{policy}/{rule}");
    Some(Finding {
        id: crate::scan::finding_id("UNRESOLVED-KYVERNO", &kind, &name, &namespace),
        category,
        severity,
        kind,
        name,
        namespace,
        condition,
        message: if message.is_empty() { format!("policy {policy} rule {rule} reported {outcome}") } else { message.to_string() },
        remediation: "review the Kyverno policy report result and remediate the underlying resource".to_string(),
        command: None,
    })
}

fn translate_report(object: &DynamicObject, catalog: Option<&PolicyCatalog>) -> Vec<Finding> {
    let report_name = object.metadata.name.clone().unwrap_or_default();
    object
        .data
        .pointer("/results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|result| result_to_finding(&report_name, result, catalog))
        .collect()
}

fn policy_report_resource(version: &str) -> ApiResource {
    ApiResource {
        group: "wgpolicyk8s.io".to_string(),
        version: version.to_string(),
        api_version: format!("wgpolicyk8s.io/{version}"),
        kind: "PolicyReport".to_string(),
        plural: "policyreports".to_string(),
    }
}

fn cluster_policy_report_resource(version: &str) -> ApiResource {
    ApiResource {
        group: "wgpolicyk8s.io".to_string(),
        version: version.to_string(),
        api_version: format!("wgpolicyk8s.io/{version}"),
        kind: "ClusterPolicyReport".to_string(),
        plural: "clusterpolicyreports".to_string(),
    }
}

/// Listing an API group/version that is not installed in the cluster fails
/// at the server; we only accept one of `v1alpha2`/`v1beta1` at a time, so
/// treat that failure as "not this version" rather than a hard error.
async fn list_or_empty<S: ClusterSession>(session: &S, resource: &ApiResource, token: &CancellationToken) -> Result<Vec<DynamicObject>> {
    match session.list(resource, ListParams::default(), token).await {
        Ok(objects) => Ok(objects),
        Err(_) => Ok(Vec::new()),
    }
}

/// List every `PolicyReport`/`ClusterPolicyReport` across both accepted
/// group versions and translate their results into findings, optionally
/// overridden by `catalog`.
pub async fn scan<S: ClusterSession>(session: &S, catalog: Option<&PolicyCatalog>, token: &CancellationToken) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    for version in ["v1alpha2", "v1beta1"] {
        check_cancelled(token)?;
        for object in list_or_empty(session, &policy_report_resource(version), token).await? {
            findings.extend(translate_report(&object, catalog));
        }
        for object in list_or_empty(session, &cluster_policy_report_resource(version), token).await? {
            findings.extend(translate_report(&object, catalog));
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_pass_and_skip_results() {
        let result = serde_json::json!({"result": "pass", "policy": "p", "rule": "r"});
        assert!(result_to_finding("report", &result, None).is_none());
    }

    #[test]
    fn fail_without_severity_normalizes_to_warning() {
        let result = serde_json::json!({
            "result": "fail",
            "policy": "disallow-latest-tag",
            "rule": "require-image-tag",
            "resources": [{"kind": "Pod", "name": "web", "namespace": "demo"}],
        });
        let finding = result_to_finding("report", &result, None).unwrap();
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.category, FindingCategory::Unresolved);
    }

    #[test]
    fn high_severity_normalizes_to_critical() {
        let result = serde_json::json!({
            "result": "fail",
            "severity": "high",
            "policy": "p",
            "rule": "r",
            "resources": [{"kind": "Pod", "name": "web", "namespace": "demo"}],
        });
        let finding = result_to_finding("report", &result, None).unwrap();
        assert_eq!(finding.severity, Severity::Critical);
    }

    #[test]
    fn catalog_overrides_category_and_severity() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "disallow_latest_tag".to_string(),
            CatalogEntry {
                id: "KPOL-0001".to_string(),
                name: "disallow latest tag".to_string(),
                category: "silent".to_string(),
                severity: "info".to_string(),
                derived_from: DerivedFrom { policy_name: "disallow-latest-tag".to_string(), rule_name: None },
            },
        );
        let catalog = PolicyCatalog { entries };
        let result = serde_json::json!({
            "result": "fail",
            "severity": "high",
            "policy": "disallow-latest-tag",
            "rule": "require-image-tag",
            "resources": [{"kind": "Pod", "name": "web", "namespace": "demo"}],
        });
        let finding = result_to_finding("report", &result, Some(&catalog)).unwrap();
        assert_eq!(finding.category, FindingCategory::Silent);
        assert_eq!(finding.severity, Severity::Info);
    }
}
