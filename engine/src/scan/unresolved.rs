//! UNRESOLVED family (§4.7): folds in findings already computed by a
//! third-party scanner rather than deriving new ones — Trivy
//! `VulnerabilityReport`/`ConfigAuditReport` severity rollups, plus Kyverno
//! `PolicyReport`/`ClusterPolicyReport` results via [`crate::kyverno`].

use kube::core::DynamicObject;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::finding_id;
use crate::config::ScanConfig;
use crate::kinds::api_resource_for;
use crate::kyverno::{self, PolicyCatalog};
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession, ListParams};

fn scanned_target(object: &DynamicObject) -> (String, String) {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    let kind = labels.get("trivy-operator.resource.kind").cloned().unwrap_or_else(|| "Pod".to_string());
    let name = labels.get("trivy-operator.resource.name").cloned().unwrap_or_else(|| object.metadata.name.clone().unwrap_or_default());
    (kind, name)
}

async fn scan_vulnerability_reports<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("VulnerabilityReport")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let critical = object.data.pointer("/report/summary/criticalCount").and_then(Value::as_i64).unwrap_or(0);
        let high = object.data.pointer("/report/summary/highCount").and_then(Value::as_i64).unwrap_or(0);
        if critical == 0 && high == 0 {
            continue;
        }
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let (kind, name) = scanned_target(&object);
        let severity = if critical > 0 { Severity::Critical } else { Severity::Warning };
        findings.push(Finding {
            id: finding_id("UNRESOLVED-VULN", &kind, &name, &namespace),
            category: FindingCategory::Unresolved,
            severity,
            kind,
            name,
            namespace,
            condition: "VulnerabilitiesFound".to_string(),
            message: format!("Trivy found {critical} critical and {high} high severity vulnerabilities"),
            remediation: "update the base image or affected packages to patched versions".to_string(),
            command: None,
        });
    }
    Ok(findings)
}

async fn scan_config_audit_reports<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("ConfigAuditReport")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let danger = object.data.pointer("/report/summary/dangerCount").and_then(Value::as_i64).unwrap_or(0);
        let warning = object.data.pointer("/report/summary/warningCount").and_then(Value::as_i64).unwrap_or(0);
        if danger == 0 && warning == 0 {
            continue;
        }
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let (kind, name) = scanned_target(&object);
        let severity = if danger > 0 { Severity::Critical } else { Severity::Warning };
        findings.push(Finding {
            id: finding_id("UNRESOLVED-CONFIG-AUDIT", &kind, &name, &namespace),
            category: FindingCategory::Unresolved,
            severity,
            kind,
            name,
            namespace,
            condition: "ConfigAuditFailed".to_string(),
            message: format!("Trivy config audit found {danger} danger and {warning} warning checks"),
            remediation: "review the ConfigAuditReport and address the failed checks".to_string(),
            command: None,
        });
    }
    Ok(findings)
}

/// Run the UNRESOLVED family: Trivy vulnerability/config-audit rollups plus
/// Kyverno policy report findings. Catalog-enriches the Kyverno findings
/// when `config.kyverno_catalog_dir` names a directory.
pub async fn scan<S: ClusterSession>(session: &S, config: &ScanConfig, token: &CancellationToken) -> Result<Vec<Finding>> {
    let catalog = match &config.kyverno_catalog_dir {
        Some(dir) => Some(PolicyCatalog::load_dir(dir)?),
        None => None,
    };
    let mut findings = scan_vulnerability_reports(session, token).await?;
    findings.extend(scan_config_audit_reports(session, token).await?);
    findings.extend(kyverno::scan(session, catalog.as_ref(), token).await?);
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanned_target_falls_back_to_report_name() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "aquasecurity.github.io/v1alpha1",
            "kind": "VulnerabilityReport",
            "metadata": {"name": "replicaset-web-abc123", "namespace": "demo"},
        }))
        .unwrap();
        let (kind, name) = scanned_target(&object);
        assert_eq!(kind, "Pod");
        assert_eq!(name, "replicaset-web-abc123");
    }

    #[test]
    fn scanned_target_prefers_trivy_operator_labels() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "aquasecurity.github.io/v1alpha1",
            "kind": "VulnerabilityReport",
            "metadata": {
                "name": "replicaset-web-abc123",
                "namespace": "demo",
                "labels": {
                    "trivy-operator.resource.kind": "Deployment",
                    "trivy-operator.resource.name": "web",
                },
            },
        }))
        .unwrap();
        let (kind, name) = scanned_target(&object);
        assert_eq!(kind, "Deployment");
        assert_eq!(name, "web");
    }
}
