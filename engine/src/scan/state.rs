//! STATE family (§4.7): resources sitting in a failure condition past the
//! configured stuck-threshold, while not themselves suspended.

use jiff::SignedDuration;
use kube::core::DynamicObject;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{finding_id, severity_for_elapsed};
use crate::config::ScanConfig;
use crate::kinds::api_resource_for;
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession, ListParams};

fn is_suspended(object: &Value) -> bool {
    object.pointer("/spec/suspend").and_then(Value::as_bool).unwrap_or(false)
}

fn find_condition<'a>(object: &'a Value, condition_type: &str) -> Option<&'a Value> {
    object.pointer("/status/conditions")?.as_array()?.iter().find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
}

fn elapsed_since(condition: &Value) -> Option<SignedDuration> {
    let last_transition = condition.get("lastTransitionTime")?.as_str()?;
    let ts: Timestamp = last_transition.parse().ok()?;
    Some(Timestamp::now().duration_since(ts))
}

fn condition_finding(object: &DynamicObject, condition: &Value, elapsed: SignedDuration, config: &ScanConfig) -> Option<Finding> {
    if elapsed < config.stuck_threshold {
        return None;
    }
    let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    let name = object.metadata.name.clone().unwrap_or_default();
    let namespace = object.metadata.namespace.clone().unwrap_or_default();
    let reason = condition.get("reason").and_then(Value::as_str).unwrap_or("Unknown");
    let message = condition.get("message").and_then(Value::as_str).unwrap_or_default();

    Some(Finding {
        id: finding_id("STATE-STUCK", &kind, &name, &namespace),
        category: FindingCategory::State,
        severity: severity_for_elapsed(elapsed),
        kind,
        name,
        namespace,
        condition: reason.to_string(),
        message: format!("has been failing for over the stuck threshold: {message}"),
        remediation: format!("investigate the {reason} condition and reconcile manually if needed"),
        command: None,
    })
}

async fn scan_conditioned_kind<S: ClusterSession>(
    session: &S,
    kind: &str,
    config: &ScanConfig,
    token: &CancellationToken,
) -> Result<Vec<Finding>> {
    let gvr = api_resource_for(kind)?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        if is_suspended(&object.data) {
            continue;
        }
        let ready = find_condition(&object.data, "Ready");
        let stalled = find_condition(&object.data, "Stalled");

        let failing = ready.filter(|c| c.get("status").and_then(Value::as_str) == Some("False")).or(stalled.filter(|c| c.get("status").and_then(Value::as_str) == Some("True")));

        let Some(condition) = failing else { continue };
        let Some(elapsed) = elapsed_since(condition) else { continue };
        if let Some(finding) = condition_finding(&object, condition, elapsed, config) {
            findings.push(finding);
        }
    }
    Ok(findings)
}

async fn scan_argo_applications<S: ClusterSession>(session: &S, config: &ScanConfig, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("Application")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();

        if let Some(condition) = find_condition(&object.data, "Ready") {
            if condition.get("status").and_then(Value::as_str) == Some("False") {
                if let Some(elapsed) = elapsed_since(condition) {
                    if let Some(finding) = condition_finding(&object, condition, elapsed, config) {
                        findings.push(finding);
                    }
                }
            }
        }

        let phase = object.data.pointer("/status/operationState/phase").and_then(Value::as_str);
        if phase == Some("Running") {
            let started_at = object.data.pointer("/status/operationState/startedAt").and_then(Value::as_str);
            if let Some(started) = started_at.and_then(|s| s.parse::<Timestamp>().ok()) {
                let elapsed = Timestamp::now().duration_since(started);
                if elapsed >= config.stuck_threshold {
                    findings.push(Finding {
                        id: finding_id("STATE-STUCK-SYNC", "Application", &name, &namespace),
                        category: FindingCategory::State,
                        severity: severity_for_elapsed(elapsed),
                        kind: "Application".to_string(),
                        name,
                        namespace,
                        condition: "OperationRunning".to_string(),
                        message: "sync operation has been running past the stuck threshold".to_string(),
                        remediation: "inspect `argocd app get` operation state; consider terminating and retrying the sync".to_string(),
                        command: None,
                    });
                }
            }
        }
    }
    Ok(findings)
}

/// Run the STATE family across Flux Kustomizations, Flux HelmReleases, and
/// Argo Applications.
pub async fn scan<S: ClusterSession>(session: &S, config: &ScanConfig, token: &CancellationToken) -> Result<Vec<Finding>> {
    let mut findings = scan_conditioned_kind(session, "Kustomization", config, token).await?;
    findings.extend(scan_conditioned_kind(session, "HelmRelease", config, token).await?);
    findings.extend(scan_argo_applications(session, config, token).await?);
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspended_resource_is_skipped() {
        let value = serde_json::json!({"spec": {"suspend": true}});
        assert!(is_suspended(&value));
    }

    #[test]
    fn finds_the_named_condition_type() {
        let value = serde_json::json!({
            "status": {"conditions": [
                {"type": "Ready", "status": "False", "reason": "BuildFailed"},
            ]}
        });
        let condition = find_condition(&value, "Ready").unwrap();
        assert_eq!(condition.get("reason").unwrap(), "BuildFailed");
    }
}
