//! SILENT family (§4.7): resources whose Ready condition is True/Unknown
//! but whose spec is provably broken, defeating its own intent silently.

use jiff::SignedDuration;
use kube::core::DynamicObject;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::finding_id;
use crate::kinds::api_resource_for;
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession, ListParams};

const WILDCARD_MARKERS: &[&str] = &["^", "~", ">", "*", ".x"];

fn finding(rule: &str, kind: &str, name: &str, namespace: &str, condition: &str, message: impl Into<String>, remediation: impl Into<String>) -> Finding {
    Finding {
        id: finding_id(rule, kind, name, namespace),
        category: FindingCategory::Silent,
        severity: Severity::Warning,
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        condition: condition.to_string(),
        message: message.into(),
        remediation: remediation.into(),
        command: None,
    }
}

fn parse_short_duration(text: &str) -> Option<SignedDuration> {
    let text = text.trim();
    let (number_part, unit) = text.split_at(text.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(text.len()));
    let number: f64 = number_part.parse().ok()?;
    let seconds = match unit {
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return None,
    };
    Some(SignedDuration::from_secs_f64(seconds))
}

fn reconciliation_disabled(object: &DynamicObject) -> Option<Finding> {
    let interval = object.data.pointer("/spec/interval").and_then(Value::as_str)?;
    if parse_short_duration(interval).is_some_and(|d| d == SignedDuration::ZERO) {
        let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        return Some(finding(
            "SILENT-INTERVAL-ZERO",
            &kind,
            &name,
            &namespace,
            "IntervalZero",
            "reconciliation interval is zero; this object will never reconcile again",
            "set `spec.interval` to a non-zero duration",
        ));
    }
    None
}

fn wildcard_chart_version(object: &DynamicObject) -> Option<Finding> {
    let version = object.data.pointer("/spec/chart/spec/version").and_then(Value::as_str)?;
    if WILDCARD_MARKERS.iter().any(|m| version.contains(m)) {
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        return Some(finding(
            "SILENT-CHART-WILDCARD",
            "HelmRelease",
            &name,
            &namespace,
            "WildcardChartVersion",
            format!("chart version `{version}` is a wildcard range; upgrades can happen silently"),
            "pin `spec.chart.spec.version` to an exact version",
        ));
    }
    None
}

fn short_timeout(object: &DynamicObject) -> Option<Finding> {
    let timeout = object.data.pointer("/spec/timeout").and_then(Value::as_str)?;
    let parsed = parse_short_duration(timeout)?;
    if parsed < SignedDuration::from_secs(60) {
        let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        return Some(finding(
            "SILENT-SHORT-TIMEOUT",
            &kind,
            &name,
            &namespace,
            "ShortTimeout",
            format!("timeout `{timeout}` is under a minute; reconciliation may fail before it completes"),
            "increase `spec.timeout`",
        ));
    }
    None
}

fn inline_values_and_values_from(object: &DynamicObject) -> Option<Finding> {
    let has_values = object.data.pointer("/spec/values").is_some();
    let has_values_from = object.data.pointer("/spec/valuesFrom").and_then(Value::as_array).is_some_and(|a| !a.is_empty());
    if has_values && has_values_from {
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        return Some(finding(
            "SILENT-VALUES-CONFLICT",
            "HelmRelease",
            &name,
            &namespace,
            "InlineAndValuesFrom",
            "both inline `values` and `valuesFrom` are set; merge order may not be what's intended",
            "consolidate into a single values source",
        ));
    }
    None
}

fn zero_replicas_in_values(object: &DynamicObject) -> Option<Finding> {
    let values = object.data.pointer("/spec/values")?;
    for key in ["replicaCount", "replicas", "minReplicas"] {
        if values.get(key).and_then(Value::as_i64) == Some(0) {
            let name = object.metadata.name.clone().unwrap_or_default();
            let namespace = object.metadata.namespace.clone().unwrap_or_default();
            return Some(finding(
                "SILENT-ZERO-REPLICAS",
                "HelmRelease",
                &name,
                &namespace,
                "ZeroReplicasInValues",
                format!("`values.{key}` is 0; the release will render with no running replicas"),
                format!("set `values.{key}` to a non-zero count"),
            ));
        }
    }
    None
}

fn post_renderer_mismatch(object: &DynamicObject) -> Option<Finding> {
    let chart_name = object.data.pointer("/spec/chart/spec/chart").and_then(Value::as_str)?;
    let targets = object.data.pointer("/spec/postRenderers")?.as_array()?;
    for renderer in targets {
        let patches = renderer.pointer("/kustomize/patches")?.as_array()?;
        for patch in patches {
            let target_kind = patch.pointer("/target/kind").and_then(Value::as_str);
            let target_name = patch.pointer("/target/name").and_then(Value::as_str);
            if target_kind.is_some() && target_name.is_some_and(|n| n != chart_name) {
                let name = object.metadata.name.clone().unwrap_or_default();
                let namespace = object.metadata.namespace.clone().unwrap_or_default();
                return Some(finding(
                    "SILENT-POSTRENDERER-MISMATCH",
                    "HelmRelease",
                    &name,
                    &namespace,
                    "PostRendererTargetMismatch",
                    "a postRenderer patch target name doesn't match the chart name; the patch silently never applies",
                    "fix the postRenderer patch target to match the rendered resource name",
                ));
            }
        }
    }
    None
}

async fn optional_refs_pointing_at_missing(object: &DynamicObject, pointer: &str, session: &impl ClusterSession, token: &CancellationToken) -> Result<Option<Finding>> {
    let Some(entries) = object.data.pointer(pointer).and_then(Value::as_array) else {
        return Ok(None);
    };
    let namespace = object.metadata.namespace.clone().unwrap_or_default();
    for entry in entries {
        let optional = entry.get("optional").and_then(Value::as_bool).unwrap_or(false);
        if !optional {
            continue;
        }
        let (kind, target_name) = if let Some(n) = entry.pointer("/configMapRef/name").and_then(Value::as_str) {
            ("ConfigMap", n)
        } else if let Some(n) = entry.pointer("/secretRef/name").and_then(Value::as_str) {
            ("Secret", n)
        } else {
            continue;
        };
        let Ok(gvr) = api_resource_for(kind) else { continue };
        let exists = session.get(&gvr, &namespace, target_name, token).await?.is_some();
        if !exists {
            let name = object.metadata.name.clone().unwrap_or_default();
            return Ok(Some(finding(
                "SILENT-OPTIONAL-MISSING-REF",
                "HelmRelease",
                &name,
                &namespace,
                "OptionalValuesFromMissing",
                format!("`optional: true` {kind} `{target_name}` referenced by valuesFrom/substituteFrom does not exist; values are silently dropped"),
                format!("create {kind} `{target_name}` or remove the reference"),
            )));
        }
    }
    Ok(None)
}

async fn source_ref_suspended<S: ClusterSession>(object: &DynamicObject, session: &S, token: &CancellationToken) -> Result<Option<Finding>> {
    let source_kind = object.data.pointer("/spec/sourceRef/kind").and_then(Value::as_str).unwrap_or("GitRepository");
    let Some(source_name) = object.data.pointer("/spec/sourceRef/name").and_then(Value::as_str) else {
        return Ok(None);
    };
    let source_namespace = object
        .data
        .pointer("/spec/sourceRef/namespace")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| object.metadata.namespace.clone().unwrap_or_default());

    let Ok(gvr) = api_resource_for(source_kind) else { return Ok(None) };
    let Some(source) = session.get(&gvr, &source_namespace, source_name, token).await? else {
        return Ok(None);
    };
    if source.data.pointer("/spec/suspend").and_then(Value::as_bool) == Some(true) {
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        return Ok(Some(finding(
            "SILENT-SOURCE-SUSPENDED",
            "HelmRelease",
            &name,
            &namespace,
            "SourceRefSuspended",
            format!("sourceRef `{source_kind}/{source_name}` is suspended; this HelmRelease will never pick up new revisions"),
            format!("unsuspend `{source_kind}/{source_name}` or repoint sourceRef"),
        )));
    }
    Ok(None)
}

/// Run the SILENT family across Flux Kustomizations and HelmReleases.
pub async fn scan<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();

    for kind in ["Kustomization", "HelmRelease"] {
        let gvr = api_resource_for(kind)?;
        let objects = session.list(&gvr, ListParams::default(), token).await?;
        for object in objects {
            check_cancelled(token)?;
            findings.extend(reconciliation_disabled(&object));
            findings.extend(short_timeout(&object));
            if kind == "HelmRelease" {
                findings.extend(wildcard_chart_version(&object));
                findings.extend(inline_values_and_values_from(&object));
                findings.extend(zero_replicas_in_values(&object));
                findings.extend(post_renderer_mismatch(&object));
                findings.extend(optional_refs_pointing_at_missing(&object, "/spec/valuesFrom", session, token).await?);
                findings.extend(optional_refs_pointing_at_missing(&object, "/spec/postRenderers/0/kustomize/substituteFrom", session, token).await?);
                findings.extend(source_ref_suspended(&object, session, token).await?);
            }
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_duration_forms() {
        assert_eq!(parse_short_duration("0s"), Some(SignedDuration::ZERO));
        assert_eq!(parse_short_duration("30s"), Some(SignedDuration::from_secs(30)));
        assert_eq!(parse_short_duration("5m"), Some(SignedDuration::from_secs(300)));
    }

    #[test]
    fn detects_wildcard_chart_version_markers() {
        assert!(WILDCARD_MARKERS.iter().any(|m| "^1.2.3".contains(m)));
        assert!(WILDCARD_MARKERS.iter().any(|m| "1.x".contains(m)));
        assert!(!WILDCARD_MARKERS.iter().any(|m| "1.2.3".contains(m)));
    }
}
