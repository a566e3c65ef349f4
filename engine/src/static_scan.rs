//! The static YAML scanner (§4.8): applies a fixed set of pattern rules to
//! parsed manifests with no cluster involved and no cross-object lookups —
//! each rule is a pure predicate over one document.

use serde::Deserialize;
use serde_json::Value;

use crate::prelude::*;

const WILDCARD_MARKERS: &[&str] = &["^", "~", ">", "*", ".x"];

struct Rule {
    id: &'static str,
    kinds: &'static [&'static str],
    category: FindingCategory,
    severity: Severity,
    remediation: &'static str,
    check: fn(&Value) -> Option<String>,
}

fn containers_missing_limits(doc: &Value, pointer: &str) -> Option<String> {
    let containers = doc.pointer(pointer)?.as_array()?;
    let offenders: Vec<&str> = containers.iter().filter(|c| c.pointer("/resources/limits").is_none()).filter_map(|c| c.get("name").and_then(Value::as_str)).collect();
    if offenders.is_empty() {
        None
    } else {
        Some(format!("container(s) {} declare no resources.limits", offenders.join(", ")))
    }
}

fn missing_resource_limits(doc: &Value) -> Option<String> {
    let pointer = if doc.get("kind").and_then(Value::as_str) == Some("Pod") { "/spec/containers" } else { "/spec/template/spec/containers" };
    containers_missing_limits(doc, pointer)
}

fn pod_spec_containers(doc: &Value) -> Option<&Vec<Value>> {
    doc.pointer("/spec/template/spec/containers").or_else(|| doc.pointer("/spec/containers")).and_then(Value::as_array)
}

fn probe_timeout_exceeds_period(doc: &Value) -> Option<String> {
    let containers = pod_spec_containers(doc)?;
    for container in containers {
        for probe in ["livenessProbe", "readinessProbe", "startupProbe"] {
            let Some(p) = container.get(probe) else { continue };
            let timeout = p.get("timeoutSeconds").and_then(Value::as_i64).unwrap_or(1);
            let period = p.get("periodSeconds").and_then(Value::as_i64).unwrap_or(10);
            if timeout > period {
                let name = container.get("name").and_then(Value::as_str).unwrap_or("?");
                return Some(format!("{probe} on container `{name}` has timeoutSeconds ({timeout}) > periodSeconds ({period})"));
            }
        }
    }
    None
}

fn cronjob_forbid_without_deadline(doc: &Value) -> Option<String> {
    let policy = doc.pointer("/spec/concurrencyPolicy").and_then(Value::as_str)?;
    if policy != "Forbid" {
        return None;
    }
    if doc.pointer("/spec/jobTemplate/spec/activeDeadlineSeconds").is_some() {
        return None;
    }
    Some("concurrencyPolicy Forbid with no activeDeadlineSeconds; a stuck run blocks every future schedule".to_string())
}

fn is_zero(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Number(n)) if n.as_i64() == Some(0)) || matches!(value, Some(Value::String(s)) if s == "0" || s == "0%")
}

fn deployment_cannot_progress(doc: &Value) -> Option<String> {
    let strategy = doc.pointer("/spec/strategy")?;
    if strategy.get("type").and_then(Value::as_str) != Some("RollingUpdate") {
        return None;
    }
    let max_unavailable_zero = is_zero(strategy.pointer("/rollingUpdate/maxUnavailable"));
    let max_surge_zero = is_zero(strategy.pointer("/rollingUpdate/maxSurge"));
    if max_unavailable_zero && max_surge_zero {
        Some("maxUnavailable and maxSurge are both 0; this rollout can never make progress".to_string())
    } else {
        None
    }
}

fn wildcard_chart_version(doc: &Value) -> Option<String> {
    let version = doc.pointer("/spec/chart/spec/version").and_then(Value::as_str)?;
    if WILDCARD_MARKERS.iter().any(|marker| version.contains(marker)) {
        Some(format!("chart version `{version}` is a wildcard range"))
    } else {
        None
    }
}

fn network_policy_egress_without_dns(doc: &Value) -> Option<String> {
    let types = doc.pointer("/spec/policyTypes")?.as_array()?;
    if !types.iter().any(|t| t.as_str() == Some("Egress")) {
        return None;
    }
    let has_dns_rule = doc.pointer("/spec/egress").and_then(Value::as_array).is_some_and(|rules| {
        rules
            .iter()
            .any(|rule| rule.pointer("/ports").and_then(Value::as_array).is_some_and(|ports| ports.iter().any(|p| p.get("port").and_then(Value::as_i64) == Some(53))))
    });
    if has_dns_rule {
        None
    } else {
        Some("Egress policy has no rule allowing port 53; DNS resolution breaks for selected Pods".to_string())
    }
}

fn traefik_v2_crd_version(doc: &Value) -> Option<String> {
    let api_version = doc.get("apiVersion").and_then(Value::as_str)?;
    if api_version.starts_with("traefik.containo.us/") {
        Some(format!("apiVersion `{api_version}` is the Traefik v2 CRD group; v3 moved these to `traefik.io/v1alpha1`"))
    } else {
        None
    }
}

fn istio_v1alpha3(doc: &Value) -> Option<String> {
    let api_version = doc.get("apiVersion").and_then(Value::as_str)?;
    if api_version.ends_with(".istio.io/v1alpha3") {
        Some(format!("apiVersion `{api_version}` is deprecated; these APIs were promoted to v1beta1"))
    } else {
        None
    }
}

const RULES: &[Rule] = &[
    Rule {
        id: "STATIC-WILDCARD-CHART",
        kinds: &["HelmRelease"],
        category: FindingCategory::Silent,
        severity: Severity::Warning,
        remediation: "pin the chart version to an exact release",
        check: wildcard_chart_version,
    },
    Rule {
        id: "STATIC-MISSING-LIMITS",
        kinds: &["Deployment", "StatefulSet", "DaemonSet", "Pod"],
        category: FindingCategory::Resource,
        severity: Severity::Warning,
        remediation: "set resources.limits on every container",
        check: missing_resource_limits,
    },
    Rule {
        id: "STATIC-PROBE-TIMEOUT",
        kinds: &["Deployment", "StatefulSet", "DaemonSet", "Pod"],
        category: FindingCategory::Config,
        severity: Severity::Warning,
        remediation: "lower timeoutSeconds below periodSeconds",
        check: probe_timeout_exceeds_period,
    },
    Rule {
        id: "STATIC-CRONJOB-FORBID",
        kinds: &["CronJob"],
        category: FindingCategory::Silent,
        severity: Severity::Warning,
        remediation: "set spec.jobTemplate.spec.activeDeadlineSeconds",
        check: cronjob_forbid_without_deadline,
    },
    Rule {
        id: "STATIC-ROLLOUT-STUCK",
        kinds: &["Deployment"],
        category: FindingCategory::Config,
        severity: Severity::Warning,
        remediation: "raise maxUnavailable or maxSurge above zero",
        check: deployment_cannot_progress,
    },
    Rule {
        id: "STATIC-NETPOL-NO-DNS",
        kinds: &["NetworkPolicy"],
        category: FindingCategory::Network,
        severity: Severity::Warning,
        remediation: "add an egress rule allowing UDP/TCP port 53",
        check: network_policy_egress_without_dns,
    },
    Rule {
        id: "STATIC-TRAEFIK-V2-CRD",
        kinds: &["IngressRoute", "Middleware", "TLSOption"],
        category: FindingCategory::Upgrade,
        severity: Severity::Info,
        remediation: "migrate manifests to the traefik.io/v1alpha1 group before upgrading to Traefik v3",
        check: traefik_v2_crd_version,
    },
    Rule {
        id: "STATIC-ISTIO-V1ALPHA3",
        kinds: &["VirtualService", "DestinationRule", "Gateway"],
        category: FindingCategory::Upgrade,
        severity: Severity::Info,
        remediation: "migrate manifests to networking.istio.io/v1beta1",
        check: istio_v1alpha3,
    },
];

fn doc_identity(doc: &Value) -> (String, String) {
    let name = doc.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default().to_string();
    let namespace = doc.pointer("/metadata/namespace").and_then(Value::as_str).unwrap_or_default().to_string();
    (name, namespace)
}

/// Apply every static pattern rule to each document in a multi-document
/// YAML manifest. Pure: no cluster lookups, no cross-object context.
pub fn scan_yaml(text: &str) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let doc: Value = serde_json::to_value(&value)?;
        let Some(kind) = doc.get("kind").and_then(Value::as_str) else {
            continue;
        };
        let (name, namespace) = doc_identity(&doc);
        for rule in RULES {
            if !rule.kinds.contains(&kind) {
                continue;
            }
            if let Some(message) = (rule.check)(&doc) {
                findings.push(Finding {
                    id: crate::scan::finding_id(rule.id, kind, &name, &namespace),
                    category: rule.category,
                    severity: rule.severity,
                    kind: kind.to_string(),
                    name: name.clone(),
                    namespace: namespace.clone(),
                    condition: rule.id.to_string(),
                    message,
                    remediation: rule.remediation.to_string(),
                    command: None,
                });
            }
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_missing_resource_limits() {
        let yaml = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: demo
spec:
  template:
    spec:
      containers:
        - name: app
          resources: {}
"#;
        let findings = scan_yaml(yaml).unwrap();
        assert!(findings.iter().any(|f| f.condition == "STATIC-MISSING-LIMITS"));
    }

    #[test]
    fn flags_probe_timeout_exceeding_period() {
        let yaml = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: demo
spec:
  template:
    spec:
      containers:
        - name: app
          readinessProbe:
            timeoutSeconds: 30
            periodSeconds: 10
"#;
        let findings = scan_yaml(yaml).unwrap();
        assert!(findings.iter().any(|f| f.condition == "STATIC-PROBE-TIMEOUT"));
    }

    #[test]
    fn ignores_documents_of_unrelated_kinds() {
        let yaml = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: demo
data:
  foo: bar
"#;
        let findings = scan_yaml(yaml).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn flags_traefik_v2_crd_api_version() {
        let yaml = r#"
apiVersion: traefik.containo.us/v1alpha1
kind: IngressRoute
metadata:
  name: web
  namespace: demo
spec: {}
"#;
        let findings = scan_yaml(yaml).unwrap();
        assert!(findings.iter().any(|f| f.condition == "STATIC-TRAEFIK-V2-CRD"));
    }

    #[test]
    fn multiple_documents_each_scanned_independently() {
        let yaml = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: a\n  namespace: demo\nspec:\n  template:\n    spec:\n      containers: [{name: c, resources: {}}]\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: b\n  namespace: demo\nspec:\n  template:\n    spec:\n      containers: [{name: c, resources: {limits: {cpu: \"1\"}}}]\n";
        let findings = scan_yaml(yaml).unwrap();
        assert_eq!(findings.iter().filter(|f| f.condition == "STATIC-MISSING-LIMITS").count(), 1);
        assert_eq!(findings.iter().find(|f| f.condition == "STATIC-MISSING-LIMITS").unwrap().name, "a");
    }
}
