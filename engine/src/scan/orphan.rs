//! ORPHAN family (§4.7): dangling references from one object to another
//! that should exist but doesn't.

use kube::core::DynamicObject;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::finding_id;
use crate::kinds::api_resource_for;
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession, ListParams};

fn finding(rule: &str, kind: &str, name: &str, namespace: &str, severity: Severity, condition: &str, message: impl Into<String>, remediation: impl Into<String>) -> Finding {
    Finding {
        id: finding_id(rule, kind, name, namespace),
        category: FindingCategory::Orphan,
        severity,
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        condition: condition.to_string(),
        message: message.into(),
        remediation: remediation.into(),
        command: None,
    }
}

async fn scan_autoscaler_targets<S: ClusterSession>(session: &S, kind: &str, ref_pointer: &str, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for(kind)?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let Some(target_kind) = object.data.pointer(&format!("{ref_pointer}/kind")).and_then(Value::as_str) else { continue };
        let Some(target_name) = object.data.pointer(&format!("{ref_pointer}/name")).and_then(Value::as_str) else { continue };
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let Ok(target_gvr) = api_resource_for(target_kind) else { continue };
        let exists = session.get(&target_gvr, &namespace, target_name, token).await?.is_some();
        if !exists {
            let name = object.metadata.name.clone().unwrap_or_default();
            findings.push(finding(
                "ORPHAN-SCALE-TARGET",
                kind,
                &name,
                &namespace,
                Severity::Warning,
                "ScaleTargetMissing",
                format!("scale target {target_kind}/{target_name} does not exist"),
                "delete the autoscaler or point it at an existing object",
            ));
        }
    }
    Ok(findings)
}

fn selector_map_to_string(labels: &serde_json::Map<String, Value>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    Some(labels.iter().filter_map(|(k, v)| v.as_str().map(|v| format!("{k}={v}"))).collect::<Vec<_>>().join(","))
}

fn build_pod_selector(match_labels: Option<&serde_json::Map<String, Value>>, match_expressions: Option<&[Value]>) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(labels) = match_labels {
        if let Some(s) = selector_map_to_string(labels) {
            clauses.push(s);
        }
    }
    if let Some(expressions) = match_expressions {
        for expr in expressions {
            let Some(key) = expr.get("key").and_then(Value::as_str) else { continue };
            let operator = expr.get("operator").and_then(Value::as_str).unwrap_or("In");
            let values: Vec<&str> = expr.get("values").and_then(Value::as_array).into_iter().flatten().filter_map(Value::as_str).collect();
            let clause = match operator {
                "In" => format!("{key} in ({})", values.join(",")),
                "NotIn" => format!("{key} notin ({})", values.join(",")),
                "Exists" => key.to_string(),
                "DoesNotExist" => format!("!{key}"),
                _ => continue,
            };
            clauses.push(clause);
        }
    }
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(","))
    }
}

async fn scan_dangling_services<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("Service")?;
    let pod_gvr = api_resource_for("Pod")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        if namespace == "default" && name == "kubernetes" {
            continue;
        }
        let Some(selector) = object.data.pointer("/spec/selector").and_then(Value::as_object) else { continue };
        let Some(selector_str) = selector_map_to_string(selector) else { continue };
        let pods = session
            .list(&pod_gvr, ListParams { namespace: Some(&namespace), label_selector: Some(&selector_str), field_selector: None }, token)
            .await?;
        if pods.is_empty() {
            findings.push(finding(
                "ORPHAN-SERVICE-NO-PODS",
                "Service",
                &name,
                &namespace,
                Severity::Warning,
                "NoMatchingPods",
                format!("no Pod in namespace `{namespace}` matches selector `{selector_str}`"),
                "fix the Service selector or the workload's Pod labels",
            ));
        }
    }
    Ok(findings)
}

fn ingress_backend_services(object: &DynamicObject) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(name) = object.data.pointer("/spec/defaultBackend/service/name").and_then(Value::as_str) {
        names.push(name.to_string());
    }
    if let Some(rules) = object.data.pointer("/spec/rules").and_then(Value::as_array) {
        for rule in rules {
            let Some(paths) = rule.pointer("/http/paths").and_then(Value::as_array) else { continue };
            for path in paths {
                if let Some(name) = path.pointer("/backend/service/name").and_then(Value::as_str) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort();
    names.dedup();
    names
}

async fn scan_dangling_ingress_backends<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("Ingress")?;
    let service_gvr = api_resource_for("Service")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        for backend in ingress_backend_services(&object) {
            check_cancelled(token)?;
            let exists = session.get(&service_gvr, &namespace, &backend, token).await?.is_some();
            if !exists {
                findings.push(finding(
                    "ORPHAN-INGRESS-BACKEND",
                    "Ingress",
                    &name,
                    &namespace,
                    Severity::Warning,
                    "BackendServiceMissing",
                    format!("backend Service `{backend}` does not exist in namespace `{namespace}`"),
                    "create the missing Service or fix the Ingress rule",
                ));
            }
        }
    }
    Ok(findings)
}

async fn scan_dangling_network_policies<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("NetworkPolicy")?;
    let pod_gvr = api_resource_for("Pod")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let match_labels = object.data.pointer("/spec/podSelector/matchLabels").and_then(Value::as_object);
        let match_expressions: Option<Vec<Value>> = object.data.pointer("/spec/podSelector/matchExpressions").and_then(Value::as_array).cloned();
        let Some(selector_str) = build_pod_selector(match_labels, match_expressions.as_deref()) else { continue };

        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let pods = session
            .list(&pod_gvr, ListParams { namespace: Some(&namespace), label_selector: Some(&selector_str), field_selector: None }, token)
            .await?;
        if pods.is_empty() {
            let name = object.metadata.name.clone().unwrap_or_default();
            findings.push(finding(
                "ORPHAN-NETPOL-NO-PODS",
                "NetworkPolicy",
                &name,
                &namespace,
                Severity::Info,
                "NoMatchingPods",
                format!("no Pod in namespace `{namespace}` matches podSelector `{selector_str}`"),
                "confirm the podSelector is correct; otherwise this policy protects nothing",
            ));
        }
    }
    Ok(findings)
}

struct PodRef {
    kind: &'static str,
    name: String,
    optional: bool,
}

fn pod_pvc_refs(spec: &Value) -> Vec<String> {
    spec.pointer("/volumes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| v.pointer("/persistentVolumeClaim/claimName").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn pod_secret_refs(spec: &Value) -> Vec<PodRef> {
    let mut refs = Vec::new();
    for volume in spec.pointer("/volumes").and_then(Value::as_array).into_iter().flatten() {
        if let Some(name) = volume.pointer("/secret/secretName").and_then(Value::as_str) {
            let optional = volume.pointer("/secret/optional").and_then(Value::as_bool).unwrap_or(false);
            refs.push(PodRef { kind: "Secret", name: name.to_string(), optional });
        }
    }
    for pull_secret in spec.pointer("/imagePullSecrets").and_then(Value::as_array).into_iter().flatten() {
        if let Some(name) = pull_secret.get("name").and_then(Value::as_str) {
            refs.push(PodRef { kind: "Secret", name: name.to_string(), optional: false });
        }
    }
    for container in all_containers(spec) {
        for env_from in container.pointer("/envFrom").and_then(Value::as_array).into_iter().flatten() {
            if let Some(name) = env_from.pointer("/secretRef/name").and_then(Value::as_str) {
                let optional = env_from.pointer("/secretRef/optional").and_then(Value::as_bool).unwrap_or(false);
                refs.push(PodRef { kind: "Secret", name: name.to_string(), optional });
            }
        }
        for env in container.pointer("/env").and_then(Value::as_array).into_iter().flatten() {
            if let Some(name) = env.pointer("/valueFrom/secretKeyRef/name").and_then(Value::as_str) {
                let optional = env.pointer("/valueFrom/secretKeyRef/optional").and_then(Value::as_bool).unwrap_or(false);
                refs.push(PodRef { kind: "Secret", name: name.to_string(), optional });
            }
        }
    }
    refs
}

fn pod_configmap_refs(spec: &Value) -> Vec<PodRef> {
    let mut refs = Vec::new();
    for volume in spec.pointer("/volumes").and_then(Value::as_array).into_iter().flatten() {
        if let Some(name) = volume.pointer("/configMap/name").and_then(Value::as_str) {
            let optional = volume.pointer("/configMap/optional").and_then(Value::as_bool).unwrap_or(false);
            refs.push(PodRef { kind: "ConfigMap", name: name.to_string(), optional });
        }
    }
    for container in all_containers(spec) {
        for env_from in container.pointer("/envFrom").and_then(Value::as_array).into_iter().flatten() {
            if let Some(name) = env_from.pointer("/configMapRef/name").and_then(Value::as_str) {
                let optional = env_from.pointer("/configMapRef/optional").and_then(Value::as_bool).unwrap_or(false);
                refs.push(PodRef { kind: "ConfigMap", name: name.to_string(), optional });
            }
        }
        for env in container.pointer("/env").and_then(Value::as_array).into_iter().flatten() {
            if let Some(name) = env.pointer("/valueFrom/configMapKeyRef/name").and_then(Value::as_str) {
                let optional = env.pointer("/valueFrom/configMapKeyRef/optional").and_then(Value::as_bool).unwrap_or(false);
                refs.push(PodRef { kind: "ConfigMap", name: name.to_string(), optional });
            }
        }
    }
    refs
}

fn all_containers(spec: &Value) -> Vec<Value> {
    let mut containers: Vec<Value> = spec.pointer("/containers").and_then(Value::as_array).cloned().unwrap_or_default();
    containers.extend(spec.pointer("/initContainers").and_then(Value::as_array).cloned().unwrap_or_default());
    containers
}

async fn scan_pods<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("Pod")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let Some(spec) = object.data.pointer("/spec") else { continue };

        for pvc_name in pod_pvc_refs(spec) {
            let pvc_gvr = api_resource_for("PersistentVolumeClaim")?;
            if session.get(&pvc_gvr, &namespace, &pvc_name, token).await?.is_none() {
                findings.push(finding(
                    "ORPHAN-POD-PVC",
                    "Pod",
                    &name,
                    &namespace,
                    Severity::Critical,
                    "MissingPersistentVolumeClaim",
                    format!("referenced PersistentVolumeClaim `{pvc_name}` does not exist"),
                    format!("create PersistentVolumeClaim `{pvc_name}` or remove the volume"),
                ));
            }
        }

        for secret_ref in pod_secret_refs(spec) {
            if secret_ref.optional {
                continue;
            }
            let gvr = api_resource_for(secret_ref.kind)?;
            if session.get(&gvr, &namespace, &secret_ref.name, token).await?.is_none() {
                findings.push(finding(
                    "ORPHAN-POD-SECRET",
                    "Pod",
                    &name,
                    &namespace,
                    Severity::Critical,
                    "MissingSecret",
                    format!("referenced Secret `{}` does not exist and is not marked optional", secret_ref.name),
                    format!("create Secret `{}` or remove the reference", secret_ref.name),
                ));
            }
        }

        for configmap_ref in pod_configmap_refs(spec) {
            if configmap_ref.optional {
                continue;
            }
            let gvr = api_resource_for(configmap_ref.kind)?;
            if session.get(&gvr, &namespace, &configmap_ref.name, token).await?.is_none() {
                findings.push(finding(
                    "ORPHAN-POD-CONFIGMAP",
                    "Pod",
                    &name,
                    &namespace,
                    Severity::Critical,
                    "MissingConfigMap",
                    format!("referenced ConfigMap `{}` does not exist and is not marked optional", configmap_ref.name),
                    format!("create ConfigMap `{}` or remove the reference", configmap_ref.name),
                ));
            }
        }
    }
    Ok(findings)
}

/// Run the ORPHAN family across HPAs, VPAs, Services, Ingresses,
/// NetworkPolicies, and Pods.
pub async fn scan<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let mut findings = scan_autoscaler_targets(session, "HorizontalPodAutoscaler", "/spec/scaleTargetRef", token).await?;
    findings.extend(scan_autoscaler_targets(session, "VerticalPodAutoscaler", "/spec/targetRef", token).await?);
    findings.extend(scan_dangling_services(session, token).await?);
    findings.extend(scan_dangling_ingress_backends(session, token).await?);
    findings.extend(scan_dangling_network_policies(session, token).await?);
    findings.extend(scan_pods(session, token).await?);
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_equality_and_set_based_selectors() {
        let mut labels = serde_json::Map::new();
        labels.insert("app".to_string(), Value::String("nginx".to_string()));
        let selector = build_pod_selector(Some(&labels), None).unwrap();
        assert_eq!(selector, "app=nginx");
    }

    #[test]
    fn set_based_expressions_render_kubectl_syntax() {
        let expressions = vec![serde_json::json!({"key": "tier", "operator": "In", "values": ["frontend", "backend"]})];
        let selector = build_pod_selector(None, Some(&expressions)).unwrap();
        assert_eq!(selector, "tier in (frontend,backend)");
    }

    #[test]
    fn ingress_backends_are_deduplicated_and_sorted() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {"name": "web"},
            "spec": {
                "defaultBackend": {"service": {"name": "b-svc"}},
                "rules": [{"http": {"paths": [
                    {"backend": {"service": {"name": "a-svc"}}},
                    {"backend": {"service": {"name": "b-svc"}}},
                ]}}],
            },
        }))
        .unwrap();
        assert_eq!(ingress_backend_services(&object), vec!["a-svc", "b-svc"]);
    }

    #[test]
    fn fixture_dangling_hpa_flags_missing_scale_target() {
        use assert_json_diff::assert_json_eq;
        use serde_json::json;

        #[derive(serde::Deserialize)]
        struct Input {
            objects: Vec<DynamicObject>,
        }

        let (input, want): (Input, Value) = crate::testing::load_fixture(module_path!(), "dangling_hpa");
        let session = input.objects.into_iter().fold(crate::testing::FakeSession::new(), |s, o| s.with_object(o));
        let token = CancellationToken::new();
        let findings = tokio_test::block_on(scan(&session, &token)).unwrap();
        let got = json!({
            "findings": findings.iter().map(|f| json!({
                "category": f.category,
                "severity": f.severity,
                "kind": f.kind,
                "name": f.name,
                "namespace": f.namespace,
                "condition": f.condition,
            })).collect::<Vec<_>>(),
        });
        assert_json_eq!(got, want);
    }

    #[test]
    fn fixture_dangling_service_matched_by_labels_yields_no_findings() {
        use assert_json_diff::assert_json_eq;
        use serde_json::json;

        #[derive(serde::Deserialize)]
        struct Input {
            objects: Vec<DynamicObject>,
        }

        let (input, want): (Input, Value) = crate::testing::load_fixture(module_path!(), "dangling_service_matched");
        let session = input.objects.into_iter().fold(crate::testing::FakeSession::new(), |s, o| s.with_object(o));
        let token = CancellationToken::new();
        let findings = tokio_test::block_on(scan(&session, &token)).unwrap();
        let got = json!({ "findings": findings });
        assert_json_eq!(got, want);
    }
}
