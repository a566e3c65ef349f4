//! The Argo tracer (§4.3): parses the JSON form of `argocd app get` into a
//! source→leaf [`TraceResult`].

use tokio_util::sync::CancellationToken;

use super::{status_is_ready, ArgoAppOutcome, ArgoCollaborator};
use crate::oci::parse_oci_source;
use crate::prelude::*;

fn str_at<'a>(value: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(segment)?;
    }
    cur.as_str()
}

fn synthesize_source_link(value: &serde_json::Value) -> ChainLink {
    let source = value.pointer("/spec/source").cloned().unwrap_or_default();
    let repo_url = source.get("repoURL").and_then(|v| v.as_str()).unwrap_or_default();
    let chart = source.get("chart").and_then(|v| v.as_str());
    let target_revision = source.get("targetRevision").and_then(|v| v.as_str());
    let path = source.get("path").and_then(|v| v.as_str());

    let oci_source = if !repo_url.is_empty() { Some(parse_oci_source(repo_url)) } else { None };

    let kind = if chart.is_some() {
        "HelmChart"
    } else if oci_source.as_ref().is_some_and(|o| o.is_confighub) {
        "ConfigHub OCI"
    } else if repo_url.starts_with("oci://") {
        "OCIRepository"
    } else {
        "Source"
    };

    let name = match (kind, &oci_source) {
        ("ConfigHub OCI", Some(o)) => o.format_confighub_source(),
        _ => chart.map(str::to_string).unwrap_or_else(|| repo_url.to_string()),
    };

    ChainLink {
        kind: kind.to_string(),
        name,
        namespace: String::new(),
        ready: true,
        status: String::new(),
        status_reason: None,
        revision: target_revision.map(str::to_string),
        path: path.map(str::to_string),
        url: if repo_url.is_empty() { None } else { Some(repo_url.to_string()) },
        last_transition_time: None,
        message: None,
        children: Vec::new(),
        oci_source,
    }
}

fn application_link(name: &str, value: &serde_json::Value) -> ChainLink {
    let sync_status = value.pointer("/status/sync/status").and_then(|v| v.as_str()).unwrap_or_default();
    let health_status = value.pointer("/status/health/status").and_then(|v| v.as_str()).unwrap_or_default();
    let ready = sync_status == "Synced" && health_status == "Healthy";
    let revision = value.pointer("/status/sync/revision").and_then(|v| v.as_str());
    let message = value.pointer("/status/health/message").and_then(|v| v.as_str());

    ChainLink {
        kind: "Application".to_string(),
        name: name.to_string(),
        namespace: str_at(value, &["metadata", "namespace"]).unwrap_or_default().to_string(),
        ready,
        status: format!("sync={sync_status} health={health_status}"),
        status_reason: None,
        revision: revision.map(str::to_string),
        path: None,
        url: None,
        last_transition_time: None,
        message: message.map(str::to_string),
        children: Vec::new(),
        oci_source: None,
    }
}

fn resource_links(value: &serde_json::Value) -> Vec<ChainLink> {
    let Some(resources) = value.pointer("/status/resources").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    resources
        .iter()
        .map(|resource| {
            let status = resource.get("status").and_then(|v| v.as_str()).unwrap_or_default();
            let health = resource.get("health").and_then(|h| h.get("status")).and_then(|v| v.as_str());
            let ready = status == "Synced" && health.is_none_or(|h| h == "Healthy");
            ChainLink {
                kind: resource.get("kind").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                name: resource.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                namespace: resource.get("namespace").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                ready,
                status: status.to_string(),
                status_reason: None,
                revision: None,
                path: None,
                url: None,
                last_transition_time: None,
                message: None,
                children: Vec::new(),
                oci_source: None,
            }
        })
        .collect()
}

fn history(value: &serde_json::Value) -> Vec<HistoryEntry> {
    let Some(entries) = value.pointer("/status/history").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut out: Vec<HistoryEntry> = entries
        .iter()
        .filter_map(|entry| {
            let deployed_at = entry.get("deployStartedAt").and_then(|v| v.as_str())?;
            let timestamp: Timestamp = deployed_at.parse().ok()?;
            let revision = entry.get("revision").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let source = entry
                .pointer("/source/repoURL")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Some(HistoryEntry {
                timestamp,
                revision,
                status: "deployed".to_string(),
                source,
                message: String::new(),
                duration: None,
            })
        })
        .collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

/// Parse the JSON form of `argocd app get` into a [`TraceResult`].
pub fn parse_argo_app(name: &str, namespace: &str, value: &serde_json::Value) -> TraceResult {
    let mut chain = vec![synthesize_source_link(value)];
    chain.push(application_link(name, value));
    chain.extend(resource_links(value));

    let mut result = TraceResult {
        resource: ResourceRef::namespaced("Application", name, namespace),
        tool: "argo".to_string(),
        chain,
        fully_managed: false,
        error: None,
        traced_at: Timestamp::now(),
        confighub: None,
        history: history(value),
        cross_references: Vec::new(),
    };
    result.recompute_fully_managed();
    result
}

/// The Argo forward tracer.
pub struct ArgoTracer<C> {
    collaborator: C,
}

impl<C: ArgoCollaborator> ArgoTracer<C> {
    /// Build a tracer over the given collaborator.
    pub fn new(collaborator: C) -> Self {
        Self { collaborator }
    }

    /// Name reported by the multi-tracer.
    pub fn tool_name(&self) -> &'static str {
        "argo"
    }

    /// True when `argocd` is available and authenticated.
    pub fn available(&self) -> bool {
        self.collaborator.available()
    }

    /// Trace the given Argo `Application` by name.
    pub async fn trace(&self, name: &str, namespace: &str, token: &CancellationToken) -> Result<TraceResult> {
        match self.collaborator.app_get(name, token).await? {
            ArgoAppOutcome::Found(value) => Ok(parse_argo_app(name, namespace, &value)),
            ArgoAppOutcome::NotFound(message) => Ok(TraceResult {
                resource: ResourceRef::namespaced("Application", name, namespace),
                tool: "argo".to_string(),
                chain: Vec::new(),
                fully_managed: false,
                error: Some(message),
                traced_at: Timestamp::now(),
                confighub: None,
                history: Vec::new(),
                cross_references: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn confighub_oci_source_synthesizes_configuhub_oci_link() {
        let app = json!({
            "metadata": {"namespace": "argocd"},
            "spec": {"source": {"repoURL": "oci://oci.api.confighub.com/target/prod/us-west"}},
            "status": {
                "sync": {"status": "Synced"},
                "health": {"status": "Healthy"},
            },
        });
        let result = parse_argo_app("guestbook", "argocd", &app);
        let source = &result.chain[0];
        assert_eq!(source.kind, "ConfigHub OCI");
        assert_eq!(source.name, "prod/us-west");
        let oci = source.oci_source.as_ref().unwrap();
        assert!(oci.is_confighub);
        assert_eq!(oci.space.as_deref(), Some("prod"));
        assert_eq!(oci.target.as_deref(), Some("us-west"));
    }

    #[test]
    fn chart_source_is_helm_chart_kind() {
        let app = json!({
            "spec": {"source": {"repoURL": "https://charts.example.com", "chart": "nginx"}},
            "status": {"sync": {"status": "Synced"}, "health": {"status": "Healthy"}},
        });
        let result = parse_argo_app("nginx-app", "argocd", &app);
        assert_eq!(result.chain[0].kind, "HelmChart");
        assert_eq!(result.chain[0].name, "nginx");
    }

    #[test]
    fn resource_without_health_is_ready_when_synced() {
        let app = json!({
            "spec": {"source": {"repoURL": "https://git.example.com/repo.git"}},
            "status": {
                "sync": {"status": "Synced"},
                "health": {"status": "Healthy"},
                "resources": [{"kind": "ConfigMap", "name": "cfg", "namespace": "ns", "status": "Synced"}],
            },
        });
        let result = parse_argo_app("app", "argocd", &app);
        let resource = result.chain.iter().find(|l| l.kind == "ConfigMap").unwrap();
        assert!(resource.ready);
    }

    #[test]
    fn out_of_sync_application_is_not_fully_managed() {
        let app = json!({
            "spec": {"source": {"repoURL": "https://git.example.com/repo.git"}},
            "status": {"sync": {"status": "OutOfSync"}, "health": {"status": "Degraded"}},
        });
        let result = parse_argo_app("app", "argocd", &app);
        assert!(!result.fully_managed);
    }

    #[test]
    fn fixture_argo_confighub_oci_synthesizes_source_link() {
        use assert_json_diff::assert_json_eq;

        #[derive(serde::Deserialize)]
        struct Input {
            name: String,
            namespace: String,
            app: serde_json::Value,
        }

        let (input, want): (Input, serde_json::Value) = crate::testing::load_fixture(module_path!(), "argo_confighub_oci");
        let result = parse_argo_app(&input.name, &input.namespace, &input.app);
        let source = &result.chain[0];
        let oci = source.oci_source.as_ref().unwrap();
        let got = json!({
            "source_kind": source.kind,
            "source_name": source.name,
            "is_confighub": oci.is_confighub,
            "space": oci.space,
            "target": oci.target,
            "fully_managed": result.fully_managed,
        });
        assert_json_eq!(got, want);
    }
}
