//! The Flux tracer (§4.3): parses `flux trace <kind> <name> [-n <ns>]`
//! textual output into a source→leaf [`TraceResult`].

use tokio_util::sync::CancellationToken;

use super::{status_is_ready, FluxCollaborator};
use crate::oci::parse_oci_source;
use crate::prelude::*;

const SOURCE_HEADERS: &[&str] = &["GitRepository", "OCIRepository", "HelmRepository", "HelmChart", "Bucket"];
const DEPLOYER_HEADERS: &[&str] = &["Kustomization", "HelmRelease"];
const UNMANAGED_MARKERS: &[&str] = &["not managed", "no flux object found"];
const INFRASTRUCTURE_MARKERS: &[&str] = &["failed to"];

struct Section {
    header: String,
    fields: BTreeMap<String, String>,
}

fn parse_sections(text: &str) -> Vec<Section> {
    text.split("---")
        .map(|block| {
            let mut fields = BTreeMap::new();
            let mut first_header = None;
            for line in block.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some((key, value)) = line.split_once(':') {
                    let key = key.trim().to_string();
                    let value = value.trim().to_string();
                    if first_header.is_none()
                        && (key == "Object" || SOURCE_HEADERS.contains(&key.as_str()) || DEPLOYER_HEADERS.contains(&key.as_str()))
                    {
                        first_header = Some(key.clone());
                    }
                    fields.insert(key, value);
                }
            }
            Section {
                header: first_header.unwrap_or_default(),
                fields,
            }
        })
        .filter(|s| !s.header.is_empty())
        .collect()
}

fn section_to_link(section: &Section) -> ChainLink {
    let (kind, name) = if section.header == "Object" {
        let value = section.fields.get("Object").cloned().unwrap_or_default();
        match value.split_once('/') {
            Some((k, n)) => (k.to_string(), n.to_string()),
            None => (String::new(), value),
        }
    } else {
        (section.header.clone(), section.fields.get(&section.header).cloned().unwrap_or_default())
    };

    let namespace = section.fields.get("Namespace").cloned().unwrap_or_default();
    let status = section.fields.get("Status").cloned().unwrap_or_default();
    let message = section.fields.get("Message").cloned();
    let url = section.fields.get("URL").cloned();
    let revision = section.fields.get("Revision").cloned();
    let path = section.fields.get("Path").cloned();
    let ready = if status.is_empty() { true } else { status_is_ready(&status) };
    let oci_source = url.as_deref().map(parse_oci_source);

    ChainLink {
        kind,
        name,
        namespace,
        ready,
        status,
        status_reason: None,
        revision,
        path,
        url,
        last_transition_time: None,
        message,
        children: Vec::new(),
        oci_source,
    }
}

/// Parse `flux trace` output into a [`TraceResult`] for `kind`/`name`/`namespace`.
pub fn parse_flux_trace(kind: &str, name: &str, namespace: &str, text: &str) -> TraceResult {
    let resource = ResourceRef::namespaced(kind, name, namespace);
    let lower = text.to_ascii_lowercase();

    if let Some(marker) = UNMANAGED_MARKERS.iter().chain(INFRASTRUCTURE_MARKERS).find(|m| lower.contains(*m)) {
        let _ = marker;
        return TraceResult {
            resource,
            tool: "flux".to_string(),
            chain: Vec::new(),
            fully_managed: false,
            error: Some(text.trim().to_string()),
            traced_at: Timestamp::now(),
            confighub: None,
            history: Vec::new(),
            cross_references: Vec::new(),
        };
    }

    let sections = parse_sections(text);
    let mut chain: Vec<ChainLink> = sections.iter().map(section_to_link).collect();
    chain.reverse();

    let mut result = TraceResult {
        resource,
        tool: "flux".to_string(),
        chain,
        fully_managed: false,
        error: None,
        traced_at: Timestamp::now(),
        confighub: None,
        history: Vec::new(),
        cross_references: Vec::new(),
    };
    result.recompute_fully_managed();
    result
}

/// The Flux forward tracer.
pub struct FluxTracer<C> {
    collaborator: C,
}

impl<C: FluxCollaborator> FluxTracer<C> {
    /// Build a tracer over the given collaborator.
    pub fn new(collaborator: C) -> Self {
        Self { collaborator }
    }

    /// Name reported by the multi-tracer.
    pub fn tool_name(&self) -> &'static str {
        "flux"
    }

    /// True when the `flux` binary is available to invoke.
    pub fn available(&self) -> bool {
        self.collaborator.available()
    }

    /// Trace the given object via `flux trace`.
    pub async fn trace(&self, kind: &str, name: &str, namespace: &str, token: &CancellationToken) -> Result<TraceResult> {
        let bytes = self.collaborator.trace_bytes(kind, name, namespace, token).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(parse_flux_trace(kind, name, namespace, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Object:        Deployment/nginx
Namespace:     demo
Status:        Managed by Flux
---
Kustomization: apps
Namespace:     flux-system
Status:        Applied revision: main@sha1:abc123
Revision:      main@sha1:abc123
Path:          ./deploy
---
GitRepository: flux-system
Namespace:     flux-system
URL:           https://github.com/acme/gitops.git
Status:        stored artifact for revision 'main@sha1:abc123'
";

    #[test]
    fn parses_and_reverses_to_source_first_order() {
        let result = parse_flux_trace("Deployment", "nginx", "demo", SAMPLE);
        assert_eq!(result.chain.len(), 3);
        assert_eq!(result.chain[0].kind, "GitRepository");
        assert_eq!(result.chain[1].kind, "Kustomization");
        assert_eq!(result.chain[2].kind, "Deployment");
        assert_eq!(result.chain[2].name, "nginx");
        assert!(result.fully_managed);
        assert_eq!(result.error, None);
    }

    #[test]
    fn not_managed_marker_yields_populated_error_and_empty_chain() {
        let result = parse_flux_trace("Deployment", "nginx", "demo", "no Flux object found for Deployment/nginx.demo");
        assert!(result.chain.is_empty());
        assert!(!result.fully_managed);
        assert!(result.error.is_some());
    }

    #[test]
    fn stalled_status_is_not_ready() {
        let text = "\
Object:        Deployment/nginx
Namespace:     demo
Status:        Managed by Flux
---
Kustomization: apps
Namespace:     flux-system
Status:        stalled: dependency not ready
";
        let result = parse_flux_trace("Deployment", "nginx", "demo", text);
        assert!(!result.fully_managed);
    }

    #[test]
    fn fixture_flux_chain_orders_source_to_leaf() {
        use assert_json_diff::assert_json_eq;
        use serde_json::json;

        #[derive(serde::Deserialize)]
        struct Input {
            kind: String,
            name: String,
            namespace: String,
            text: String,
        }

        let (input, want): (Input, serde_json::Value) = crate::testing::load_fixture(module_path!(), "flux_chain");
        let result = parse_flux_trace(&input.kind, &input.name, &input.namespace, &input.text);
        let got = json!({
            "chain_kinds": result.chain.iter().map(|l| l.kind.clone()).collect::<Vec<_>>(),
            "leaf_name": result.resource.name,
            "fully_managed": result.fully_managed,
            "tool": result.tool,
            "error": result.error,
        });
        assert_json_eq!(got, want);
    }
}
