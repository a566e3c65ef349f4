//! The Helm tracer (§4.3): reads release state directly from the cluster's
//! `sh.helm.release.v1.*` Secrets rather than from an external collaborator.

use base64::Engine;
use flate2::read::GzDecoder;
use std::io::Read;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession};

#[derive(serde::Deserialize)]
struct ReleaseChartMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(serde::Deserialize)]
struct ReleaseChart {
    #[serde(default)]
    metadata: ReleaseChartMetadata,
}

#[derive(serde::Deserialize)]
struct ReleaseInfo {
    #[serde(default)]
    status: String,
}

#[derive(serde::Deserialize)]
struct Release {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    info: ReleaseInfo,
    #[serde(default)]
    chart: ReleaseChart,
    #[serde(default)]
    manifest: String,
}

fn chart_descriptor(release: &Release) -> String {
    if release.chart.metadata.name.is_empty() {
        String::new()
    } else if release.chart.metadata.version.is_empty() {
        release.chart.metadata.name.clone()
    } else {
        format!("{}-{}", release.chart.metadata.name, release.chart.metadata.version)
    }
}

fn decode_release(raw: &[u8]) -> Result<Release> {
    let once = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| crate::Error::Parse(format!("release base64 decode: {e}")))?;
    let mut gz = GzDecoder::new(&once[..]);
    let mut json = Vec::new();
    gz.read_to_end(&mut json).map_err(|e| crate::Error::Parse(format!("release gunzip: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Find a leaf `kind`/`name` pair inside a release's manifest by splitting
/// on `---` and scanning each document's lines case-insensitively, per
/// §4.3's lenient textual match (the manifest is treated as text, not
/// parsed as structured YAML).
fn find_leaf_in_manifest(manifest: &str, kind: &str, name: &str) -> bool {
    let kind_needle = format!("kind: {kind}").to_ascii_lowercase();
    let name_needle = format!("name: {name}").to_ascii_lowercase();
    manifest.split("---").any(|doc| {
        let lower = doc.to_ascii_lowercase();
        lower.lines().any(|l| l.trim() == kind_needle) && lower.lines().any(|l| l.trim() == name_needle)
    })
}

fn helm_chart_link(release: &Release) -> ChainLink {
    ChainLink {
        kind: "HelmChart".to_string(),
        name: release.chart.metadata.name.clone(),
        namespace: String::new(),
        ready: true,
        status: String::new(),
        status_reason: None,
        revision: Some(release.chart.metadata.version.clone()),
        path: None,
        url: None,
        last_transition_time: None,
        message: None,
        children: Vec::new(),
        oci_source: None,
    }
}

fn release_link(release: &Release, namespace: &str) -> ChainLink {
    let ready = release.info.status == "deployed";
    ChainLink {
        kind: "Release".to_string(),
        name: release.name.clone(),
        namespace: namespace.to_string(),
        ready,
        status: release.info.status.clone(),
        status_reason: None,
        revision: Some(release.version.to_string()),
        path: None,
        url: None,
        last_transition_time: None,
        message: None,
        children: Vec::new(),
        oci_source: None,
    }
}

/// The Helm forward tracer. Always "available": it needs only the
/// cluster session, not an external binary.
pub struct HelmTracer;

impl HelmTracer {
    /// Name reported by the multi-tracer.
    pub fn tool_name(&self) -> &'static str {
        "helm"
    }

    /// Helm needs no external tool.
    pub fn available(&self) -> bool {
        true
    }

    /// Trace `kind`/`name` by searching every Helm release in `namespace`
    /// for a manifest document matching it. `kind == "Release"` traces the
    /// release itself directly (chain has no leaf link).
    pub async fn trace<S: ClusterSession>(
        &self,
        session: &S,
        kind: &str,
        name: &str,
        namespace: &str,
        token: &CancellationToken,
    ) -> Result<TraceResult> {
        let resource = ResourceRef::namespaced(kind, name, namespace);
        let label_selector = if kind == "Release" { Some(format!("owner=helm,name={name}")) } else { Some("owner=helm".to_string()) };
        check_cancelled(token)?;
        let secrets = session.list_secrets(namespace, label_selector.as_deref(), token).await?;

        let mut latest_by_release: BTreeMap<String, (i64, Release)> = BTreeMap::new();
        for secret in secrets {
            check_cancelled(token)?;
            let Some(data) = secret.data.as_ref() else { continue };
            let Some(raw) = data.get("release") else { continue };
            let Ok(release) = decode_release(&raw.0) else { continue };
            latest_by_release
                .entry(release.name.clone())
                .and_modify(|(v, r)| {
                    if release.version > *v {
                        *v = release.version;
                        *r = clone_release(&release);
                    }
                })
                .or_insert_with(|| {
                    let v = release.version;
                    (v, release)
                });
        }

        let not_managed = || TraceResult {
            resource: resource.clone(),
            tool: "helm".to_string(),
            chain: Vec::new(),
            fully_managed: false,
            error: Some("resource not managed by helm".to_string()),
            traced_at: Timestamp::now(),
            confighub: None,
            history: Vec::new(),
            cross_references: Vec::new(),
        };

        if kind == "Release" {
            let Some((_, release)) = latest_by_release.remove(name) else {
                return Ok(not_managed());
            };
            let chain = vec![helm_chart_link(&release), release_link(&release, namespace)];
            let mut result = TraceResult {
                resource,
                tool: "helm".to_string(),
                chain,
                fully_managed: false,
                error: None,
                traced_at: Timestamp::now(),
                confighub: None,
                history: Vec::new(),
                cross_references: Vec::new(),
            };
            result.recompute_fully_managed();
            return Ok(result);
        }

        for (_, release) in latest_by_release.values() {
            if find_leaf_in_manifest(&release.manifest, kind, name) {
                let leaf = ChainLink {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    ready: true,
                    status: String::new(),
                    status_reason: None,
                    revision: None,
                    path: None,
                    url: None,
                    last_transition_time: None,
                    message: None,
                    children: Vec::new(),
                    oci_source: None,
                };
                let chain = vec![helm_chart_link(release), release_link(release, namespace), leaf];
                let mut result = TraceResult {
                    resource,
                    tool: "helm".to_string(),
                    chain,
                    fully_managed: false,
                    error: None,
                    traced_at: Timestamp::now(),
                    confighub: None,
                    history: Vec::new(),
                    cross_references: Vec::new(),
                };
                result.recompute_fully_managed();
                return Ok(result);
            }
        }

        Ok(not_managed())
    }

    /// Return a Helm release's revision history, most-recent first.
    pub async fn release_history<S: ClusterSession>(
        &self,
        session: &S,
        namespace: &str,
        release_name: &str,
        token: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>> {
        check_cancelled(token)?;
        let label_selector = format!("owner=helm,name={release_name}");
        let secrets = session.list_secrets(namespace, Some(&label_selector), token).await?;

        let mut entries = Vec::new();
        for secret in secrets {
            let Some(data) = secret.data.as_ref() else { continue };
            let Some(raw) = data.get("release") else { continue };
            let Ok(release) = decode_release(&raw.0) else { continue };
            let timestamp = secret.metadata.creation_timestamp.as_ref().map(|t| t.0).unwrap_or_else(Timestamp::now);
            entries.push(HistoryEntry {
                timestamp,
                revision: release.version.to_string(),
                status: release.info.status.clone(),
                source: chart_descriptor(&release),
                message: String::new(),
                duration: None,
            });
        }
        entries.sort_by(|a, b| b.revision.parse::<i64>().unwrap_or(0).cmp(&a.revision.parse::<i64>().unwrap_or(0)));
        Ok(entries)
    }
}

fn clone_release(release: &Release) -> Release {
    Release {
        name: release.name.clone(),
        version: release.version,
        info: ReleaseInfo { status: release.info.status.clone() },
        chart: ReleaseChart {
            metadata: ReleaseChartMetadata {
                name: release.chart.metadata.name.clone(),
                version: release.chart.metadata.version.clone(),
            },
        },
        manifest: release.manifest.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_leaf_kind_and_name_in_a_manifest_document() {
        let manifest = "\
---
# Source: nginx/templates/configmap.yaml
apiVersion: v1
kind: ConfigMap
name: nginx-config
---
# Source: nginx/templates/deployment.yaml
apiVersion: apps/v1
kind: Deployment
name: nginx
";
        assert!(find_leaf_in_manifest(manifest, "Deployment", "nginx"));
        assert!(!find_leaf_in_manifest(manifest, "Deployment", "other"));
    }

    #[test]
    fn chart_descriptor_joins_name_and_version() {
        let release = Release {
            name: "nginx".to_string(),
            version: 3,
            info: ReleaseInfo { status: "deployed".to_string() },
            chart: ReleaseChart {
                metadata: ReleaseChartMetadata { name: "nginx".to_string(), version: "1.2.3".to_string() },
            },
            manifest: String::new(),
        };
        assert_eq!(chart_descriptor(&release), "nginx-1.2.3");
    }

    #[test]
    fn fixture_helm_history_orders_revisions_most_recent_first() {
        use assert_json_diff::assert_json_eq;
        use k8s_openapi::api::core::v1::Secret;
        use serde_json::json;

        #[derive(serde::Deserialize)]
        struct Input {
            namespace: String,
            release_name: String,
            secrets: Vec<Secret>,
        }

        let (input, want): (Input, serde_json::Value) = crate::testing::load_fixture(module_path!(), "helm_history");
        let session = input.secrets.into_iter().fold(crate::testing::FakeSession::new(), |s, secret| s.with_secret(secret));
        let token = CancellationToken::new();
        let history = tokio_test::block_on(HelmTracer.release_history(&session, &input.namespace, &input.release_name, &token)).unwrap();
        let got = json!({
            "revisions": history.iter().map(|h| h.revision.clone()).collect::<Vec<_>>(),
            "statuses": history.iter().map(|h| h.status.clone()).collect::<Vec<_>>(),
        });
        assert_json_eq!(got, want);
    }
}
