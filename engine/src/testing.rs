//! Test-only scaffolding shared across the engine's unit and fixture
//! tests: an in-memory [`ClusterSession`] fake, and the txtar fixture
//! loader used by the scenario tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use k8s_openapi::api::core::v1::Secret;
use kube::core::{ApiResource, DynamicObject};
use serde::de::DeserializeOwned;
use serde_json::Value;
use simple_txtar::Archive;
use tokio_util::sync::CancellationToken;

use crate::session::{ClusterSession, ListParams};
use crate::Result;

pub use test_log::test;

/// An in-memory cluster: a flat bag of dynamic objects and typed Secrets,
/// filtered the same way a real API server narrows a list call.
#[derive(Clone, Debug, Default)]
pub struct FakeSession {
    objects: Vec<DynamicObject>,
    secrets: Vec<Secret>,
}

impl FakeSession {
    /// An empty fake cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cluster with a dynamic object.
    pub fn with_object(mut self, object: DynamicObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Seed the cluster with a typed Secret.
    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secrets.push(secret);
        self
    }
}

/// A deliberately small `kubectl -l`-style matcher: `key=value`,
/// `key!=value`, bare `key`, `!key`, `key in (a,b)`, `key notin (a,b)`,
/// comma-separated clauses ANDed together.
fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').map(str::trim).filter(|c| !c.is_empty()).all(|clause| {
        if let Some(key) = clause.strip_prefix('!') {
            return !labels.contains_key(key);
        }
        if let Some((key, rest)) = clause.split_once(" notin (") {
            let values: Vec<&str> = rest.trim_end_matches(')').split(',').map(str::trim).collect();
            return labels.get(key.trim()).is_none_or(|v| !values.contains(&v.as_str()));
        }
        if let Some((key, rest)) = clause.split_once(" in (") {
            let values: Vec<&str> = rest.trim_end_matches(')').split(',').map(str::trim).collect();
            return labels.get(key.trim()).is_some_and(|v| values.contains(&v.as_str()));
        }
        if let Some((key, value)) = clause.split_once("!=") {
            return labels.get(key.trim()).map(String::as_str) != Some(value.trim());
        }
        if let Some((key, value)) = clause.split_once('=') {
            return labels.get(key.trim()).map(String::as_str) == Some(value.trim());
        }
        labels.contains_key(clause)
    })
}

impl ClusterSession for FakeSession {
    fn list(&self, resource: &ApiResource, params: ListParams<'_>, _token: &CancellationToken) -> impl Future<Output = Result<Vec<DynamicObject>>> + Send {
        let matches: Vec<DynamicObject> = self
            .objects
            .iter()
            .filter(|o| o.types.as_ref().is_some_and(|t| t.kind == resource.kind))
            .filter(|o| params.namespace.is_none_or(|ns| o.metadata.namespace.as_deref() == Some(ns)))
            .filter(|o| params.label_selector.is_none_or(|sel| matches_selector(&o.metadata.labels.clone().unwrap_or_default(), sel)))
            .cloned()
            .collect();
        async move { Ok(matches) }
    }

    fn get(&self, resource: &ApiResource, namespace: &str, name: &str, _token: &CancellationToken) -> impl Future<Output = Result<Option<DynamicObject>>> + Send {
        let found = self
            .objects
            .iter()
            .find(|o| {
                o.types.as_ref().is_some_and(|t| t.kind == resource.kind)
                    && o.metadata.name.as_deref() == Some(name)
                    && o.metadata.namespace.as_deref().unwrap_or_default() == namespace
            })
            .cloned();
        async move { Ok(found) }
    }

    fn list_secrets(&self, namespace: &str, label_selector: Option<&str>, _token: &CancellationToken) -> impl Future<Output = Result<Vec<Secret>>> + Send {
        let matches: Vec<Secret> = self
            .secrets
            .iter()
            .filter(|s| namespace.is_empty() || s.metadata.namespace.as_deref() == Some(namespace))
            .filter(|s| label_selector.is_none_or(|sel| matches_selector(&s.metadata.labels.clone().unwrap_or_default(), sel)))
            .cloned()
            .collect();
        async move { Ok(matches) }
    }

    fn get_secret(&self, namespace: &str, name: &str, _token: &CancellationToken) -> impl Future<Output = Result<Option<Secret>>> + Send {
        let found = self.secrets.iter().find(|s| s.metadata.name.as_deref() == Some(name) && s.metadata.namespace.as_deref() == Some(namespace)).cloned();
        async move { Ok(found) }
    }
}

/// Load a `fixtures/<module>/<name>.txtar` archive relative to this crate,
/// deserializing its `input.json` file as `K` and returning it alongside
/// the raw `want.json` value for an `assert_json_diff` comparison.
///
/// `module_path` is typically `module_path!()` from the calling test;
/// only its last path segment is used as the fixture subdirectory.
pub fn load_fixture<K: DeserializeOwned>(module_path: &str, name: &str) -> (K, Value) {
    let last_segment = module_path.rsplit("::").next().unwrap_or(module_path);
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(last_segment).join(format!("{name}.txtar"));
    let archive = Archive::from_file(&path).unwrap_or_else(|e| panic!("unable to load txtar at {}: {e}", path.display()));
    let input = archive.get("input.json").unwrap_or_else(|| panic!("{}: malformed txtar, missing input.json", path.display()));
    let want_file = archive.get("want.json").unwrap_or_else(|| panic!("{}: malformed txtar, missing want.json", path.display()));
    let value: K = serde_json::from_str(&input.content).unwrap_or_else(|e| panic!("{}: input.json does not deserialize: {e}", path.display()));
    let want: Value = serde_json::from_str(&want_file.content).unwrap_or_else(|e| panic!("{}: want.json is not valid json: {e}", path.display()));
    (value, want)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_key_value_and_negation() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        assert!(matches_selector(&labels, "app=web"));
        assert!(!matches_selector(&labels, "app=other"));
        assert!(!matches_selector(&labels, "!app"));
        assert!(matches_selector(&labels, "!tier"));
        assert!(matches_selector(&labels, "app in (web,api)"));
        assert!(!matches_selector(&labels, "app notin (web,api)"));
    }

    #[test]
    fn fake_session_filters_by_kind_and_namespace() {
        let deployment: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "demo"},
        }))
        .unwrap();
        let other_namespace: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "other"},
        }))
        .unwrap();
        let session = FakeSession::new().with_object(deployment).with_object(other_namespace);
        let resource = crate::kinds::api_resource_for("Deployment").unwrap();
        let token = CancellationToken::new();
        let found = tokio_test::block_on(session.list(&resource, ListParams { namespace: Some("demo"), ..Default::default() }, &token)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.namespace.as_deref(), Some("demo"));
    }
}
