//! The engine's sole collaborator for live cluster state.
//!
//! `ClusterSession` is deliberately thin: four read-only operations, each
//! cancellable, each returning "not found" as data rather than as an error.
//! Cluster-connection bootstrap (kubeconfig loading, client construction) is
//! the embedding binary's job, not the engine's — see the spec's "out of
//! scope" list.

use std::future::Future;

use k8s_openapi::api::core::v1::Secret;
use kube::core::{ApiResource, DynamicObject};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// A label selector, passed through to the cluster session verbatim
/// (`key=value,key2=value2` syntax, same as `kubectl -l`).
pub type LabelSelector = str;

/// A field selector, passed through to the cluster session verbatim.
pub type FieldSelector = str;

/// Parameters narrowing a [`ClusterSession::list`] call.
#[derive(Clone, Debug, Default)]
pub struct ListParams<'a> {
    /// Restrict to one namespace; `None` lists across all namespaces.
    pub namespace: Option<&'a str>,
    /// Restrict by label selector.
    pub label_selector: Option<&'a LabelSelector>,
    /// Restrict by field selector.
    pub field_selector: Option<&'a FieldSelector>,
}

/// The engine's read-only view of a live cluster.
///
/// Implementations are supplied by the embedding binary. Every method is
/// cancellable and distinguishes "the object does not exist" (`Ok(None)` /
/// an empty list) from "the read failed" (`Err`).
pub trait ClusterSession: Send + Sync {
    /// List objects of the given resource type.
    fn list(
        &self,
        resource: &ApiResource,
        params: ListParams<'_>,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<DynamicObject>>> + Send;

    /// Fetch one object by name. Returns `Ok(None)` when it does not exist.
    fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Option<DynamicObject>>> + Send;

    /// List Secrets via the typed API (only the Helm tracer needs this,
    /// because the release blob lives under `data["release"]`).
    fn list_secrets(
        &self,
        namespace: &str,
        label_selector: Option<&LabelSelector>,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Secret>>> + Send;

    /// Fetch one Secret by name via the typed API.
    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Secret>>> + Send;
}

/// True when the token has already been cancelled; call at every suspension
/// point per the spec's cancellation contract.
pub fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(crate::Error::Other(anyhow::anyhow!("operation cancelled")));
    }
    Ok(())
}
