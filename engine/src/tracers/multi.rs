//! The multi-tracer (§4.3): tries Flux, Argo, then Helm in a fixed order,
//! skipping unavailable tools, and returns the first non-empty chain.

use tokio_util::sync::CancellationToken;

use super::argo::ArgoTracer;
use super::flux::FluxTracer;
use super::helm::HelmTracer;
use super::{ArgoCollaborator, FluxCollaborator};
use crate::prelude::*;
use crate::session::ClusterSession;

/// Trace `kind`/`name`/`namespace` against Flux, then Argo, then Helm.
///
/// Returns the first tracer's result whose chain is non-empty. If every
/// tracer is unavailable or produces an empty chain — and none returned a
/// Go-level error — the result carries an empty chain, `fully_managed =
/// false`, and the standard "not managed by any detected GitOps tool"
/// message.
pub async fn multi_trace<S, F, A>(
    session: &S,
    flux: &FluxTracer<F>,
    argo: &ArgoTracer<A>,
    helm: &HelmTracer,
    kind: &str,
    name: &str,
    namespace: &str,
    token: &CancellationToken,
) -> Result<TraceResult>
where
    S: ClusterSession,
    F: FluxCollaborator,
    A: ArgoCollaborator,
{
    if flux.available() {
        let result = flux.trace(kind, name, namespace, token).await?;
        if !result.chain.is_empty() {
            return Ok(result);
        }
    }

    if argo.available() && kind == "Application" {
        let result = argo.trace(name, namespace, token).await?;
        if !result.chain.is_empty() {
            return Ok(result);
        }
    }

    if helm.available() {
        let result = helm.trace(session, kind, name, namespace, token).await?;
        if !result.chain.is_empty() {
            return Ok(result);
        }
    }

    Ok(TraceResult {
        resource: ResourceRef::namespaced(kind, name, namespace),
        tool: "none".to_string(),
        chain: Vec::new(),
        fully_managed: false,
        error: Some("resource not managed by any detected GitOps tool".to_string()),
        traced_at: Timestamp::now(),
        confighub: None,
        history: Vec::new(),
        cross_references: Vec::new(),
    })
}
