//! Forward tracers (§4.3): turn a tool's own output into a source→leaf
//! [`TraceResult`]. Flux and Argo consume bytes/JSON supplied by an external
//! collaborator (the `flux`/`argocd` CLI is the embedding binary's
//! responsibility to invoke); Helm reads the cluster directly since release
//! state lives in Secrets.

pub mod argo;
pub mod flux;
pub mod helm;
pub mod multi;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;

/// Supplies the bytes of `flux trace <kind> <name> [-n <ns>]`.
#[async_trait]
pub trait FluxCollaborator: Send + Sync {
    /// True when the `flux` binary is available to invoke.
    fn available(&self) -> bool;
    /// Invoke `flux trace` and return its raw stdout.
    async fn trace_bytes(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>>;
}

/// Outcome of invoking `argocd app get`: either the application's JSON
/// document, or a tool-reported "not found" (a data outcome, not a
/// Go-level error — see the error taxonomy's NotManaged class).
pub enum ArgoAppOutcome {
    /// The application exists; this is its JSON document.
    Found(serde_json::Value),
    /// `argocd` reported no such application.
    NotFound(String),
}

/// Supplies the JSON document of `argocd app get -o json`.
#[async_trait]
pub trait ArgoCollaborator: Send + Sync {
    /// True when the `argocd` binary is available and authenticated.
    fn available(&self) -> bool;
    /// Invoke `argocd app get`. Authentication/connectivity failures
    /// ("not logged in", "authentication required", "server address
    /// unspecified") surface as `Err`; a tool-reported "not found"
    /// surfaces as `Ok(ArgoAppOutcome::NotFound(..))`.
    async fn app_get(&self, name: &str, token: &CancellationToken) -> Result<ArgoAppOutcome>;
}

/// Case-insensitive substring readiness classifier shared by the Flux and
/// Argo tracers: negatives are tested first, then positives. Neither
/// matching is the same as "unknown", which callers treat per-tool.
pub(crate) fn status_is_ready(status: &str) -> bool {
    let s = status.to_ascii_lowercase();
    const NEGATIVE: &[&str] = &["failed", "error", "not ready", "stalled", "suspended", "reconciling", "pending"];
    if NEGATIVE.iter().any(|n| s.contains(n)) {
        return false;
    }
    const POSITIVE: &[&str] = &["applied", "succeeded", "ready", "up to date", "stored", "artifact is"];
    POSITIVE.iter().any(|p| s.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_status_outranks_positive_substring() {
        assert!(!status_is_ready("reconciling in progress"));
        assert!(!status_is_ready("HelmChart is not ready"));
    }

    #[test]
    fn positive_status_recognized() {
        assert!(status_is_ready("Applied revision: main@sha1:abc"));
        assert!(status_is_ready("Up to date"));
    }

    #[test]
    fn unrecognized_status_is_not_ready() {
        assert!(!status_is_ready("something else entirely"));
    }
}
