//! The engine's dispatch surface (§2): a cluster session plus a task in,
//! one of the component outputs out. This is the only place the engine's
//! otherwise-independent components (classifier, tracers, scanners,
//! snapshotter) are wired together; nothing downstream of here belongs to
//! any single component.
//!
//! An embedding binary owns cluster-connection bootstrap and external-tool
//! invocation (see the spec's "out of scope" list) and supplies both as
//! collaborators: a [`ClusterSession`] and, for GitOps tracing, a
//! [`FluxCollaborator`]/[`ArgoCollaborator`] pair.

use tokio_util::sync::CancellationToken;

use crate::classifier::classify_object;
use crate::config::ScanConfig;
use crate::crossplane;
use crate::crossref;
use crate::kinds::api_resource_for;
use crate::kyverno::PolicyCatalog;
use crate::prelude::*;
use crate::reverse;
use crate::scan;
use crate::session::{check_cancelled, ClusterSession, ListParams};
use crate::snapshot;
use crate::static_scan;
use crate::tracers::argo::ArgoTracer;
use crate::tracers::flux::FluxTracer;
use crate::tracers::helm::HelmTracer;
use crate::tracers::multi::multi_trace;
use crate::tracers::{ArgoCollaborator, FluxCollaborator};

/// One scanner family within the state/static scanner (§4.7). `ScanTask::All`
/// runs every family and concatenates the findings; per-family failures are
/// never surfaced this way, each family isolates its own per-object errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanFamily {
    /// Stuck reconciliations / sync operations.
    State,
    /// Spec misconfigurations that silently defeat their own intent.
    Silent,
    /// Configurations that will fail at a known future instant.
    Timing,
    /// Dangling cross-references.
    Orphan,
    /// Third-party scanner adapters (Trivy, Kyverno).
    Unresolved,
    /// Every family above, concatenated.
    All,
}

/// A unit of work the engine can be asked to perform. Mirrors the task
/// vocabulary in §2 ("trace resource", "reverse-trace resource", "scan
/// state", "scan dangling", ...).
pub enum Task {
    /// Forward-trace `kind`/`name`/`namespace` through whichever GitOps
    /// tool manages it, then enrich the leaf with any cross-owner
    /// references it carries.
    Trace { kind: String, name: String, namespace: String },
    /// Walk `ownerReferences` upward from `kind`/`name`/`namespace`.
    ReverseTrace { kind: String, name: String, namespace: String },
    /// Resolve a Crossplane managed-resource -> composite -> claim
    /// lineage for `kind`/`name`/`namespace`, searching `candidate_kinds`
    /// for the composite/claim.
    CrossplaneLineage { kind: String, name: String, namespace: String, candidate_kinds: Vec<String> },
    /// Run one or all scanner families against the live cluster.
    Scan(ScanFamily),
    /// Take a point-in-time cluster summary.
    Snapshot,
}

/// The result of dispatching one [`Task`].
pub enum Output {
    /// Result of [`Task::Trace`].
    Trace(Box<TraceResult>),
    /// Result of [`Task::ReverseTrace`].
    ReverseTrace(Box<ReverseTraceResult>),
    /// Result of [`Task::CrossplaneLineage`]. `None` when the target is not
    /// Crossplane-owned.
    CrossplaneLineage(Option<CrossplaneLineage>),
    /// Result of [`Task::Scan`].
    Findings(Vec<Finding>),
    /// Result of [`Task::Snapshot`].
    Snapshot(Box<ContextSnapshot>),
}

/// Ties the engine's components to one cluster session and one pair of
/// GitOps-tool collaborators. Holds no mutable state across requests: every
/// dispatch reads fresh from `session` and returns an owned result.
pub struct Engine<S, F, A> {
    session: S,
    flux: FluxTracer<F>,
    argo: ArgoTracer<A>,
    helm: HelmTracer,
    config: ScanConfig,
}

impl<S, F, A> Engine<S, F, A>
where
    S: ClusterSession,
    F: FluxCollaborator,
    A: ArgoCollaborator,
{
    /// Build an engine over a cluster session and its GitOps-tool
    /// collaborators, with default scan thresholds.
    pub fn new(session: S, flux: F, argo: A) -> Self {
        Self {
            session,
            flux: FluxTracer::new(flux),
            argo: ArgoTracer::new(argo),
            helm: HelmTracer,
            config: ScanConfig::default(),
        }
    }

    /// Override the scanner thresholds (stuck duration, quota ratios,
    /// certificate windows, Kyverno catalog directory).
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch one task to its component, per the data-flow description
    /// in §2: the entry point is the only place that knows about every
    /// component at once.
    #[instrument(skip_all)]
    pub async fn dispatch(&self, task: Task, token: &CancellationToken) -> Result<Output> {
        check_cancelled(token)?;
        match task {
            Task::Trace { kind, name, namespace } => self.trace(&kind, &name, &namespace, token).await.map(Box::new).map(Output::Trace),
            Task::ReverseTrace { kind, name, namespace } => self.reverse_trace(&kind, &name, &namespace, token).await.map(Box::new).map(Output::ReverseTrace),
            Task::CrossplaneLineage { kind, name, namespace, candidate_kinds } => {
                self.crossplane_lineage(&kind, &name, &namespace, &candidate_kinds, token).await.map(Output::CrossplaneLineage)
            }
            Task::Scan(family) => self.scan(family, token).await.map(Output::Findings),
            Task::Snapshot => snapshot::snapshot(&self.session, token).await.map(Box::new).map(Output::Snapshot),
        }
    }

    /// Forward-trace through Flux, Argo, then Helm (first non-empty chain
    /// wins), then attach any cross-owner references the leaf object
    /// carries. A leaf that cannot be refetched (e.g. a synthetic Helm
    /// leaf, or the object vanished between trace and enrichment) simply
    /// leaves `cross_references` empty — enrichment is best-effort, never
    /// fatal to the trace itself.
    pub async fn trace(&self, kind: &str, name: &str, namespace: &str, token: &CancellationToken) -> Result<TraceResult> {
        let mut result = multi_trace(&self.session, &self.flux, &self.argo, &self.helm, kind, name, namespace, token).await?;
        if result.chain.is_empty() {
            return Ok(result);
        }
        if let Ok(gvr) = api_resource_for(kind) {
            if let Some(leaf) = self.session.get(&gvr, namespace, name, token).await? {
                let ownership = classify_object(&leaf);
                result.cross_references = crossref::detect_cross_references(&self.session, &leaf, kind, &ownership, token).await?;
            }
        }
        Ok(result)
    }

    /// Walk `ownerReferences` upward from the given object (§4.4).
    pub async fn reverse_trace(&self, kind: &str, name: &str, namespace: &str, token: &CancellationToken) -> Result<ReverseTraceResult> {
        let gvr = api_resource_for(kind)?;
        reverse::reverse_trace(&self.session, &gvr, namespace, name, token).await
    }

    /// Resolve a Crossplane lineage (§4.6). Fetches the target and the
    /// candidate objects named by `candidate_kinds` cluster-wide, then
    /// resolves purely from labels/ownerReferences.
    pub async fn crossplane_lineage(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        candidate_kinds: &[String],
        token: &CancellationToken,
    ) -> Result<Option<CrossplaneLineage>> {
        let gvr = api_resource_for(kind)?;
        let Some(target) = self.session.get(&gvr, namespace, name, token).await? else {
            return Ok(None);
        };

        let mut candidates = Vec::new();
        for candidate_kind in candidate_kinds {
            check_cancelled(token)?;
            let Ok(candidate_gvr) = api_resource_for(candidate_kind) else {
                continue;
            };
            candidates.extend(self.session.list(&candidate_gvr, ListParams::default(), token).await?);
        }

        Ok(crossplane::resolve_lineage(&target, &candidates))
    }

    /// Run one scanner family, or all of them concatenated (`ScanFamily::All`).
    /// Finding order across families is not guaranteed, per §5.
    pub async fn scan(&self, family: ScanFamily, token: &CancellationToken) -> Result<Vec<Finding>> {
        match family {
            ScanFamily::State => scan::state::scan(&self.session, &self.config, token).await,
            ScanFamily::Silent => scan::silent::scan(&self.session, token).await,
            ScanFamily::Timing => scan::timing::scan(&self.session, &self.config, token).await,
            ScanFamily::Orphan => scan::orphan::scan(&self.session, token).await,
            ScanFamily::Unresolved => scan::unresolved::scan(&self.session, &self.config, token).await,
            ScanFamily::All => {
                let mut findings = scan::state::scan(&self.session, &self.config, token).await?;
                findings.extend(scan::silent::scan(&self.session, token).await?);
                findings.extend(scan::timing::scan(&self.session, &self.config, token).await?);
                findings.extend(scan::orphan::scan(&self.session, token).await?);
                findings.extend(scan::unresolved::scan(&self.session, &self.config, token).await?);
                Ok(findings)
            }
        }
    }

    /// Load a Kyverno policy catalog and pin it into this engine's scan
    /// config, so subsequent `ScanFamily::Unresolved`/`All` scans enrich
    /// Kyverno findings against it.
    pub fn with_kyverno_catalog_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.kyverno_catalog_dir = Some(dir.into());
        self
    }
}

/// Read a multi-document YAML file and run the static pattern-matcher
/// scanner over it (§4.8). Free function, not a method on [`Engine`]: the
/// static scanner takes no cluster session at all.
pub fn scan_static_yaml(text: &str) -> Result<Vec<Finding>> {
    static_scan::scan_yaml(text)
}

/// Load a Kyverno policy catalog directory standalone, for callers that
/// want to inspect/validate it without running a scan.
pub fn load_kyverno_catalog(dir: &std::path::Path) -> Result<PolicyCatalog> {
    PolicyCatalog::load_dir(dir)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::testing::FakeSession;
    use crate::tracers::ArgoAppOutcome;

    struct NoFlux;
    #[async_trait]
    impl FluxCollaborator for NoFlux {
        fn available(&self) -> bool {
            false
        }
        async fn trace_bytes(&self, _kind: &str, _name: &str, _namespace: &str, _token: &CancellationToken) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct NoArgo;
    #[async_trait]
    impl ArgoCollaborator for NoArgo {
        fn available(&self) -> bool {
            false
        }
        async fn app_get(&self, _name: &str, _token: &CancellationToken) -> Result<ArgoAppOutcome> {
            Ok(ArgoAppOutcome::NotFound("unavailable".to_string()))
        }
    }

    fn engine(session: FakeSession) -> Engine<FakeSession, NoFlux, NoArgo> {
        Engine::new(session, NoFlux, NoArgo)
    }

    #[test]
    fn trace_falls_back_to_not_managed_when_no_tool_claims_the_object() {
        let eng = engine(FakeSession::new());
        let token = CancellationToken::new();
        let result = tokio_test::block_on(eng.trace("Deployment", "nginx", "demo", &token)).unwrap();
        assert!(result.chain.is_empty());
        assert!(!result.fully_managed);
        assert_eq!(result.error.as_deref(), Some("resource not managed by any detected GitOps tool"));
    }

    #[test]
    fn reverse_trace_of_missing_object_yields_unknown_owner() {
        let eng = engine(FakeSession::new());
        let token = CancellationToken::new();
        let result = tokio_test::block_on(eng.reverse_trace("Deployment", "nginx", "demo", &token)).unwrap();
        assert!(result.chain.is_empty());
        assert_eq!(result.owner, "unknown");
    }

    #[test]
    fn scan_all_concatenates_every_family() {
        let eng = engine(FakeSession::new());
        let token = CancellationToken::new();
        let findings = tokio_test::block_on(eng.scan(ScanFamily::All, &token)).unwrap();
        assert!(findings.is_empty(), "an empty cluster produces no findings from any family");
    }

    #[test]
    fn static_scan_is_reachable_without_a_session() {
        let findings = scan_static_yaml("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n").unwrap();
        assert!(findings.is_empty());
    }
}
