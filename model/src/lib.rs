//! Domain model shared by every component of the cluster observer engine.
//!
//! Everything here is plain, immutable data: the engine's own types are a
//! closed set (see the "dynamic maps replace open schemas" design note) even
//! though the cluster objects it reads are schemaless. Nothing in this crate
//! talks to a cluster or parses anything; it only describes the shapes other
//! crates produce and consume.
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use jiff::{Span, Timestamp};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The universal identifier of a live cluster object.
///
/// Two refs are equal iff all attributes are equal. `namespace` is empty for
/// cluster-scoped objects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Kubernetes kind, e.g. `Deployment`.
    pub kind: String,
    /// Object name.
    pub name: String,
    /// Namespace, empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// API group, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// API version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ResourceRef {
    /// Build a namespaced ref.
    pub fn namespaced(kind: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            group: None,
            version: None,
        }
    }

    /// Build a cluster-scoped ref.
    pub fn cluster_scoped(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: String::new(),
            group: None,
            version: None,
        }
    }

    /// True when `kind` and `name` are both non-empty, per the ResourceRef invariant.
    pub fn is_valid(&self) -> bool {
        !self.kind.is_empty() && !self.name.is_empty()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{} in {}", self.kind, self.name, self.namespace)
        }
    }
}

/// Which GitOps (or native) tool owns an object, as decided by the classifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    /// Flux CD (Kustomization or HelmRelease).
    Flux,
    /// Argo CD Application.
    Argo,
    /// Plain Helm (no GitOps controller in front of it).
    Helm,
    /// Terraform / HCP Terraform workspace.
    Terraform,
    /// ConfigHub unit.
    #[strum(serialize = "confighub")]
    #[serde(rename = "confighub")]
    ConfigHub,
    /// Crossplane claim, composite, or managed resource.
    Crossplane,
    /// Native Kubernetes controller (Deployment -> ReplicaSet, etc.).
    K8s,
    /// No ownership signal matched.
    #[default]
    Unknown,
}

/// Classifier output: which tool owns an object, and the specifics of that ownership.
///
/// Invariant: whenever `owner_type != Unknown`, `sub_type` is non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    /// The owning tool, or `Unknown`.
    #[serde(rename = "type")]
    pub owner_type: OwnerType,
    /// Lowercase qualifier: `kustomization`, `helmrelease`, `application`, `release`,
    /// `workspace`, `unit`, `claim`, `composite`, `managed-resource`, or the native
    /// owner's kind lowercased.
    #[serde(rename = "subType", default, skip_serializing_if = "String::is_empty")]
    pub sub_type: String,
    /// Owner object name, when the owner type requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owner object namespace, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Ownership {
    /// The `unknown` ownership value.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// True when no ownership signal matched.
    pub fn is_unknown(&self) -> bool {
        self.owner_type == OwnerType::Unknown
    }
}

/// Parsed form of an `oci://` URL.
///
/// Invariant: when `is_confighub`, `repository` begins with `target/` and
/// `(space, target)` are the next two path segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciSourceInfo {
    /// The raw, unmodified URL as supplied.
    pub raw_url: String,
    /// Registry host, e.g. `oci.api.confighub.com`. Absent for non-`oci://` URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    /// Repository path (everything after the first `/`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// True when the registry host begins with `oci.` (a ConfigHub-shaped registry).
    #[serde(default)]
    pub is_confighub: bool,
    /// Instance host, i.e. the registry host with the leading `oci.` stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_host: Option<String>,
    /// ConfigHub space, extracted from `target/<space>/<target>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    /// ConfigHub target, extracted from `target/<space>/<target>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl OciSourceInfo {
    /// Format as `space/target` for a resolved ConfigHub source, else the raw URL.
    pub fn format_confighub_source(&self) -> String {
        match (self.is_confighub, &self.space, &self.target) {
            (true, Some(space), Some(target)) => format!("{space}/{target}"),
            _ => self.raw_url.clone(),
        }
    }
}

/// One node in a forward trace, ordered source -> leaf.
///
/// Invariant: the first link's kind is a recognized source kind (GitRepository,
/// OCIRepository, HelmRepository, HelmChart, or the synthetic `Source`);
/// subsequent links are the deployer, then the leaf(ves).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Object kind.
    pub kind: String,
    /// Object name.
    pub name: String,
    /// Object namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Whether the link is considered ready, per the tool's own vocabulary.
    pub ready: bool,
    /// Free-form status string as reported by the tool.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// Machine-readable reason for the status, when the tool provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// Revision/version string, for deployer and source links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Kustomize-style path, for deployer links that apply a subdirectory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Source URL, for source links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Last condition transition time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Timestamp>,
    /// Human-readable message, when the tool provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Children referenced by this link (used by the Argo tracer for managed resources).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResourceRef>,
    /// Parsed OCI source info, when `url` is an `oci://` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_source: Option<OciSourceInfo>,
}

/// One entry in a deployer's revision history, most-recent first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When this revision was deployed.
    pub timestamp: Timestamp,
    /// Revision identifier (commit, chart version, application revision, ...).
    pub revision: String,
    /// Status string for this revision.
    pub status: String,
    /// Source descriptor (repo URL, chart name, ...).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Human-readable message for this revision.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// How long this revision took to apply, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Span>,
}

/// Status of one extracted cross-reference's target object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReferenceStatus {
    /// The target was found in the cluster.
    Exists,
    /// The target was looked up and does not exist.
    Missing,
    /// The target's existence could not be determined (no GVR / no session support).
    Unknown,
}

/// A workload -> Secret/ConfigMap reference whose target has different ownership
/// than the workload itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    /// The referencing object.
    pub source: ResourceRef,
    /// The referenced object.
    pub target: ResourceRef,
    /// Where the reference was found, e.g. `envFrom.secretRef` or `volume.configMap`.
    pub ref_type: String,
    /// Whether the target was found.
    pub status: ReferenceStatus,
    /// The target's ownership, when it could be determined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ownership: Option<Ownership>,
}

/// ConfigHub enrichment attached to a `TraceResult` when the traced chain resolves
/// to a ConfigHub-managed source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigHubEnrichment {
    /// ConfigHub space name.
    pub space: String,
    /// ConfigHub unit slug.
    pub unit: String,
    /// ConfigHub target name, when the source is target-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// The result of a forward trace: an ordered source -> leaf chain plus metadata.
///
/// Invariant: `fully_managed == (!chain.is_empty() && chain.iter().all(|l| l.ready))`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceResult {
    /// The object the trace was requested for.
    pub resource: ResourceRef,
    /// Name of the tool that produced the chain (`"flux"`, `"argo"`, `"helm"`, or
    /// the multi-tracer's chosen tool).
    pub tool: String,
    /// Source -> leaf ordered chain. Empty when the object is not managed by this tool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<ChainLink>,
    /// Conjunction of `chain[*].ready`, false when the chain is empty.
    pub fully_managed: bool,
    /// Populated when the tool reported the object is not in its purview, or when
    /// no tracer in a multi-trace produced a chain. Not a hard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When this trace was produced.
    pub traced_at: Timestamp,
    /// ConfigHub enrichment, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confighub: Option<ConfigHubEnrichment>,
    /// Revision history, most-recent first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    /// Cross-owner references discovered off the leaf object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_references: Vec<CrossReference>,
}

impl TraceResult {
    /// Recompute `fully_managed` from `chain`, per the invariant in §3.
    pub fn recompute_fully_managed(&mut self) {
        self.fully_managed = !self.chain.is_empty() && self.chain.iter().all(|l| l.ready);
    }
}

/// Metadata preserved for a top-of-chain object with no recognized GitOps owner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrphanMetadata {
    /// Labels copied verbatim.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations copied verbatim, excluding `kubectl.kubernetes.io/last-applied-configuration`.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// The `kubectl.kubernetes.io/last-applied-configuration` annotation value, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_configuration: Option<String>,
    /// Object creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

/// The result of walking `ownerReferences` bottom-up from an arbitrary object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReverseTraceResult {
    /// Chain from the starting object up to (and including) the top-of-chain owner.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<ChainLink>,
    /// Classifier-derived owner label for the top object
    /// (`"flux"|"argo"|"helm"|"confighub"|"terraform"|"native"|"unknown"`).
    pub owner: String,
    /// Populated only when `owner == "native"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphan: Option<OrphanMetadata>,
}

/// One node of a Crossplane managed -> composite -> claim lineage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    /// The node's resource identity.
    pub resource: ResourceRef,
    /// True iff the resolver located the object in the supplied candidate index.
    pub present: bool,
}

/// A managed-resource -> composite -> (optional) claim lineage, as resolved purely
/// from labels/ownerReferences and a caller-supplied candidate set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossplaneLineage {
    /// The managed resource the lineage was resolved for.
    pub managed: LineageNode,
    /// The owning composite resource, when one was identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<LineageNode>,
    /// The owning claim, when one was identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<LineageNode>,
    /// Which signals contributed to this lineage, e.g. `label:crossplane.io/composite`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// Category of a finding, matching the scanner family that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FindingCategory {
    /// Stuck reconciliations / sync operations.
    State,
    /// Spec misconfigurations that silently defeat their own intent.
    Silent,
    /// Configurations that will fail at a known future instant.
    Timing,
    /// General configuration problems not covered by a more specific category.
    Config,
    /// Cross-object dependency problems.
    Depend,
    /// Networking misconfiguration (Ingress, NetworkPolicy, Service).
    Network,
    /// Upgrade landmines (deprecated API versions, CRD version drops).
    Upgrade,
    /// Resource pressure (quotas, limits).
    Resource,
    /// Dangling references to nonexistent objects.
    Orphan,
    /// Findings sourced from a third-party scanner (Trivy, Kyverno, ...).
    Unresolved,
}

/// Finding severity. Orders `Info < Warning < Critical` so severities can be
/// compared with `<`/`>=` (see P7, severity monotonicity).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; no action required.
    Info,
    /// Should be looked at soon.
    Warning,
    /// Needs immediate attention.
    Critical,
}

/// The uniform shape emitted by every scanner.
///
/// Invariant: `(id, kind, name, namespace)` uniquely identifies a finding within
/// one scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable finding identifier (a "CCVE" string). Treat as opaque.
    pub id: String,
    /// Which scanner family produced this finding.
    pub category: FindingCategory,
    /// How urgently this needs attention.
    pub severity: Severity,
    /// Affected object kind.
    pub kind: String,
    /// Affected object name.
    pub name: String,
    /// Affected object namespace, empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Machine-readable condition/reason that triggered this finding.
    pub condition: String,
    /// Short human-readable message.
    pub message: String,
    /// Suggested remediation, in prose.
    pub remediation: String,
    /// An optional shell command demonstrating a safe next step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Finding {
    /// The tuple that must be unique within one scan.
    pub fn identity(&self) -> (&str, &str, &str, &str) {
        (&self.id, &self.kind, &self.name, &self.namespace)
    }
}

/// Tri-state workload health, as sampled by the context snapshotter (§4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkloadHealth {
    /// Replica count matches desired and no condition reports trouble.
    Healthy,
    /// Some but not all desired replicas are ready.
    Degraded,
    /// No replicas are ready, or an `Available` condition reports `False`.
    Critical,
}

/// One sampled workload in a [`ContextSnapshot`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSummary {
    /// The workload's identity.
    pub resource: ResourceRef,
    /// Its classified ownership.
    pub ownership: Ownership,
    /// Its sampled health.
    pub health: WorkloadHealth,
}

/// A recent cluster Event, reduced to the fields the snapshotter needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    /// The object the event is about.
    pub involved_object: ResourceRef,
    /// Event reason, e.g. `ReconciliationSucceeded`.
    pub reason: String,
    /// Event message.
    pub message: String,
    /// Raw `source.component` string, e.g. `kustomize-controller`.
    pub component: String,
    /// Tool the component substring was classified as, when recognized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<OwnerType>,
    /// When the event last fired.
    pub last_seen: Timestamp,
}

/// One edge in the snapshot's shallow dependency graph: a workload
/// referencing a ConfigMap/Secret by volume or env.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The referencing workload.
    pub from: ResourceRef,
    /// The referenced ConfigMap/Secret.
    pub to: ResourceRef,
    /// Where the reference was found, e.g. `volume.configMap`.
    pub ref_type: String,
}

/// A point-in-time cluster summary (§4.10): workload health, ownership
/// breakdown, recent events, and a dependency graph scoped to the
/// workloads flagged critical.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Sampled Deployments/StatefulSets/DaemonSets.
    pub workloads: Vec<WorkloadSummary>,
    /// Count of sampled workloads per ownership type.
    pub ownership_breakdown: BTreeMap<OwnerType, usize>,
    /// Most recent 20 Events within the last hour.
    pub recent_events: Vec<EventSummary>,
    /// Dependency edges for workloads sampled as critical.
    pub dependency_edges: Vec<DependencyEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ref_display_matches_namespace_presence() {
        let namespaced = ResourceRef::namespaced("Deployment", "nginx", "demo");
        assert_eq!(namespaced.to_string(), "Deployment/nginx in demo");

        let cluster = ResourceRef::cluster_scoped("ClusterRole", "admin");
        assert_eq!(cluster.to_string(), "ClusterRole/admin");
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn oci_source_formats_confighub_as_space_target() {
        let info = OciSourceInfo {
            raw_url: "oci://oci.api.confighub.com/target/prod/us-west".into(),
            is_confighub: true,
            space: Some("prod".into()),
            target: Some("us-west".into()),
            ..Default::default()
        };
        assert_eq!(info.format_confighub_source(), "prod/us-west");

        let generic = OciSourceInfo {
            raw_url: "oci://ghcr.io/acme/charts".into(),
            ..Default::default()
        };
        assert_eq!(generic.format_confighub_source(), "oci://ghcr.io/acme/charts");
    }

    #[test]
    fn ownership_unknown_has_no_sub_type() {
        let o = Ownership::unknown();
        assert!(o.is_unknown());
        assert!(o.sub_type.is_empty());
    }
}
