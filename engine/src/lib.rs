#![warn(missing_docs)]
//! The analysis engine: ownership classification, multi-tool forward/reverse
//! tracing, and the scanner family that turns live cluster state into
//! findings.
//!
//! This crate never talks to a cluster on its own. Every public entry point
//! takes a [`session::ClusterSession`] implementation supplied by the
//! embedding binary, and the Flux/Argo tracers take an external-tool
//! collaborator the same way. See `docs` on [`entry`] for the dispatch
//! surface.

/// Prelude is the common set of imports for engine modules.
pub(crate) mod prelude {
    pub use std::collections::BTreeMap;

    pub use jiff::Timestamp;
    pub use tracing::{debug, error, instrument, trace, warn};

    pub use scout_model::*;

    pub use crate::{Error, Result};
}

pub mod classifier;
pub mod config;
pub mod crossplane;
pub mod crossref;
pub mod entry;
pub mod kinds;
pub mod kyverno;
pub mod oci;
pub mod reverse;
pub mod scan;
pub mod session;
pub mod static_scan;
pub mod snapshot;
pub mod tracers;

#[cfg(test)]
pub(crate) mod testing;

/// Error is the engine's unified error type.
///
/// Per the error taxonomy in the spec's error handling section: this type
/// carries only the `ToolInfrastructure`/`ResourceLookup` classes of error
/// (the ones that stop a single operation). `NotManaged`,
/// `ToolUnavailable`, and `Classifier-Unknown` are data outcomes carried in
/// result fields, never `Err` values; `ParseFailure` is isolated per-object
/// by scanners and tracers rather than propagated.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A `kube` client call failed.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// A kind string did not resolve against the static kind table.
    #[error("unknown kind: {0}")]
    UnknownKind(String),
    /// A value could not be parsed (duration, PEM, base64, gzip, ...).
    #[error("parse error: {0}")]
    Parse(String),
    /// The object required for this operation could not be found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Catch-all for collaborator/infrastructure failures (process invocation,
    /// authentication, malformed tool output).
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result typedef for the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;
