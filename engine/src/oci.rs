//! `oci://` URL parsing (§4.1).
//!
//! ConfigHub-shaped registries prefix the host with `oci.` and lay out the
//! repository as `target/<space>/<target>`. Everything else is generic OCI.

use crate::prelude::*;

/// Parse a source URL into an [`OciSourceInfo`].
///
/// Non-`oci://` inputs produce an `OciSourceInfo` with only `raw_url` set,
/// per the spec's invariant for OCISourceInfo.
pub fn parse_oci_source(url: &str) -> OciSourceInfo {
    let mut info = OciSourceInfo {
        raw_url: url.to_string(),
        ..Default::default()
    };

    let Some(rest) = url.strip_prefix("oci://") else {
        return info;
    };
    let Some((registry, repository)) = rest.split_once('/') else {
        info.registry = Some(rest.to_string());
        return info;
    };

    info.registry = Some(registry.to_string());
    info.repository = Some(repository.to_string());

    let Some(instance_host) = registry.strip_prefix("oci.") else {
        return info;
    };
    info.is_confighub = true;
    info.instance_host = Some(instance_host.to_string());

    if let Some(tail) = repository.strip_prefix("target/") {
        let mut parts = tail.splitn(2, '/');
        if let (Some(space), Some(target)) = (parts.next(), parts.next()) {
            info.space = Some(space.to_string());
            info.target = Some(target.to_string());
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confighub_oci_source_extracts_space_and_target() {
        let info = parse_oci_source("oci://oci.api.confighub.com/target/prod/us-west");
        assert!(info.is_confighub);
        assert_eq!(info.instance_host.as_deref(), Some("api.confighub.com"));
        assert_eq!(info.space.as_deref(), Some("prod"));
        assert_eq!(info.target.as_deref(), Some("us-west"));
        assert_eq!(info.format_confighub_source(), "prod/us-west");
    }

    #[test]
    fn generic_oci_source_has_no_confighub_fields() {
        let info = parse_oci_source("oci://ghcr.io/acme/charts/widget");
        assert!(!info.is_confighub);
        assert_eq!(info.registry.as_deref(), Some("ghcr.io"));
        assert_eq!(info.repository.as_deref(), Some("acme/charts/widget"));
        assert_eq!(info.format_confighub_source(), info.raw_url);
    }

    #[test]
    fn non_oci_url_only_populates_raw_url() {
        let info = parse_oci_source("https://github.com/acme/repo.git");
        assert!(info.registry.is_none());
        assert!(!info.is_confighub);
        assert_eq!(info.format_confighub_source(), info.raw_url);
    }

    #[test]
    fn confighub_registry_without_target_segment_keeps_space_and_target_empty() {
        let info = parse_oci_source("oci://oci.api.confighub.com/other/path");
        assert!(info.is_confighub);
        assert!(info.space.is_none());
        assert!(info.target.is_none());
    }
}
