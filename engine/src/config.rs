//! Scan configuration (§A.3): thresholds are caller-supplied, never read
//! from environment or file by the engine. Construct one and thread it
//! through scan calls as a plain argument.

use jiff::SignedDuration;

/// Thresholds governing the scanner families in [`crate::scan`].
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// How long a non-suspended resource may sit in a failure condition
    /// before the STATE family flags it. Default 5 minutes.
    pub stuck_threshold: SignedDuration,
    /// ResourceQuota usage ratio that triggers a warning (default 0.90).
    pub quota_warn_ratio: f64,
    /// ResourceQuota usage ratio that triggers critical (default 0.95).
    pub quota_critical_ratio: f64,
    /// Certificate expiry window for a critical finding (default 3 days).
    pub cert_critical_window: SignedDuration,
    /// Certificate expiry window for a warning finding (default 14 days).
    pub cert_warning_window: SignedDuration,
    /// Certificate expiry window for an info finding (default 30 days).
    pub cert_info_window: SignedDuration,
    /// Directory of `KPOL-*.yaml` catalog files for the Kyverno adapter, if any.
    pub kyverno_catalog_dir: Option<std::path::PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: SignedDuration::from_secs(5 * 60),
            quota_warn_ratio: 0.90,
            quota_critical_ratio: 0.95,
            cert_critical_window: SignedDuration::from_secs(3 * 24 * 3600),
            cert_warning_window: SignedDuration::from_secs(14 * 24 * 3600),
            cert_info_window: SignedDuration::from_secs(30 * 24 * 3600),
            kyverno_catalog_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_thresholds() {
        let config = ScanConfig::default();
        assert_eq!(config.quota_warn_ratio, 0.90);
        assert_eq!(config.quota_critical_ratio, 0.95);
    }
}
