//! TIMING family (§4.7): configurations that will fail at a known future
//! instant — certificate expiry, quota exhaustion, and disruption-budget /
//! autoscaler misconfigurations that are really timing bombs in disguise.

use jiff::SignedDuration;
use kube::core::DynamicObject;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::finding_id;
use crate::config::ScanConfig;
use crate::kinds::api_resource_for;
use crate::prelude::*;
use crate::session::{check_cancelled, ClusterSession, ListParams};

fn cert_severity(remaining: SignedDuration, config: &ScanConfig) -> Option<Severity> {
    if remaining <= config.cert_critical_window {
        Some(Severity::Critical)
    } else if remaining <= config.cert_warning_window {
        Some(Severity::Warning)
    } else if remaining <= config.cert_info_window {
        Some(Severity::Info)
    } else {
        None
    }
}

fn cert_expiry_finding(kind: &str, name: &str, namespace: &str, not_after: Timestamp, config: &ScanConfig) -> Option<Finding> {
    let remaining = not_after.duration_since(Timestamp::now());
    if remaining.is_negative() {
        return Some(Finding {
            id: finding_id("TIMING-CERT-EXPIRED", kind, name, namespace),
            category: FindingCategory::Timing,
            severity: Severity::Critical,
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            condition: "CertificateExpired".to_string(),
            message: "certificate has already expired".to_string(),
            remediation: "rotate or reissue the certificate immediately".to_string(),
            command: None,
        });
    }
    let severity = cert_severity(remaining, config)?;
    Some(Finding {
        id: finding_id("TIMING-CERT-EXPIRY", kind, name, namespace),
        category: FindingCategory::Timing,
        severity,
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        condition: "CertificateExpiringSoon".to_string(),
        message: format!("certificate expires at {not_after}"),
        remediation: "confirm automatic renewal is configured, or rotate manually".to_string(),
        command: None,
    })
}

async fn scan_cert_manager_certificates<S: ClusterSession>(session: &S, config: &ScanConfig, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("Certificate")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let Some(not_after) = object.data.pointer("/status/notAfter").and_then(Value::as_str) else { continue };
        let Ok(not_after) = not_after.parse::<Timestamp>() else { continue };
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        findings.extend(cert_expiry_finding("Certificate", &name, &namespace, not_after, config));
    }
    Ok(findings)
}

fn parse_tls_not_after(pem_bytes: &[u8]) -> Option<Timestamp> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem_bytes).ok()?;
    let (_, cert) = X509Certificate::from_der(&pem.contents).ok()?;
    let not_after = cert.validity().not_after;
    Timestamp::from_second(not_after.timestamp()).ok()
}

async fn scan_tls_secrets<S: ClusterSession>(session: &S, config: &ScanConfig, token: &CancellationToken) -> Result<Vec<Finding>> {
    let secrets = session.list_secrets("", None, token).await?;
    let mut findings = Vec::new();
    for secret in secrets {
        check_cancelled(token)?;
        if secret.metadata.labels.as_ref().is_some_and(|l| l.contains_key("cert-manager.io/certificate-name")) {
            continue;
        }
        let Some(data) = secret.data.as_ref() else { continue };
        let Some(tls_crt) = data.get("tls.crt") else { continue };
        let Some(not_after) = parse_tls_not_after(&tls_crt.0) else { continue };
        let name = secret.metadata.name.clone().unwrap_or_default();
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        findings.extend(cert_expiry_finding("Secret", &name, &namespace, not_after, config));
    }
    Ok(findings)
}

fn parse_quantity(text: &str) -> Option<f64> {
    const BINARY_SUFFIXES: &[(&str, f64)] = &[("Ki", 1024.0), ("Mi", 1024f64.powi(2)), ("Gi", 1024f64.powi(3)), ("Ti", 1024f64.powi(4))];
    const SI_SUFFIXES: &[(&str, f64)] = &[("n", 1e-9), ("u", 1e-6), ("m", 1e-3), ("k", 1e3), ("M", 1e6), ("G", 1e9), ("T", 1e12)];

    for (suffix, factor) in BINARY_SUFFIXES {
        if let Some(prefix) = text.strip_suffix(suffix) {
            return prefix.parse::<f64>().ok().map(|n| n * factor);
        }
    }
    for (suffix, factor) in SI_SUFFIXES {
        if let Some(prefix) = text.strip_suffix(suffix) {
            return prefix.parse::<f64>().ok().map(|n| n * factor);
        }
    }
    text.parse().ok()
}

async fn scan_resource_quotas<S: ClusterSession>(session: &S, config: &ScanConfig, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("ResourceQuota")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let Some(hard) = object.data.pointer("/status/hard").and_then(Value::as_object) else { continue };
        let used = object.data.pointer("/status/used").and_then(Value::as_object);
        for (resource, hard_value) in hard {
            let Some(hard_qty) = hard_value.as_str().and_then(parse_quantity) else { continue };
            if hard_qty <= 0.0 {
                continue;
            }
            let used_qty = used.and_then(|u| u.get(resource)).and_then(Value::as_str).and_then(parse_quantity).unwrap_or(0.0);
            let ratio = used_qty / hard_qty;

            let (severity, message) = if ratio >= 1.0 {
                (Severity::Critical, "quota exhausted".to_string())
            } else if ratio >= config.quota_critical_ratio {
                (Severity::Critical, format!("{resource} usage at {:.0}% of quota", ratio * 100.0))
            } else if ratio >= config.quota_warn_ratio {
                (Severity::Warning, format!("{resource} usage at {:.0}% of quota", ratio * 100.0))
            } else {
                continue;
            };

            findings.push(Finding {
                id: finding_id(&format!("TIMING-QUOTA-{resource}"), "ResourceQuota", &name, &namespace),
                category: FindingCategory::Timing,
                severity,
                kind: "ResourceQuota".to_string(),
                name: name.clone(),
                namespace: namespace.clone(),
                condition: "QuotaNearLimit".to_string(),
                message,
                remediation: format!("raise the `{resource}` quota or reduce consumption in namespace `{namespace}`"),
                command: None,
            });
        }
    }
    Ok(findings)
}

async fn scan_pdbs<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("PodDisruptionBudget")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone().unwrap_or_default();
        let disruptions_allowed = object.data.pointer("/status/disruptionsAllowed").and_then(Value::as_i64);
        let current_healthy = object.data.pointer("/status/currentHealthy").and_then(Value::as_i64).unwrap_or(0);
        let min_available = object.data.pointer("/spec/minAvailable").and_then(Value::as_str);
        let max_unavailable = object.data.pointer("/spec/maxUnavailable");

        if disruptions_allowed == Some(0) && current_healthy > 0 {
            findings.push(finding(&name, &namespace, Severity::Critical, "ZeroDisruptionsAllowed", "this PDB currently allows zero voluntary disruptions; node drains will stall"));
        }
        if min_available == Some("100%") {
            findings.push(finding(&name, &namespace, Severity::Warning, "MinAvailableAll", "`minAvailable: 100%` leaves no room for voluntary disruption"));
        }
        let max_unavailable_zero = match max_unavailable {
            Some(Value::String(s)) => s == "0" || s == "0%",
            Some(Value::Number(n)) => n.as_i64() == Some(0),
            _ => false,
        };
        if max_unavailable_zero {
            findings.push(finding(&name, &namespace, Severity::Warning, "MaxUnavailableZero", "`maxUnavailable: 0` leaves no room for voluntary disruption"));
        }
    }
    Ok(findings)
}

fn finding(name: &str, namespace: &str, severity: Severity, condition: &str, message: &str) -> Finding {
    Finding {
        id: finding_id(&format!("TIMING-PDB-{condition}"), "PodDisruptionBudget", name, namespace),
        category: FindingCategory::Timing,
        severity,
        kind: "PodDisruptionBudget".to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        condition: condition.to_string(),
        message: message.to_string(),
        remediation: "relax the disruption budget so voluntary node maintenance remains possible".to_string(),
        command: None,
    }
}

async fn scan_hpas<S: ClusterSession>(session: &S, token: &CancellationToken) -> Result<Vec<Finding>> {
    let gvr = api_resource_for("HorizontalPodAutoscaler")?;
    let objects = session.list(&gvr, ListParams::default(), token).await?;
    let mut findings = Vec::new();
    for object in objects {
        check_cancelled(token)?;
        let min = object.data.pointer("/spec/minReplicas").and_then(Value::as_i64);
        let max = object.data.pointer("/spec/maxReplicas").and_then(Value::as_i64);
        if min.is_some() && min == max {
            let name = object.metadata.name.clone().unwrap_or_default();
            let namespace = object.metadata.namespace.clone().unwrap_or_default();
            findings.push(Finding {
                id: finding_id("TIMING-HPA-FIXED", "HorizontalPodAutoscaler", &name, &namespace),
                category: FindingCategory::Timing,
                severity: Severity::Warning,
                kind: "HorizontalPodAutoscaler".to_string(),
                name,
                namespace,
                condition: "MinEqualsMax".to_string(),
                message: "minReplicas equals maxReplicas; this HPA cannot actually scale".to_string(),
                remediation: "widen the min/max range or remove the HPA in favor of a fixed replica count".to_string(),
                command: None,
            });
        }
    }
    Ok(findings)
}

/// Run the TIMING family across Certificates, TLS Secrets, ResourceQuotas,
/// PodDisruptionBudgets, and HorizontalPodAutoscalers.
pub async fn scan<S: ClusterSession>(session: &S, config: &ScanConfig, token: &CancellationToken) -> Result<Vec<Finding>> {
    let mut findings = scan_cert_manager_certificates(session, config, token).await?;
    findings.extend(scan_tls_secrets(session, config, token).await?);
    findings.extend(scan_resource_quotas(session, config, token).await?);
    findings.extend(scan_pdbs(session, token).await?);
    findings.extend(scan_hpas(session, token).await?);
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_and_si_quantity_suffixes() {
        assert_eq!(parse_quantity("2Gi"), Some(2.0 * 1024f64.powi(3)));
        assert_eq!(parse_quantity("500m"), Some(0.5));
        assert_eq!(parse_quantity("4"), Some(4.0));
    }

    #[test]
    fn quota_crossing_95_percent_is_critical() {
        let config = ScanConfig::default();
        assert!(0.96 >= config.quota_critical_ratio);
        assert!(0.91 >= config.quota_warn_ratio && 0.91 < config.quota_critical_ratio);
    }

    #[test]
    fn certificate_expiring_in_two_days_is_critical() {
        let config = ScanConfig::default();
        let not_after = Timestamp::now().checked_add(SignedDuration::from_secs(2 * 24 * 3600)).unwrap();
        let finding = cert_expiry_finding("Certificate", "example-tls", "demo", not_after, &config).unwrap();
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.condition, "CertificateExpiringSoon");
        assert_eq!(finding.category, FindingCategory::Timing);
    }
}
