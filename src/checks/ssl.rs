//! Expiry of the certificates in the trust store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::checks::{CheckContext, Service};
use crate::error::ShapeError;
use crate::normalize::de;
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Levels};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CertificateParams {
    /// Days until expiry, lower 30/14 if unset.
    pub expiry: Option<Levels>,
}

impl CertificateParams {
    fn expiry(&self) -> Levels {
        self.expiry.unwrap_or(Levels::lower(30.0, 14.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub descr: String,
    #[serde(default)]
    pub commonname: String,
    /// Unix timestamp.
    #[serde(deserialize_with = "de::i64")]
    pub valid_to: i64,
}

/// Rows that are not certificate records are logged and left out. Their services report the item
/// as missing.
pub fn parse(output: &AgentOutput) -> Result<Vec<Certificate>, ShapeError> {
    let rows = output.jsonl::<Value>(section::SSL)?.unwrap_or_default();
    let mut certificates = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        match serde_json::from_value(row) {
            Ok(cert) => certificates.push(cert),
            Err(err) => warn!(section = section::SSL, line = idx + 1, %err, "skipping certificate"),
        }
    }
    Ok(certificates)
}

/// One service per certificate description. Duplicate descriptions are discovered once.
pub fn discover(certificates: &[Certificate]) -> Vec<Service> {
    let mut services: Vec<Service> = Vec::new();
    for cert in certificates {
        let service = Service::Certificate {
            item: cert.descr.clone(),
        };
        if !services.contains(&service) {
            services.push(service);
        }
    }
    services
}

pub fn check(
    item: &str,
    params: &CertificateParams,
    certificates: &[Certificate],
    ctx: &CheckContext,
) -> Vec<CheckResult> {
    let cert = match certificates.iter().find(|c| c.descr == item) {
        Some(cert) => cert,
        None => return Vec::new(),
    };

    let mut results = Vec::new();
    if !cert.commonname.is_empty() {
        results.push(CheckResult::ok(format!("CN {}", cert.commonname)));
    }

    let valid_to = match DateTime::<Utc>::from_timestamp(cert.valid_to, 0) {
        Some(valid_to) => valid_to,
        None => {
            results.push(CheckResult::unknown(format!(
                "Invalid expiry timestamp {}",
                cert.valid_to
            )));
            return results;
        }
    };

    let days = (valid_to - ctx.now).num_seconds().div_euclid(86_400);
    results.push(
        CheckLevels::new("Expires in", render::days)
            .metric("cert_expiry_days")
            .levels(Some(params.expiry()))
            .check(days as f64),
    );
    let until = valid_to.format("%Y-%m-%d %H:%M:%S UTC");
    results.push(CheckResult::ok(format!("Valid until {}", until)).notice());

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::RateTracker;
    use crate::State;
    use chrono::TimeZone;

    // 2025-01-01 00:00:00, 2024-11-15 00:00:00 and 2024-10-20 00:00:00 UTC
    const SECTION: &str = r#"<<<opnsense_ssl:sep(0)>>>
{"descr": "Web GUI", "commonname": "fw.example.com", "valid_to": "1735689600", "refid": "6720c0e1"}
{"descr": "VPN", "commonname": "vpn.example.com", "valid_to": 1731628800}
{"descr": "Old", "commonname": "", "valid_to": "1729382400"}
"#;

    fn certificates() -> Vec<Certificate> {
        parse(&AgentOutput::parse(SECTION)).unwrap()
    }

    fn run(item: &str, params: &CertificateParams) -> Vec<CheckResult> {
        let mut rates = RateTracker::new();
        let now = Utc.with_ymd_and_hms(2024, 10, 25, 12, 0, 0).unwrap();
        let ctx = CheckContext::new(now, &mut rates);
        check(item, params, &certificates(), &ctx)
    }

    #[test]
    fn test_parse() {
        let certs = certificates();
        assert_eq!(certs.len(), 3);
        assert_eq!(certs[0].valid_to, 1735689600);
        assert_eq!(certs[1].valid_to, 1731628800);
        assert!(parse(&AgentOutput::default()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_skips_broken_rows() {
        let text = format!(
            "{}{}\n{}\n",
            SECTION,
            r#"{"commonname": "no description", "valid_to": 1735689600}"#,
            r#"{"descr": "Pending", "valid_to": "soon"}"#,
        );
        let certs = parse(&AgentOutput::parse(&text)).unwrap();
        let items: Vec<_> = certs.iter().map(|c| c.descr.as_str()).collect();
        assert_eq!(items, vec!["Web GUI", "VPN", "Old"]);

        let text = "<<<opnsense_ssl:sep(0)>>>\nnot json\n";
        assert!(matches!(
            parse(&AgentOutput::parse(text)),
            Err(ShapeError::Json { .. })
        ));
    }

    #[test]
    fn test_discover() {
        let mut certs = certificates();
        certs.push(certs[0].clone());
        let items: Vec<_> = discover(&certs)
            .into_iter()
            .map(|s| s.item().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(items, vec!["Web GUI", "VPN", "Old"]);
    }

    #[test]
    fn test_check_valid() {
        let results = run("Web GUI", &CertificateParams::default());
        assert_eq!(results[0], CheckResult::ok("CN fw.example.com"));
        assert_eq!(results[1].text(), "Expires in: 67 days");
        assert_eq!(results[1].state(), State::Ok);
        assert_eq!(results[1].metric().unwrap().perf_string(), "cert_expiry_days=67");
        assert!(results[2].is_notice());
        assert_eq!(results[2].text(), "Valid until 2025-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_check_expiring() {
        let results = run("VPN", &CertificateParams::default());
        assert_eq!(results[1].state(), State::Warning);
        assert_eq!(
            results[1].text(),
            "Expires in: 20 days (warn/crit below 30 days/14 days)"
        );

        let params = CertificateParams {
            expiry: Some(Levels::lower(30.0, 25.0)),
        };
        assert_eq!(run("VPN", &params)[1].state(), State::Critical);
    }

    #[test]
    fn test_check_expired() {
        let results = run("Old", &CertificateParams::default());
        assert_eq!(results[0].state(), State::Critical);
        assert_eq!(results[0].metric().unwrap().value(), -6.0);
    }

    #[test]
    fn test_check_missing() {
        assert!(run("Gone", &CertificateParams::default()).is_empty());
    }
}
