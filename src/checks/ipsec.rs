//! IPsec tunnels (connection, phase 1 session, phase 2 children) and single children.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::checks::{present, skipped, CheckContext, Service};
use crate::error::ShapeError;
use crate::normalize::{de, Counter};
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Metric, Unit};

const INSTALLED: &str = "INSTALLED";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpsecParams {
    /// Expected IKE version. Overrides the version seen at discovery.
    pub version: Option<String>,
}

/// A configured connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub uuid: String,
    pub description: String,
    #[serde(default, deserialize_with = "de::flag")]
    pub enabled: bool,
}

/// A phase 1 (IKE) session. `name` is the uuid of its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase1 {
    pub name: String,
    #[serde(default, deserialize_with = "de::flag")]
    pub connected: bool,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "install-time", default, deserialize_with = "de::opt_f64")]
    pub install_time: Option<f64>,
    #[serde(rename = "bytes-in", default)]
    pub bytes_in: Counter,
    #[serde(rename = "bytes-out", default)]
    pub bytes_out: Counter,
    #[serde(rename = "packets-in", default)]
    pub packets_in: Counter,
    #[serde(rename = "packets-out", default)]
    pub packets_out: Counter,
}

/// A phase 2 (child) security association. `ikeid` is the uuid of its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase2 {
    pub ikeid: String,
    pub phase2desc: String,
    pub state: String,
    pub protocol: String,
    #[serde(rename = "encr-alg")]
    pub encr_alg: String,
    #[serde(
        rename = "encr-keysize",
        default,
        deserialize_with = "de::opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub encr_keysize: Option<u64>,
    #[serde(rename = "integ-alg", default, skip_serializing_if = "Option::is_none")]
    pub integ_alg: Option<String>,
    #[serde(rename = "dh-group", default, skip_serializing_if = "Option::is_none")]
    pub dh_group: Option<String>,
    #[serde(rename = "local-ts", default)]
    pub local_ts: String,
    #[serde(rename = "remote-ts", default)]
    pub remote_ts: String,
    #[serde(rename = "install-time", default, deserialize_with = "de::opt_f64")]
    pub install_time: Option<f64>,
    #[serde(rename = "rekey-time", default, deserialize_with = "de::opt_f64")]
    pub rekey_time: Option<f64>,
    #[serde(rename = "life-time", default, deserialize_with = "de::opt_f64")]
    pub life_time: Option<f64>,
}

/// The three IPsec sections. Only installed children are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ipsec {
    pub connections: Vec<Connection>,
    pub phase1: Vec<Phase1>,
    pub phase2: Vec<Phase2>,
}

impl Ipsec {
    fn connection(&self, description: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.description == description)
    }

    fn phase1_of(&self, conn: &Connection) -> Option<&Phase1> {
        self.phase1.iter().find(|p| p.name == conn.uuid)
    }

    fn children_of<'a>(&'a self, conn: &'a Connection) -> impl Iterator<Item = &'a Phase2> {
        self.phase2.iter().filter(move |p| p.ikeid == conn.uuid)
    }
}

pub fn parse(output: &AgentOutput) -> Result<Option<Ipsec>, ShapeError> {
    let connections: Vec<Connection> = match output.jsonl(section::IPSEC)? {
        Some(connections) => connections,
        None => return Ok(None),
    };
    let phase1 = output.jsonl(section::IPSEC_PHASE1)?.unwrap_or_default();
    // children in other states lack most fields
    let phase2 = output
        .jsonl::<Value>(section::IPSEC_PHASE2)?
        .unwrap_or_default()
        .into_iter()
        .filter(|row| row.get("state").and_then(Value::as_str) == Some(INSTALLED))
        .map(|row| {
            serde_json::from_value::<Phase2>(row).map_err(|err| ShapeError::Json {
                section: section::IPSEC_PHASE2.to_owned(),
                reason: format!("installed child: {}", err),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Ipsec {
        connections,
        phase1,
        phase2,
    }))
}

/// Algorithms of a child as seen at discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildBaseline {
    pub name: String,
    pub encr_alg: String,
    #[serde(default)]
    pub integ_alg: Option<String>,
    pub protocol: String,
}

/// What a tunnel looked like at discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub phase2: Vec<ChildBaseline>,
}

/// One service per enabled connection, remembering its IKE version and children.
pub fn discover(ipsec: &Ipsec) -> Vec<Service> {
    ipsec
        .connections
        .iter()
        .filter(|conn| conn.enabled)
        .map(|conn| Service::Ipsec {
            item: conn.description.clone(),
            discovered: Baseline {
                version: ipsec.phase1_of(conn).map(|p| p.version.clone()),
                phase2: ipsec
                    .children_of(conn)
                    .map(|child| ChildBaseline {
                        name: child.phase2desc.clone(),
                        encr_alg: child.encr_alg.clone(),
                        integ_alg: child.integ_alg.clone(),
                        protocol: child.protocol.clone(),
                    })
                    .collect(),
            },
        })
        .collect()
}

fn expectation(live: Option<&str>, expected: &str) -> (bool, String) {
    match live {
        Some(live) if live == expected => (true, live.to_owned()),
        live => (
            false,
            format!("{} (expected: {})", live.unwrap_or("none"), expected),
        ),
    }
}

fn compare_child(baseline: &ChildBaseline, live: &Phase2) -> CheckResult {
    let mut ok = true;
    let mut parts = vec![format!("{}:", baseline.name)];

    let mut field = |live: Option<&str>, expected: &str| {
        let (matches, text) = expectation(live, expected);
        ok &= matches;
        parts.push(text);
    };
    field(Some(live.protocol.as_str()), baseline.protocol.as_str());
    if let Some(ref integ) = baseline.integ_alg {
        field(live.integ_alg.as_deref(), integ.as_str());
    }
    field(Some(live.encr_alg.as_str()), baseline.encr_alg.as_str());

    let text = parts.join(" ");
    if ok {
        CheckResult::ok(text).notice()
    } else {
        CheckResult::warn(text)
    }
}

pub fn check(
    item: &str,
    params: &IpsecParams,
    baseline: &Baseline,
    ipsec: &Ipsec,
    ctx: &mut CheckContext,
) -> Vec<CheckResult> {
    let conn = match ipsec.connection(item) {
        Some(conn) => conn,
        None => return Vec::new(),
    };

    let phase1 = match ipsec.phase1_of(conn) {
        Some(phase1) => phase1,
        None => return vec![CheckResult::unknown("Phase1 not found")],
    };
    if !phase1.connected {
        return vec![CheckResult::crit("Phase1 not connected")];
    }

    let mut results = Vec::new();

    match params.version.as_ref().or(baseline.version.as_ref()) {
        Some(expected) if *expected != phase1.version => results.push(CheckResult::warn(
            format!("Phase1: {} (expected: {})", phase1.version, expected),
        )),
        _ => results.push(CheckResult::ok(format!("Phase1: {}", phase1.version))),
    }

    match phase1.install_time {
        Some(install_time) => results.push(
            CheckLevels::new("Install Time", render::timespan)
                .metric("install_time")
                .unit(Unit::Seconds)
                .notice_only(true)
                .check(install_time),
        ),
        None => debug!(tunnel = item, "no install time"),
    }

    let counters = [
        ("in", "bps", "Bandwidth", &phase1.bytes_in, "bytes-in"),
        ("out", "bps", "Bandwidth", &phase1.bytes_out, "bytes-out"),
        ("in", "pkts", "Packets", &phase1.packets_in, "packets-in"),
        ("out", "pkts", "Packets", &phase1.packets_out, "packets-out"),
    ];
    for (direction, kind, label, counter, field) in counters {
        let metric = format!("if_{}_{}", direction, kind);
        let key = format!("opnsense_ipsec.{}.{}", conn.uuid, metric);
        let scale = if kind == "bps" { 8 } else { 1 };
        let rate = counter
            .read(field)
            .and_then(|value| ctx.rate(&key, value.saturating_mul(scale) as f64));
        if let Some(rate) = skipped(&key, rate) {
            let fmt: fn(f64) -> String = if kind == "bps" {
                render::bandwidth
            } else {
                render::rate
            };
            results.push(
                CheckLevels::new(&format!("{} {}", label, direction), fmt)
                    .metric(&metric)
                    .boundaries(0.0, None)
                    .notice_only(true)
                    .check(rate),
            );
        }
    }

    let children: Vec<&Phase2> = ipsec.children_of(conn).collect();
    results.push(
        CheckResult::ok(format!("Childs: {}", children.len()))
            .notice()
            .with_metric(Metric::new("childs", children.len() as f64).with_boundaries(0.0, None)),
    );

    for expected in &baseline.phase2 {
        match children.iter().find(|c| c.phase2desc == expected.name) {
            Some(live) => results.push(compare_child(expected, live)),
            None => results.push(CheckResult::warn(format!("{}: not found", expected.name))),
        }
    }

    for live in &children {
        if !baseline.phase2.iter().any(|b| b.name == live.phase2desc) {
            results.push(CheckResult::warn(format!(
                "{}: Unexpected Connection",
                live.phase2desc
            )));
        }
    }

    results
}

fn child_item(conn: &Connection, child: &Phase2) -> String {
    format!("{} {} > {}", conn.description, child.local_ts, child.remote_ts)
}

/// One service per installed child whose connection is known.
pub fn discover_children(ipsec: &Ipsec) -> Vec<Service> {
    ipsec
        .phase2
        .iter()
        .filter_map(|child| {
            ipsec
                .connections
                .iter()
                .find(|conn| conn.uuid == child.ikeid)
                .map(|conn| Service::IpsecChild {
                    item: child_item(conn, child),
                })
        })
        .collect()
}

pub fn check_child(item: &str, ipsec: &Ipsec) -> Vec<CheckResult> {
    let child = ipsec.phase2.iter().find(|child| {
        ipsec
            .connections
            .iter()
            .any(|conn| conn.uuid == child.ikeid && child_item(conn, child) == item)
    });
    let child = match child {
        Some(child) => child,
        None => return Vec::new(),
    };

    let mut results = vec![CheckResult::ok(child.protocol.as_str())];
    results.push(CheckResult::ok(match child.encr_keysize {
        Some(size) => format!("E:{}:{}", child.encr_alg, size),
        None => format!("E:{}", child.encr_alg),
    }));
    if let Some(ref integ) = child.integ_alg {
        results.push(CheckResult::ok(format!("I:{}", integ)));
    }
    if let Some(ref dh) = child.dh_group {
        results.push(CheckResult::ok(format!("D:{}", dh)));
    }

    let times: [(&str, &str, fn(f64) -> String, Option<f64>); 3] = [
        ("Install Time", "install_time", render::timespan, child.install_time),
        ("Rekey Time", "rekey_time", render::relative_timespan, child.rekey_time),
        ("Life Time", "life_time", render::relative_timespan, child.life_time),
    ];
    for (label, metric, fmt, value) in times {
        if let Some(value) = skipped(metric, present(metric, value)) {
            results.push(
                CheckLevels::new(label, fmt)
                    .metric(metric)
                    .unit(Unit::Seconds)
                    .notice_only(true)
                    .check(value),
            );
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SkipReason;
    use crate::rate::RateTracker;
    use crate::{Resource, State};
    use chrono::{TimeZone, Utc};

    const SECTIONS: &str = r#"<<<opnsense_ipsec:sep(0)>>>
{"uuid": "c1", "description": "IPSec1", "enabled": "1"}
{"uuid": "c2", "description": "IPSec2", "enabled": "1"}
{"uuid": "c3", "description": "Disabled", "enabled": "0"}
<<<opnsense_ipsec_phase1:sep(0)>>>
{"name": "c1", "connected": true, "version": "IKEv1", "install-time": "42", "bytes-in": "1000", "bytes-out": "2000", "packets-in": "10", "packets-out": "20"}
{"name": "c2", "connected": false, "version": "IKEv2"}
<<<opnsense_ipsec_phase2:sep(0)>>>
{"ikeid": "c1", "phase2desc": "IPSec1 Child", "state": "INSTALLED", "protocol": "ESP", "encr-alg": "AES_CBC", "encr-keysize": "256", "integ-alg": "HMAC_SHA2_256_128", "dh-group": "MODP_2048", "local-ts": "10.0.0.0/24", "remote-ts": "10.1.0.0/24", "install-time": "42", "rekey-time": "3000", "life-time": "-5"}
{"ikeid": "c1", "phase2desc": "Stale", "state": "REKEYED", "protocol": "ESP", "encr-alg": "AES_CBC"}
"#;

    fn ipsec() -> Ipsec {
        parse(&AgentOutput::parse(SECTIONS)).unwrap().unwrap()
    }

    fn baseline(encr: &str) -> Baseline {
        Baseline {
            version: Some("IKEv1".to_owned()),
            phase2: vec![ChildBaseline {
                name: "IPSec1 Child".to_owned(),
                encr_alg: encr.to_owned(),
                integ_alg: Some("HMAC_SHA2_256_128".to_owned()),
                protocol: "ESP".to_owned(),
            }],
        }
    }

    fn run(
        item: &str,
        params: &IpsecParams,
        baseline: &Baseline,
        rates: &mut RateTracker,
    ) -> Vec<CheckResult> {
        run_on(&ipsec(), item, params, baseline, rates)
    }

    fn run_on(
        ipsec: &Ipsec,
        item: &str,
        params: &IpsecParams,
        baseline: &Baseline,
        rates: &mut RateTracker,
    ) -> Vec<CheckResult> {
        let now = Utc.with_ymd_and_hms(2024, 10, 25, 12, 0, 0).unwrap();
        let mut ctx = CheckContext::new(now, rates);
        check(item, params, baseline, ipsec, &mut ctx)
    }

    #[test]
    fn test_parse_keeps_installed_children() {
        let ipsec = ipsec();
        assert_eq!(ipsec.connections.len(), 3);
        assert_eq!(ipsec.phase2.len(), 1);
        assert_eq!(ipsec.phase2[0].encr_keysize, Some(256));
    }

    #[test]
    fn test_discover() {
        let services = discover(&ipsec());
        assert_eq!(services.len(), 2);
        assert_eq!(
            services[0],
            Service::Ipsec {
                item: "IPSec1".to_owned(),
                discovered: baseline("AES_CBC"),
            }
        );
        assert_eq!(
            services[1],
            Service::Ipsec {
                item: "IPSec2".to_owned(),
                discovered: Baseline {
                    version: Some("IKEv2".to_owned()),
                    phase2: vec![],
                },
            }
        );
    }

    #[test]
    fn test_check_matching() {
        let mut rates = RateTracker::new();
        let results = run("IPSec1", &IpsecParams::default(), &baseline("AES_CBC"), &mut rates);
        let mut resource = Resource::new("IPSec IPSec1");
        resource.extend(results.clone());
        assert_eq!(resource.get_state(), State::Ok);

        assert_eq!(results[0].text(), "Phase1: IKEv1");
        assert_eq!(results[1].text(), "Install Time: 42 seconds");
        assert!(results[1].is_notice());
        // first run has no rate baseline
        assert_eq!(results[2].text(), "Childs: 1");
        assert_eq!(
            results[3].text(),
            "IPSec1 Child: ESP HMAC_SHA2_256_128 AES_CBC"
        );
        assert!(results[3].is_notice());
        assert_eq!(results.len(), 4);
        assert_eq!(rates.len(), 4);
    }

    #[test]
    fn test_check_rates() {
        let mut rates = RateTracker::new();
        let ts = Utc.with_ymd_and_hms(2024, 10, 25, 11, 59, 0).unwrap().timestamp() as f64;
        let _ = rates.rate("opnsense_ipsec.c1.if_in_bps", ts, 0.0);
        let _ = rates.rate("opnsense_ipsec.c1.if_in_pkts", ts, 4.0);

        let results = run("IPSec1", &IpsecParams::default(), &baseline("AES_CBC"), &mut rates);
        let bps = results
            .iter()
            .find(|r| r.metric().map(|m| m.name()) == Some("if_in_bps"))
            .unwrap();
        // 8000 bits in 60 seconds
        assert!((bps.metric().unwrap().value() - 8000.0 / 60.0).abs() < 1e-9);
        assert!(bps.text().starts_with("Bandwidth in: "));
        let pkts = results
            .iter()
            .find(|r| r.metric().map(|m| m.name()) == Some("if_in_pkts"))
            .unwrap();
        assert_eq!(pkts.text(), "Packets in: 0.1/s");
        assert!(results
            .iter()
            .all(|r| r.metric().map(|m| m.name()) != Some("if_out_bps")));
    }

    #[test]
    fn test_check_mismatch() {
        let mut rates = RateTracker::new();
        let results = run("IPSec1", &IpsecParams::default(), &baseline("AES_GCM_16"), &mut rates);
        let child = results.last().unwrap();
        assert_eq!(child.state(), State::Warning);
        assert!(!child.is_notice());
        assert_eq!(
            child.text(),
            "IPSec1 Child: ESP HMAC_SHA2_256_128 AES_CBC (expected: AES_GCM_16)"
        );
        assert_eq!(child.text().matches("(expected:").count(), 1);
    }

    #[test]
    fn test_check_version() {
        let mut rates = RateTracker::new();
        let params = IpsecParams {
            version: Some("IKEv2".to_owned()),
        };
        let results = run("IPSec1", &params, &baseline("AES_CBC"), &mut rates);
        assert_eq!(results[0].state(), State::Warning);
        assert_eq!(results[0].text(), "Phase1: IKEv1 (expected: IKEv2)");
    }

    #[test]
    fn test_check_children_not_found_and_unexpected() {
        let mut rates = RateTracker::new();
        let mut discovered = baseline("AES_CBC");
        discovered.phase2[0].name = "Other Child".to_owned();
        let results = run("IPSec1", &IpsecParams::default(), &discovered, &mut rates);
        let warnings: Vec<_> = results
            .iter()
            .filter(|r| r.state() == State::Warning)
            .map(|r| r.text())
            .collect();
        assert_eq!(
            warnings,
            vec!["Other Child: not found", "IPSec1 Child: Unexpected Connection"]
        );
    }

    #[test]
    fn test_check_phase1_states() {
        let mut rates = RateTracker::new();
        let results = run("IPSec2", &IpsecParams::default(), &Baseline::default(), &mut rates);
        assert_eq!(results, vec![CheckResult::crit("Phase1 not connected")]);

        let mut ipsec = ipsec();
        ipsec.phase1.clear();
        let params = IpsecParams::default();
        let results = run_on(&ipsec, "IPSec1", &params, &Baseline::default(), &mut rates);
        assert_eq!(results, vec![CheckResult::unknown("Phase1 not found")]);
        assert!(results[0].metric().is_none());

        assert!(run("Nope", &params, &Baseline::default(), &mut rates).is_empty());
    }

    #[test]
    fn test_parse_ignores_incomplete_pending_children() {
        let sections = format!(
            "{}{}\n{}\n",
            SECTIONS,
            r#"{"ikeid": "c1", "phase2desc": "Pending", "state": "CREATED"}"#,
            r#"{"ikeid": "c2", "state": "REKEYING", "local-ts": "10.2.0.0/24"}"#,
        );
        let ipsec = parse(&AgentOutput::parse(&sections)).unwrap().unwrap();
        assert_eq!(ipsec.phase2.len(), 1);
        assert_eq!(ipsec.phase2[0].phase2desc, "IPSec1 Child");

        let broken = SECTIONS.replace(
            r#""protocol": "ESP", "encr-alg": "AES_CBC", "encr-keysize""#,
            r#""encr-keysize""#,
        );
        assert!(matches!(
            parse(&AgentOutput::parse(&broken)),
            Err(ShapeError::Json { .. })
        ));
    }

    #[test]
    fn test_check_malformed_counter() {
        let mut ipsec = ipsec();
        ipsec.phase1[0].bytes_in = Counter::from(Value::from("abc"));
        ipsec.phase1[0].packets_in = Counter::default();
        assert_eq!(
            ipsec.phase1[0].bytes_in.read("bytes-in"),
            Err(SkipReason::Malformed {
                field: "bytes-in".to_owned(),
                value: "\"abc\"".to_owned(),
            })
        );
        assert_eq!(
            ipsec.phase1[0].packets_in.read("packets-in"),
            Err(SkipReason::Missing("packets-in".to_owned()))
        );

        let mut rates = RateTracker::new();
        let params = IpsecParams::default();
        let results = run_on(&ipsec, "IPSec1", &params, &baseline("AES_CBC"), &mut rates);
        // the other counters still get their baseline, the rest of the check is unaffected
        assert_eq!(rates.len(), 2);
        assert!(rates.get("opnsense_ipsec.c1.if_in_bps").is_none());
        assert!(rates.get("opnsense_ipsec.c1.if_out_bps").is_some());
        assert_eq!(results[0].text(), "Phase1: IKEv1");
        assert!(results.iter().all(|r| r.state() == State::Ok));
    }

    #[test]
    fn test_records_survive_serialization() {
        let ipsec = ipsec();
        for child in &ipsec.phase2 {
            let json = serde_json::to_string(child).unwrap();
            assert_eq!(&serde_json::from_str::<Phase2>(&json).unwrap(), child);
        }
        for session in &ipsec.phase1 {
            let json = serde_json::to_string(session).unwrap();
            assert_eq!(&serde_json::from_str::<Phase1>(&json).unwrap(), session);
        }
    }

    #[test]
    fn test_child() {
        let ipsec = ipsec();
        let services = discover_children(&ipsec);
        assert_eq!(
            services,
            vec![Service::IpsecChild {
                item: "IPSec1 10.0.0.0/24 > 10.1.0.0/24".to_owned()
            }]
        );

        let results = check_child("IPSec1 10.0.0.0/24 > 10.1.0.0/24", &ipsec);
        let texts: Vec<_> = results.iter().map(|r| r.text()).collect();
        assert_eq!(
            texts,
            vec![
                "ESP",
                "E:AES_CBC:256",
                "I:HMAC_SHA2_256_128",
                "D:MODP_2048",
                "Install Time: 42 seconds",
                "Rekey Time: 50 minutes 0 seconds",
                "Life Time: 5 seconds ago",
            ]
        );
        assert_eq!(results[6].metric().unwrap().name(), "life_time");
        assert!(check_child("IPSec1 x > y", &ipsec).is_empty());
    }
}
