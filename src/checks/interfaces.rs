//! Network interface speed, traffic and error rates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::checks::{skipped, CheckContext, Service};
use crate::error::ShapeError;
use crate::normalize::{self, Counter};
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Levels};

const IN_OCTETS: &str = "bytes received";
const OUT_OCTETS: &str = "bytes transmitted";
const IN_PACKETS: &str = "packets received";
const OUT_PACKETS: &str = "packets transmitted";
const IN_ERRORS: &str = "input errors";
const OUT_ERRORS: &str = "output errors";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceParams {
    /// Inbound traffic in bits per second.
    pub bandwidth_in: Option<Levels>,
    /// Outbound traffic in bits per second.
    pub bandwidth_out: Option<Levels>,
    /// Errors per second, in either direction.
    pub errors: Option<Levels>,
}

#[derive(Debug, Deserialize)]
struct RawInterface {
    description: String,
    #[serde(default)]
    statistics: BTreeMap<String, Value>,
}

/// Octet, packet and error counters as reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub in_octets: Counter,
    pub out_octets: Counter,
    pub in_packets: Counter,
    pub out_packets: Counter,
    pub in_errors: Counter,
    pub out_errors: Counter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub index: Option<u64>,
    pub description: String,
    pub name: Option<String>,
    /// Bits per second.
    pub speed: Option<u64>,
    pub type_name: Option<String>,
    /// ifType number of `type_name`.
    pub if_type: u32,
    pub counters: Counters,
}

impl TryFrom<RawInterface> for Interface {
    type Error = ShapeError;

    fn try_from(raw: RawInterface) -> Result<Self, Self::Error> {
        let stats = &raw.statistics;
        let text = |key: &str| stats.get(key).and_then(Value::as_str).map(str::to_owned);
        let counter = |key: &str| Counter::from(stats.get(key).cloned().unwrap_or(Value::Null));
        let index = skipped("index", counter("index").read("index"));

        let speed = match text("line rate") {
            Some(rate) => Some(normalize::line_rate(&rate).map_err(|_| {
                ShapeError::InvalidValue {
                    record: format!("interface {}", raw.description),
                    field: "line rate",
                    value: rate.clone(),
                }
            })?),
            None => None,
        };
        let type_name = text("type");
        let if_type = type_name.as_deref().map_or(1, normalize::interface_type);

        Ok(Interface {
            index,
            name: text("name"),
            speed,
            if_type,
            type_name,
            counters: Counters {
                in_octets: counter(IN_OCTETS),
                out_octets: counter(OUT_OCTETS),
                in_packets: counter(IN_PACKETS),
                out_packets: counter(OUT_PACKETS),
                in_errors: counter(IN_ERRORS),
                out_errors: counter(OUT_ERRORS),
            },
            description: raw.description,
        })
    }
}

pub fn parse(output: &AgentOutput) -> Result<Vec<Interface>, ShapeError> {
    output
        .jsonl::<RawInterface>(section::INTERFACES)?
        .unwrap_or_default()
        .into_iter()
        .map(Interface::try_from)
        .collect()
}

pub fn discover(interfaces: &[Interface]) -> Vec<Service> {
    let mut services: Vec<Service> = Vec::new();
    for iface in interfaces.iter().filter(|i| !i.description.is_empty()) {
        let service = Service::Interface {
            item: iface.description.clone(),
        };
        if !services.contains(&service) {
            services.push(service);
        }
    }
    services
}

struct Rated<'a> {
    label: &'a str,
    metric: &'a str,
    field: &'a str,
    counter: &'a Counter,
    scale: u64,
    render: fn(f64) -> String,
    levels: Option<Levels>,
    notice_only: bool,
}

impl<'a> Rated<'a> {
    fn traffic(label: &'a str, metric: &'a str, field: &'a str, counter: &'a Counter) -> Self {
        Rated {
            label,
            metric,
            field,
            counter,
            scale: 8,
            render: render::bandwidth,
            levels: None,
            notice_only: false,
        }
    }

    fn per_second(label: &'a str, metric: &'a str, field: &'a str, counter: &'a Counter) -> Self {
        Rated {
            label,
            metric,
            field,
            counter,
            scale: 1,
            render: render::rate,
            levels: None,
            notice_only: true,
        }
    }

    fn levels(mut self, levels: Option<Levels>) -> Self {
        self.levels = levels;
        self
    }
}

pub fn check(
    item: &str,
    params: &InterfaceParams,
    interfaces: &[Interface],
    ctx: &mut CheckContext,
) -> Vec<CheckResult> {
    let iface = match interfaces.iter().find(|i| i.description == item) {
        Some(iface) => iface,
        None => return Vec::new(),
    };

    let mut results = vec![match iface.speed {
        Some(speed) => CheckResult::ok(format!("Speed: {}", render::bandwidth(speed as f64))),
        None => CheckResult::ok("Speed: unknown"),
    }];

    let name = iface.name.as_deref().unwrap_or("unnamed");
    let kind = iface.type_name.as_deref().unwrap_or("other");
    results.push(
        CheckResult::ok(format!("{} ({}, ifType {})", name, kind, iface.if_type)).notice(),
    );

    let c = &iface.counters;
    let rated = [
        Rated::traffic("In", "if_in_bps", IN_OCTETS, &c.in_octets).levels(params.bandwidth_in),
        Rated::traffic("Out", "if_out_bps", OUT_OCTETS, &c.out_octets)
            .levels(params.bandwidth_out),
        Rated::per_second("Packets in", "if_in_pkts", IN_PACKETS, &c.in_packets),
        Rated::per_second("Packets out", "if_out_pkts", OUT_PACKETS, &c.out_packets),
        Rated::per_second("Errors in", "if_in_errors", IN_ERRORS, &c.in_errors)
            .levels(params.errors),
        Rated::per_second("Errors out", "if_out_errors", OUT_ERRORS, &c.out_errors)
            .levels(params.errors),
    ];

    for r in rated {
        let key = format!("opnsense_interfaces.{}.{}", item, r.metric);
        let rate = r
            .counter
            .read(r.field)
            .and_then(|value| ctx.rate(&key, value.saturating_mul(r.scale) as f64));
        let rate = match skipped(&key, rate) {
            Some(rate) => rate,
            None => continue,
        };

        let mut levels = CheckLevels::new(r.label, r.render)
            .metric(r.metric)
            .levels(r.levels)
            .notice_only(r.notice_only);
        levels = match (r.scale, iface.speed) {
            (8, Some(speed)) => levels.boundaries(0.0, Some(speed as f64)),
            _ => levels.boundaries(0.0, None),
        };
        results.push(levels.check(rate));
    }

    if iface.counters == Counters::default() {
        debug!(interface = item, "no counters reported");
    }

    results
}
