//! Discovery and evaluation of the monitored services.
//!
//! Every submodule turns its agent sections into typed records, discovers the services they
//! provide and evaluates one service into a list of [CheckResult]s. [discover] and [check] run
//! all of them over a complete agent output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ShapeError, SkipReason};
use crate::rate::RateTracker;
use crate::section::AgentOutput;
use crate::{CheckResult, Resource};

pub mod firewall;
pub mod firmware;
pub mod gateway;
pub mod interfaces;
pub mod ipsec;
pub mod snapshot;
pub mod ssl;
pub mod unbound;
pub mod vip;

/// What an evaluation needs besides the records: the current time and the counter history.
pub struct CheckContext<'a> {
    pub now: DateTime<Utc>,
    pub rates: &'a mut RateTracker,
}

impl<'a> CheckContext<'a> {
    pub fn new(now: DateTime<Utc>, rates: &'a mut RateTracker) -> Self {
        CheckContext { now, rates }
    }

    /// Per second rate of the counter `key`, sampled now.
    pub fn rate(&mut self, key: &str, value: f64) -> Result<f64, SkipReason> {
        let now = self.now.timestamp() as f64;
        self.rate_at(key, now, value)
    }

    /// Per second rate of the counter `key`, sampled at the unix time `timestamp`.
    pub fn rate_at(&mut self, key: &str, timestamp: f64, value: f64) -> Result<f64, SkipReason> {
        Ok(self.rates.rate(key, timestamp, value)?)
    }
}

/// Turns a skipped metric into `None` and logs why.
pub(crate) fn skipped<T>(what: &str, result: Result<T, SkipReason>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(reason) => {
            debug!(metric = what, %reason, "skipping metric");
            None
        }
    }
}

pub(crate) fn present<T>(field: &str, value: Option<T>) -> Result<T, SkipReason> {
    value.ok_or_else(|| SkipReason::Missing(field.to_owned()))
}

/// A discovered service together with what was remembered about it at discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Service {
    Gateway {
        item: String,
    },
    Ipsec {
        item: String,
        discovered: ipsec::Baseline,
    },
    IpsecChild {
        item: String,
    },
    Carp,
    Vip {
        item: String,
        baseline: vip::Baseline,
    },
    Snapshot,
    Firmware,
    Business,
    Firewall,
    Unbound,
    Certificate {
        item: String,
    },
    Interface {
        item: String,
    },
}

impl Service {
    /// The service name as shown by the monitoring core.
    pub fn name(&self) -> String {
        match self {
            Service::Gateway { item } => format!("GW {}", item),
            Service::Ipsec { item, .. } | Service::IpsecChild { item } => {
                format!("IPSec {}", item)
            }
            Service::Carp => "CARP".to_owned(),
            Service::Vip { item, .. } => format!("VirtualIP {}", item),
            Service::Snapshot => "Snapshot".to_owned(),
            Service::Firmware => "OPNsense Firmware".to_owned(),
            Service::Business => "OPNsense Business".to_owned(),
            Service::Firewall => "OPNsense Firewall".to_owned(),
            Service::Unbound => "OPNsense Unbound".to_owned(),
            Service::Certificate { item } => format!("Certificate {}", item),
            Service::Interface { item } => format!("Interface {}", item),
        }
    }

    pub fn item(&self) -> Option<&str> {
        match self {
            Service::Gateway { item }
            | Service::Ipsec { item, .. }
            | Service::IpsecChild { item }
            | Service::Vip { item, .. }
            | Service::Certificate { item }
            | Service::Interface { item } => Some(item),
            _ => None,
        }
    }
}

fn discovered<T>(
    domain: &str,
    parsed: Result<T, ShapeError>,
    f: impl FnOnce(T) -> Vec<Service>,
) -> Vec<Service> {
    match parsed {
        Ok(records) => f(records),
        Err(err) => {
            warn!(domain, %err, "skipping discovery");
            Vec::new()
        }
    }
}

/// All services the agent output provides. A domain whose sections cannot be read discovers
/// nothing, the others are not affected.
pub fn discover(output: &AgentOutput, config: &Config) -> Vec<Service> {
    let mut services = Vec::new();

    services.extend(discovered("firmware", firmware::parse(output), |fw| {
        fw.map(|fw| firmware::discover(&fw)).unwrap_or_default()
    }));
    services.extend(discovered("carp", vip::parse_carp(output), |carp| {
        vip::discover_carp(carp.as_ref())
    }));
    services.extend(discovered("vip", vip::parse_vips(output), |vips| {
        vip::discover_vips(&config.discovery.vip, &vips.unwrap_or_default())
    }));
    services.extend(discovered("gateway", gateway::parse(output), |gws| {
        gateway::discover(&gws.unwrap_or_default())
    }));
    services.extend(discovered("firewall", firewall::parse(output), |fw| {
        firewall::discover(&fw)
    }));
    services.extend(discovered("ipsec", ipsec::parse(output), |ipsec| {
        ipsec
            .map(|ipsec| {
                let mut services = ipsec::discover(&ipsec);
                services.extend(ipsec::discover_children(&ipsec));
                services
            })
            .unwrap_or_default()
    }));
    services.extend(discovered("unbound", unbound::parse(output), |unbound| {
        unbound.map(|u| unbound::discover(&u)).unwrap_or_default()
    }));
    services.extend(discovered("snapshot", snapshot::parse(output), |snapshots| {
        snapshot::discover(&snapshots)
    }));
    services.extend(discovered("ssl", ssl::parse(output), |certs| {
        ssl::discover(&certs)
    }));
    services.extend(discovered("interfaces", interfaces::parse(output), |ifaces| {
        interfaces::discover(&ifaces)
    }));

    services
}

fn evaluate(
    service: &Service,
    output: &AgentOutput,
    config: &Config,
    ctx: &mut CheckContext,
) -> Result<Vec<CheckResult>, ShapeError> {
    let results = match service {
        Service::Gateway { item } => gateway::parse(output)?
            .map(|gws| gateway::check(item, &config.gateway, &gws))
            .unwrap_or_default(),
        Service::Ipsec { item, discovered } => ipsec::parse(output)?
            .map(|ipsec| ipsec::check(item, &config.ipsec, discovered, &ipsec, ctx))
            .unwrap_or_default(),
        Service::IpsecChild { item } => ipsec::parse(output)?
            .map(|ipsec| ipsec::check_child(item, &ipsec))
            .unwrap_or_default(),
        Service::Carp => match vip::parse_carp(output)? {
            Some(carp) => {
                let vips = vip::parse_vips(output)?.unwrap_or_default();
                vip::check_carp(&config.carp, &carp, &vips)
            }
            None => Vec::new(),
        },
        Service::Vip { baseline, .. } => {
            let vips = vip::parse_vips(output)?.unwrap_or_default();
            vip::check_vip(&config.vip, baseline, &vips)
        }
        Service::Snapshot => snapshot::check(&config.snapshot, &snapshot::parse(output)?, ctx),
        Service::Firmware => firmware::parse(output)?
            .map(|fw| firmware::check(&config.firmware, &fw, ctx))
            .unwrap_or_default(),
        Service::Business => firmware::parse(output)?
            .map(|fw| firmware::check_business(&config.business, &fw, ctx))
            .unwrap_or_default(),
        Service::Firewall => firewall::check(&config.firewall, &firewall::parse(output)?),
        Service::Unbound => unbound::parse(output)?
            .map(|u| unbound::check(&u, ctx))
            .unwrap_or_default(),
        Service::Certificate { item } => {
            ssl::check(item, &config.certificate, &ssl::parse(output)?, ctx)
        }
        Service::Interface { item } => {
            interfaces::check(item, &config.interface, &interfaces::parse(output)?, ctx)
        }
    };

    Ok(results)
}

/// Evaluates one service. Unreadable sections and vanished items are reported as UNKNOWN.
pub fn check(
    service: &Service,
    output: &AgentOutput,
    config: &Config,
    ctx: &mut CheckContext,
) -> Resource {
    let mut resource = Resource::new(&service.name());

    match evaluate(service, output, config, ctx) {
        Ok(results) if results.is_empty() => {
            resource.push(CheckResult::unknown("Item not found in monitoring data"))
        }
        Ok(results) => resource.extend(results),
        Err(err) => {
            warn!(service = %service.name(), %err, "invalid monitoring data");
            resource.push(CheckResult::unknown(format!(
                "Invalid monitoring data: {}",
                err
            )))
        }
    }

    resource
}
