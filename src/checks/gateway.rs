//! Gateway status, round trip time and packet loss.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checks::Service;
use crate::error::ShapeError;
use crate::normalize::{self, SENTINEL};
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Levels, Unit};

pub const DEFAULT_STATUS: &str = "Online";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayParams {
    /// Expected `status_translated`, `Online` if unset.
    pub status: Option<String>,
    /// Round trip time in seconds, upper 0.1/0.2 if unset.
    pub delay: Option<Levels>,
    /// Packet loss in percent, upper 10/20 if unset.
    pub loss: Option<Levels>,
}

impl GatewayParams {
    fn delay(&self) -> Levels {
        self.delay.unwrap_or(Levels::upper(0.1, 0.2))
    }

    fn loss(&self) -> Levels {
        self.loss.unwrap_or(Levels::upper(10.0, 20.0))
    }
}

fn sentinel() -> String {
    SENTINEL.to_owned()
}

#[derive(Debug, Deserialize)]
struct RawGateway {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    status_translated: String,
    #[serde(default = "sentinel")]
    loss: String,
    #[serde(default = "sentinel")]
    delay: String,
    #[serde(default = "sentinel")]
    stddev: String,
    #[serde(default)]
    monitor: Option<String>,
}

/// A gateway with its probe results. Values the gateway does not report are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub name: String,
    pub address: String,
    pub status: String,
    /// Seconds.
    pub delay: Option<f64>,
    /// Seconds.
    pub stddev: Option<f64>,
    /// Percent.
    pub loss: Option<f64>,
    pub monitor: Option<String>,
}

impl TryFrom<RawGateway> for Gateway {
    type Error = ShapeError;

    fn try_from(raw: RawGateway) -> Result<Self, Self::Error> {
        let invalid = |field: &'static str, value: &str| ShapeError::InvalidValue {
            record: format!("gateway {}", raw.name),
            field,
            value: value.to_owned(),
        };

        let delay = normalize::duration(&raw.delay).map_err(|_| invalid("delay", &raw.delay))?;
        let stddev =
            normalize::duration(&raw.stddev).map_err(|_| invalid("stddev", &raw.stddev))?;
        let loss = normalize::percent(&raw.loss).map_err(|_| invalid("loss", &raw.loss))?;
        let monitor = raw
            .monitor
            .clone()
            .filter(|m| !m.is_empty() && m != SENTINEL);

        Ok(Gateway {
            name: raw.name,
            address: raw.address,
            status: raw.status_translated,
            delay,
            stddev,
            loss,
            monitor,
        })
    }
}

pub fn parse(output: &AgentOutput) -> Result<Option<Vec<Gateway>>, ShapeError> {
    let raw: Option<Vec<RawGateway>> = output.jsonl(section::GATEWAY)?;
    raw.map(|rows| rows.into_iter().map(Gateway::try_from).collect())
        .transpose()
}

/// One service per gateway that reports a delay. Gateways without monitoring never do.
pub fn discover(gateways: &[Gateway]) -> Vec<Service> {
    gateways
        .iter()
        .filter(|gw| gw.delay.is_some())
        .map(|gw| Service::Gateway {
            item: gw.name.clone(),
        })
        .collect()
}

pub fn check(item: &str, params: &GatewayParams, gateways: &[Gateway]) -> Vec<CheckResult> {
    let gw = match gateways.iter().find(|gw| gw.name == item) {
        Some(gw) => gw,
        None => return Vec::new(),
    };

    let expected = params.status.as_deref().unwrap_or(DEFAULT_STATUS);
    let mut results = vec![if gw.status == expected {
        CheckResult::ok(gw.status.as_str())
    } else {
        CheckResult::warn(format!("{} (expected: {})", gw.status, expected))
    }];

    // without a monitor address the gateway is down and rtt/loss are meaningless
    let (monitor, delay) = match (&gw.monitor, gw.delay) {
        (Some(monitor), Some(delay)) => (monitor, delay),
        _ => return results,
    };

    results.push(CheckResult::ok(format!("Monitor {}", monitor)));
    results.push(
        CheckLevels::new("rtt", render::timespan)
            .metric("rta")
            .unit(Unit::Seconds)
            .levels(Some(params.delay()))
            .check(delay),
    );

    match gw.loss {
        Some(loss) => results.push(
            CheckLevels::new("loss", render::percent)
                .metric("pl")
                .unit(Unit::Percentage)
                .levels(Some(params.loss()))
                .check(loss),
        ),
        None => debug!(gateway = item, "no packet loss reported"),
    }

    results
}
