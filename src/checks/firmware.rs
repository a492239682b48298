//! Firmware version and update status, and the business edition license.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::checks::{CheckContext, Service};
use crate::error::ShapeError;
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Levels, Metric, Unit};

const BUSINESS_PRODUCT: &str = "opnsense-business";
const UPDATE_PENDING: &str = "update";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareParams {
    /// Age of the last update check in seconds.
    pub last_check: Option<Levels>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusinessParams {
    /// Days until the license expires, lower 60/30 if unset.
    pub expiredays: Option<Levels>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductCheck {
    #[serde(default)]
    pub upgrade_packages: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub valid_to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub product_series: String,
    #[serde(default)]
    pub product_nickname: String,
    #[serde(default)]
    pub product_check: Option<ProductCheck>,
    #[serde(default)]
    pub product_license: Option<License>,
}

/// The firmware status document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Firmware {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product: Product,
    #[serde(default)]
    pub last_check: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_msg: String,
}

pub fn parse(output: &AgentOutput) -> Result<Option<Firmware>, ShapeError> {
    output.json(section::FIRMWARE)
}

pub fn discover(firmware: &Firmware) -> Vec<Service> {
    let mut services = vec![Service::Firmware];
    if firmware.product_id.as_deref() == Some(BUSINESS_PRODUCT) {
        services.push(Service::Business);
    }
    services
}

/// Reads timestamps like `Fri Oct 25 17:02:31 UTC 2024`. The zone is always UTC on the box.
pub fn parse_last_check(input: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let without_zone = match parts.as_slice() {
        [weekday, month, day, time, _zone, year] => {
            format!("{} {} {} {} {}", weekday, month, day, time, year)
        }
        _ => return None,
    };

    NaiveDateTime::parse_from_str(&without_zone, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc())
}

pub fn check(params: &FirmwareParams, firmware: &Firmware, ctx: &CheckContext) -> Vec<CheckResult> {
    let mut results = vec![CheckResult::ok(format!(
        "{} ({})",
        firmware.product.product_series, firmware.product.product_nickname
    ))];

    let last_check = match firmware.last_check {
        Some(ref last_check) => last_check,
        None => {
            results.push(CheckResult::ok(firmware.status_msg.as_str()));
            return results;
        }
    };

    match parse_last_check(last_check) {
        Some(checked_at) => {
            let age = (ctx.now - checked_at).num_seconds() as f64;
            results.push(
                CheckLevels::new("Last update check", render::timespan)
                    .metric("last_check")
                    .unit(Unit::Seconds)
                    .levels(params.last_check)
                    .notice_only(true)
                    .check(age),
            );
        }
        None => results.push(CheckResult::unknown(format!(
            "Cannot read last update check {:?}",
            last_check
        ))),
    }

    if firmware.status == UPDATE_PENDING {
        results.push(CheckResult::ok(firmware.status_msg.as_str()));
    }

    match firmware.product.product_check {
        Some(ref product_check) => results.push(CheckResult::metric_only(Metric::new(
            "updates",
            product_check.upgrade_packages.len() as f64,
        ))),
        None => debug!("no upgrade package list"),
    }

    results
}

/// Accepts a date, a date with time, or a full RFC 3339 timestamp. Times without zone are UTC.
pub fn parse_valid_to(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn check_business(
    params: &BusinessParams,
    firmware: &Firmware,
    ctx: &CheckContext,
) -> Vec<CheckResult> {
    let valid_to = match firmware.product.product_license {
        Some(ref license) => &license.valid_to,
        None => return vec![CheckResult::unknown("No license information")],
    };

    let expires = match parse_valid_to(valid_to) {
        Some(expires) => expires,
        None => {
            return vec![CheckResult::unknown(format!(
                "Cannot read license expiry {:?}",
                valid_to
            ))]
        }
    };

    // whole days, rounded down like a calendar would
    let days = (expires - ctx.now).num_seconds().div_euclid(86_400);
    vec![CheckLevels::new("License expires in", render::days)
        .metric("expiredays")
        .levels(Some(params.expiredays.unwrap_or(Levels::lower(60.0, 30.0))))
        .check(days as f64)]
}
