//! CARP summary and the role of single virtual IPs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checks::Service;
use crate::error::ShapeError;
use crate::normalize::de;
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Levels, Metric};

const MASTER: &str = "MASTER";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarpParams {
    pub master_levels_lower: Option<Levels>,
    pub master_levels_upper: Option<Levels>,
    pub backup_levels_lower: Option<Levels>,
    pub backup_levels_upper: Option<Levels>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VipParams {
    /// Expected role of every VIP. Takes precedence over the roles seen at discovery.
    pub expected_status: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VipDiscoverMode {
    #[default]
    None,
    Master,
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VipGrouping {
    /// One service per interface and vhid.
    #[default]
    None,
    /// One service per interface.
    Interface,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VipDiscovery {
    pub discover: VipDiscoverMode,
    pub group_by: VipGrouping,
}

/// Global CARP state of the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Carp {
    #[serde(default, deserialize_with = "de::opt_i64")]
    pub demotion: Option<i64>,
    #[serde(default, deserialize_with = "de::flag")]
    pub maintenancemode: bool,
    #[serde(default)]
    pub status_msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vip {
    pub interface: String,
    #[serde(default, deserialize_with = "de::string")]
    pub vhid: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub subnet: String,
}

impl Vip {
    fn is_master(&self) -> bool {
        self.status == MASTER
    }
}

pub fn parse_carp(output: &AgentOutput) -> Result<Option<Carp>, ShapeError> {
    output.json(section::CARP)
}

pub fn parse_vips(output: &AgentOutput) -> Result<Option<Vec<Vip>>, ShapeError> {
    output.jsonl(section::VIP)
}

pub fn discover_carp(carp: Option<&Carp>) -> Vec<Service> {
    carp.map(|_| Service::Carp).into_iter().collect()
}

fn count(
    label: &str,
    metric: &str,
    value: usize,
    total: usize,
    lower: Option<Levels>,
    upper: Option<Levels>,
) -> CheckResult {
    CheckLevels::new(label, render::count)
        .metric(metric)
        .levels(lower)
        .levels(upper)
        .boundaries(0.0, Some(total as f64))
        .notice_only(value == 0)
        .check(value as f64)
}

pub fn check_carp(params: &CarpParams, carp: &Carp, vips: &[Vip]) -> Vec<CheckResult> {
    let mut results = vec![CheckResult::ok(if carp.status_msg.is_empty() {
        "OK"
    } else {
        carp.status_msg.as_str()
    })];

    if let Some(demotion) = carp.demotion {
        results.push(CheckResult::metric_only(Metric::new(
            "demotion",
            demotion as f64,
        )));
    }

    if carp.maintenancemode {
        results.push(CheckResult::warn("Maintenance Mode is active"));
    }

    let tally = |mode: &str| {
        let (master, backup): (Vec<&Vip>, Vec<&Vip>) = vips
            .iter()
            .filter(|vip| vip.mode == mode)
            .partition(|vip| vip.is_master());
        (master.len(), backup.len())
    };

    let (master, backup) = tally("carp");
    results.push(count(
        "CARP Master",
        "carp_master",
        master,
        master + backup,
        params.master_levels_lower,
        params.master_levels_upper,
    ));
    results.push(count(
        "CARP Backup",
        "carp_backup",
        backup,
        master + backup,
        params.backup_levels_lower,
        params.backup_levels_upper,
    ));

    let (master, backup) = tally("ipalias");
    results.push(count(
        "IPAlias Master",
        "ipalias_master",
        master,
        master + backup,
        params.master_levels_lower,
        params.master_levels_upper,
    ));
    results.push(count(
        "IPAlias Backup",
        "ipalias_backup",
        backup,
        master + backup,
        params.backup_levels_lower,
        params.backup_levels_upper,
    ));

    results
}

/// Roles seen at discovery, by vhid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhid: Option<String>,
    #[serde(default)]
    pub discovery_status: BTreeMap<String, String>,
}

pub fn discover_vips(params: &VipDiscovery, vips: &[Vip]) -> Vec<Service> {
    let selected: Vec<&Vip> = match params.discover {
        VipDiscoverMode::None => return Vec::new(),
        VipDiscoverMode::Master => vips.iter().filter(|vip| vip.is_master()).collect(),
        VipDiscoverMode::All => vips.iter().collect(),
    };

    match params.group_by {
        VipGrouping::None => selected
            .into_iter()
            .map(|vip| Service::Vip {
                item: format!("{}@{}", vip.interface, vip.vhid),
                baseline: Baseline {
                    interface: vip.interface.clone(),
                    vhid: Some(vip.vhid.clone()),
                    discovery_status: BTreeMap::from([(vip.vhid.clone(), vip.status.clone())]),
                },
            })
            .collect(),
        VipGrouping::Interface => {
            let mut groups: BTreeMap<&str, BTreeMap<String, String>> = BTreeMap::new();
            for vip in selected {
                groups
                    .entry(vip.interface.as_str())
                    .or_default()
                    .insert(vip.vhid.clone(), vip.status.clone());
            }

            groups
                .into_iter()
                .map(|(interface, roles)| Service::Vip {
                    item: interface.to_owned(),
                    baseline: Baseline {
                        interface: interface.to_owned(),
                        vhid: None,
                        discovery_status: roles,
                    },
                })
                .collect()
        }
    }
}

pub fn check_vip(params: &VipParams, baseline: &Baseline, vips: &[Vip]) -> Vec<CheckResult> {
    vips.iter()
        .filter(|vip| vip.interface == baseline.interface)
        .filter(|vip| baseline.vhid.as_ref().map_or(true, |vhid| *vhid == vip.vhid))
        .map(|vip| {
            let expected = params
                .expected_status
                .as_ref()
                .or_else(|| baseline.discovery_status.get(&vip.vhid));
            match expected {
                Some(expected) if *expected == vip.status => {
                    CheckResult::ok(format!("{}: {}", vip.status, vip.subnet))
                }
                Some(expected) => CheckResult::warn(format!(
                    "{}: {} (expected: {})",
                    vip.status, vip.subnet, expected
                )),
                None => CheckResult::warn(format!(
                    "{}: {} (not discovered)",
                    vip.status, vip.subnet
                )),
            }
        })
        .collect()
}
