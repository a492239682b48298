//! Packet filter state table and alias table usage.

use serde::{Deserialize, Serialize};

use crate::checks::Service;
use crate::error::ShapeError;
use crate::normalize::de;
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Levels};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirewallParams {
    pub pf_states: Option<Levels>,
    pub aliases: Option<Levels>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PfStates {
    #[serde(deserialize_with = "de::u64")]
    pub current: u64,
    #[serde(deserialize_with = "de::u64")]
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(deserialize_with = "de::u64")]
    pub used: u64,
    #[serde(deserialize_with = "de::u64")]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Firewall {
    pub pf_states: Option<PfStates>,
    pub alias_table: Option<AliasTable>,
}

pub fn parse(output: &AgentOutput) -> Result<Firewall, ShapeError> {
    Ok(Firewall {
        pf_states: output.json(section::PF_STATES)?,
        alias_table: output.json(section::ALIAS_TABLE)?,
    })
}

pub fn discover(firewall: &Firewall) -> Vec<Service> {
    if firewall.pf_states.is_some() || firewall.alias_table.is_some() {
        vec![Service::Firewall]
    } else {
        Vec::new()
    }
}

pub fn check(params: &FirewallParams, firewall: &Firewall) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if let Some(ref pf) = firewall.pf_states {
        results.push(
            CheckLevels::new("PF States", render::count)
                .metric("pf_states")
                .levels(params.pf_states)
                .boundaries(0.0, Some(pf.limit as f64))
                .check(pf.current as f64),
        );
    }

    if let Some(ref aliases) = firewall.alias_table {
        results.push(
            CheckLevels::new("Aliases", render::count)
                .metric("aliases")
                .levels(params.aliases)
                .boundaries(0.0, Some(aliases.size as f64))
                .check(aliases.used as f64),
        );
    }

    results
}
