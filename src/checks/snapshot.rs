//! Boot environment snapshots: which one runs, which one boots next, and retention of the rest.

use serde::{Deserialize, Serialize};

use crate::checks::{CheckContext, Service};
use crate::error::ShapeError;
use crate::normalize::{self, de};
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Levels, Unit};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotParams {
    /// Name of the snapshot the system is expected to run on.
    pub running: Option<String>,
    /// Age of the oldest inactive snapshot in seconds.
    pub oldest: Option<Levels>,
    /// Size of the biggest inactive snapshot in bytes.
    pub maxsize: Option<Levels>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    name: String,
    #[serde(deserialize_with = "de::i64")]
    created: i64,
    #[serde(default)]
    active: String,
    size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    /// Unix timestamp.
    pub created: i64,
    pub current: bool,
    pub reboot: bool,
    /// Bytes.
    pub size: u64,
}

impl TryFrom<RawSnapshot> for Snapshot {
    type Error = ShapeError;

    fn try_from(raw: RawSnapshot) -> Result<Self, Self::Error> {
        let size = normalize::size(&raw.size).map_err(|_| ShapeError::InvalidValue {
            record: format!("snapshot {}", raw.name),
            field: "size",
            value: raw.size.clone(),
        })?;
        let flags = normalize::snapshot_flags(&raw.active);

        Ok(Snapshot {
            name: raw.name,
            created: raw.created,
            current: flags.current,
            reboot: flags.reboot,
            size,
        })
    }
}

pub fn parse(output: &AgentOutput) -> Result<Vec<Snapshot>, ShapeError> {
    output
        .jsonl::<RawSnapshot>(section::SNAPSHOT)?
        .unwrap_or_default()
        .into_iter()
        .map(Snapshot::try_from)
        .collect()
}

pub fn discover(snapshots: &[Snapshot]) -> Vec<Service> {
    if snapshots.is_empty() {
        Vec::new()
    } else {
        vec![Service::Snapshot]
    }
}

pub fn check(
    params: &SnapshotParams,
    snapshots: &[Snapshot],
    ctx: &CheckContext,
) -> Vec<CheckResult> {
    if snapshots.is_empty() {
        return Vec::new();
    }

    let mut results = Vec::new();
    let current = snapshots.iter().find(|s| s.current);
    let reboot = snapshots.iter().find(|s| s.reboot);

    match current {
        Some(current) => match params.running {
            Some(ref running) if *running != current.name => results.push(CheckResult::warn(
                format!("Running on {} (expected: {})", current.name, running),
            )),
            _ => results.push(CheckResult::ok(format!("Running on {}", current.name))),
        },
        None => results.push(CheckResult::unknown("No active snapshot found")),
    }

    match reboot {
        Some(reboot) if !current.map_or(false, |c| c.reboot) => {
            results.push(CheckResult::warn(format!("Next boot: {}", reboot.name)))
        }
        Some(_) => {}
        None => results.push(CheckResult::unknown("No snapshot selected for next boot")),
    }

    let inactive: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| !s.current && !s.reboot)
        .collect();

    if let Some(oldest) = inactive.iter().map(|s| s.created).min() {
        let age = (ctx.now.timestamp() - oldest) as f64;
        results.push(
            CheckLevels::new("Oldest snapshot age", render::timespan)
                .metric("oldest")
                .unit(Unit::Seconds)
                .levels(params.oldest)
                .check(age),
        );
    }

    if let Some(biggest) = inactive.iter().map(|s| s.size).max() {
        results.push(
            CheckLevels::new("Biggest snapshot", render::disksize)
                .metric("maxsize")
                .unit(Unit::Bytes)
                .levels(params.maxsize)
                .check(biggest as f64),
        );
    }

    results
}
