//! Unbound DNS resolver statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checks::{present, skipped, CheckContext, Service};
use crate::error::ShapeError;
use crate::normalize::{self, de};
use crate::section::{self, AgentOutput};
use crate::{render, CheckLevels, CheckResult, Unit};

const TOTALS: [&str; 4] = ["queries", "cachehits", "cachemiss", "recursivereplies"];
const CACHES: [&str; 4] = ["msg", "rrset", "infra", "key"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Time {
    #[serde(deserialize_with = "de::opt_f64")]
    pub now: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecursionTime {
    #[serde(deserialize_with = "de::opt_f64")]
    pub avg: Option<f64>,
    #[serde(deserialize_with = "de::opt_f64")]
    pub median: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recursion {
    pub time: RecursionTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Total {
    pub num: BTreeMap<String, Value>,
    pub recursion: Recursion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryNum {
    #[serde(rename = "type")]
    pub kind: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerNum {
    pub rcode: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Num {
    pub query: QueryNum,
    pub answer: AnswerNum,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheCount {
    #[serde(deserialize_with = "de::opt_u64")]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub cache: CacheCount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Data {
    pub total: Total,
    pub num: Num,
    pub msg: Cache,
    pub rrset: Cache,
    pub infra: Cache,
    pub key: Cache,
    pub time: Option<Time>,
}

impl Data {
    fn cache(&self, name: &str) -> Option<&Cache> {
        match name {
            "msg" => Some(&self.msg),
            "rrset" => Some(&self.rrset),
            "infra" => Some(&self.infra),
            "key" => Some(&self.key),
            _ => None,
        }
    }
}

/// The resolver statistics document. Counters are kept as raw JSON and read when rated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Unbound {
    pub status: Option<String>,
    pub time: Option<Time>,
    pub data: Data,
}

impl Unbound {
    /// Unix time the statistics were taken, if the resolver reports it.
    pub fn sampled_at(&self) -> Option<f64> {
        self.time
            .as_ref()
            .or(self.data.time.as_ref())
            .and_then(|t| t.now)
    }
}

pub fn parse(output: &AgentOutput) -> Result<Option<Unbound>, ShapeError> {
    output.json(section::UNBOUND)
}

pub fn discover(unbound: &Unbound) -> Vec<Service> {
    if *unbound == Unbound::default() {
        Vec::new()
    } else {
        vec![Service::Unbound]
    }
}

fn title(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub fn check(unbound: &Unbound, ctx: &mut CheckContext) -> Vec<CheckResult> {
    let status = unbound.status.as_deref().unwrap_or_default();
    let mut results = vec![if status == "ok" {
        CheckResult::ok(format!("Status {}", status))
    } else {
        CheckResult::warn(format!("Status {}", status))
    }];

    let now = unbound
        .sampled_at()
        .unwrap_or_else(|| ctx.now.timestamp() as f64);
    let data = &unbound.data;

    for name in TOTALS {
        let metric = format!("total_{}", name);
        let key = format!("opnsense_unbound.{}", metric);
        let value = data.total.num.get(name).unwrap_or(&Value::Null);
        let rate = normalize::counter(name, value)
            .and_then(|value| ctx.rate_at(&key, now, value as f64));
        if let Some(rate) = skipped(&key, rate) {
            results.push(
                CheckLevels::new(&title(name), render::rate)
                    .metric(&metric)
                    .check(rate),
            );
        }
    }

    let recursion = &data.total.recursion.time;
    for (label, metric, value) in [
        ("Average Recursion Time", "recursion_time_avg", recursion.avg),
        ("Median Recursion Time", "recursion_time_median", recursion.median),
    ] {
        if let Some(value) = skipped(metric, present(metric, value)) {
            results.push(
                CheckLevels::new(label, render::timespan)
                    .metric(metric)
                    .unit(Unit::Seconds)
                    .notice_only(true)
                    .check(value),
            );
        }
    }

    let labelled = data
        .num
        .query
        .kind
        .iter()
        .map(|(kind, count)| {
            (format!("Query Type {}", kind), format!("query_type_{}", kind), count)
        })
        .chain(data.num.answer.rcode.iter().map(|(rcode, count)| {
            (format!("Answer RCode: {}", rcode), format!("rcode_{}", rcode), count)
        }));
    for (label, metric, count) in labelled {
        let metric = metric.to_lowercase();
        let key = format!("opnsense_unbound.{}", metric);
        let rate = normalize::counter(&metric, count)
            .and_then(|value| ctx.rate_at(&key, now, value as f64));
        if let Some(rate) = skipped(&key, rate) {
            results.push(
                CheckLevels::new(&label, render::rate)
                    .metric(&metric)
                    .notice_only(true)
                    .check(rate),
            );
        }
    }

    for name in CACHES {
        let metric = format!("{}_cache_count", name);
        let count = data.cache(name).and_then(|c| c.cache.count);
        if let Some(count) = skipped(&metric, present(&metric, count)) {
            results.push(
                CheckLevels::new(&format!("Cache Count {}", title(name)), render::count)
                    .metric(&metric)
                    .notice_only(true)
                    .check(count as f64),
            );
        }
    }

    results
}
