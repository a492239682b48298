//! The opnsense-agent crate polls the REST API of an OPNsense firewall and turns the returned JSON
//! into monitoring check results.
//!
//! The pipeline has two stages. The collector ([agent::Agent]) fetches every enabled endpoint
//! through the [api] client and writes the raw documents as agent sections. The evaluation stage
//! parses those sections into typed records, discovers the checkable services
//! ([checks::discover]) and evaluates each of them ([checks::check]) into a [Resource].
//!
//! ```rust
//! # #[macro_use]
//! # extern crate opnsense_agent;
//! # use opnsense_agent::{CheckResult, Metric, State};
//! # fn main() {
//! let r1 = CheckResult::ok("Online");
//! let r2 = CheckResult::metric_only(Metric::new("demotion", 0.0));
//! let resource = resource!["CARP"; r1, r2];
//! assert_eq!(&resource.to_nagios_string(), "CARP OK: Online | demotion=0");
//! # }
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[macro_use]
mod macros;

pub mod agent;
pub mod api;
pub mod checks;
pub mod config;
pub mod error;
pub mod normalize;
pub mod rate;
pub mod render;
pub mod runner;
pub mod section;

pub use crate::runner::{Runner, RunnerResult};

/// A Resource is a single monitored service as the monitoring core sees it: a name, the results
/// of one evaluation and the state derived from them.
///
/// Its state is the worst state of all pushed results.
pub struct Resource {
    results: Vec<CheckResult>,
    name: Option<String>,
}

impl Resource {
    pub fn new(name: &str) -> Resource {
        Resource {
            results: Vec::new(),
            name: Some(name.to_owned()),
        }
    }

    /// Pushes a single CheckResult into the resource.
    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result)
    }

    pub fn extend<I>(&mut self, results: I)
    where
        I: IntoIterator<Item = CheckResult>,
    {
        self.results.extend(results)
    }

    /// Returns a slice of the pushed results.
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Will determine a State by the given results. A resource without any result is UNKNOWN.
    pub fn get_state(&self) -> State {
        self.results
            .iter()
            .map(|r| r.state())
            .max()
            .unwrap_or(State::Unknown)
    }

    /// The comma separated summary texts. Notices are included only when they are not OK.
    pub fn summary(&self) -> String {
        self.results
            .iter()
            .filter(|r| !r.text().is_empty() && (!r.is_notice() || r.state() != State::Ok))
            .map(|r| match r.state().marker() {
                "" => r.text().to_owned(),
                marker => format!("{} {}", r.text(), marker),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns a string which nagios understands to determine the service state.
    ///
    /// The first line carries the name, the state, the summary and the performance data. OK
    /// notices follow on separate lines as long output.
    pub fn to_nagios_string(&self) -> String {
        let mut s = String::new();

        if let Some(ref name) = self.name {
            s.push_str(&format!("{} ", name))
        }

        s.push_str(&self.get_state().to_string());

        let summary = self.summary();
        if !summary.is_empty() {
            s.push_str(&format!(": {}", summary));
        }

        let metrics: Vec<_> = self.results.iter().filter_map(|r| r.metric()).collect();
        if !metrics.is_empty() {
            s.push_str(" |");

            for metric in metrics {
                s.push_str(&format!(" {}", metric.perf_string()));
            }
        }

        for notice in self
            .results
            .iter()
            .filter(|r| r.is_notice() && r.state() == State::Ok && !r.text().is_empty())
        {
            s.push('\n');
            s.push_str(notice.text());
        }

        s
    }

    /// Will return the exit code of the determined state via Self::get_state.
    pub fn exit_code(&self) -> i32 {
        self.get_state().exit_code()
    }
}

impl Default for Resource {
    fn default() -> Self {
        Resource {
            results: Vec::new(),
            name: None,
        }
    }
}

/// Represents a service state.
///
/// States are ordered by badness: OK < WARNING < UNKNOWN < CRITICAL, so the `max` of a set of
/// states is the one the service reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl State {
    /// Returns the corresponding nagios exit code to signal the service state of self.
    pub fn exit_code(&self) -> i32 {
        match self {
            State::Ok => 0,
            State::Warning => 1,
            State::Critical => 2,
            State::Unknown => 3,
        }
    }

    /// Marker appended to summary texts of non-OK results.
    pub fn marker(&self) -> &'static str {
        match self {
            State::Ok => "",
            State::Warning => "(!)",
            State::Critical => "(!!)",
            State::Unknown => "(?)",
        }
    }

    fn badness(&self) -> u8 {
        match self {
            State::Ok => 0,
            State::Warning => 1,
            State::Unknown => 2,
            State::Critical => 3,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Ok => "OK",
            State::Warning => "WARNING",
            State::Critical => "CRITICAL",
            State::Unknown => "UNKNOWN",
        })
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &State) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &State) -> Ordering {
        self.badness().cmp(&other.badness())
    }
}

/// The purpose of ToPerfString is only so one can define custom representations of custom types
/// without using the ToString trait so we don't interfere with that.
///
/// Used internally for generation of the performance data.
pub trait ToPerfString {
    fn to_perf_string(&self) -> String;
}

impl_to_perf_string_on_to_string!(u64, i64, f64, String);

impl<T> ToPerfString for Option<T>
where
    T: ToPerfString,
{
    fn to_perf_string(&self) -> String {
        match self {
            Some(ref s) => s.to_perf_string(),
            None => String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Unit {
    None,
    Seconds,
    Percentage,
    Bytes,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::None => Ok(()),
            Unit::Seconds => f.write_str("s"),
            Unit::Percentage => f.write_str("%"),
            Unit::Bytes => f.write_str("B"),
        }
    }
}

/// Direction in which a value breaches its levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upper,
    Lower,
}

/// A (direction, warn, crit) threshold as configured for one metric.
///
/// Upper levels are breached when the value reaches them, lower levels when the value drops
/// below them. The critical level takes precedence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub direction: Direction,
    pub warn: f64,
    pub crit: f64,
}

impl Levels {
    pub fn upper(warn: f64, crit: f64) -> Self {
        Levels {
            direction: Direction::Upper,
            warn,
            crit,
        }
    }

    pub fn lower(warn: f64, crit: f64) -> Self {
        Levels {
            direction: Direction::Lower,
            warn,
            crit,
        }
    }

    pub fn evaluate(&self, value: f64) -> State {
        let breached = |level: f64| match self.direction {
            Direction::Upper => value >= level,
            Direction::Lower => value < level,
        };

        if breached(self.crit) {
            State::Critical
        } else if breached(self.warn) {
            State::Warning
        } else {
            State::Ok
        }
    }
}

/// Range a metric can take, used by graphing on the monitoring side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundaries {
    pub min: f64,
    pub max: Option<f64>,
}

/// A single performance data sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    name: String,
    value: f64,
    levels: Option<(f64, f64)>,
    boundaries: Option<Boundaries>,
    unit: Unit,
}

impl Metric {
    pub fn new(name: &str, value: f64) -> Self {
        Metric {
            name: name.to_owned(),
            value,
            levels: None,
            boundaries: None,
            unit: Unit::None,
        }
    }

    pub fn with_levels(mut self, warn: f64, crit: f64) -> Self {
        self.levels = Some((warn, crit));
        self
    }

    pub fn with_boundaries(mut self, min: f64, max: Option<f64>) -> Self {
        self.boundaries = Some(Boundaries { min, max });
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn levels(&self) -> Option<(f64, f64)> {
        self.levels
    }

    pub fn boundaries(&self) -> Option<Boundaries> {
        self.boundaries
    }

    /// Renders the metric as `label=value[unit];warn;crit;min;max` with trailing empty fields
    /// removed.
    pub fn perf_string(&self) -> String {
        // replace `=`
        let name = self.name.replace('=', "_");

        // quote `'`
        let name = name.replace('\'', "''");

        // quote if contains spaces
        let name = if name.contains(' ') {
            format!("'{}'", name)
        } else {
            name
        };

        metric_string!(
            name,
            format!("{}{}", self.value.to_perf_string(), self.unit),
            self.levels.map(|(warn, _)| warn),
            self.levels.map(|(_, crit)| crit),
            self.boundaries.map(|b| b.min),
            self.boundaries.and_then(|b| b.max)
        )
    }
}

/// The outcome of one aspect of a check: a state with a text, and optionally a metric.
///
/// Notices only show up in the long output unless their state is not OK.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckResult {
    state: State,
    text: String,
    notice: bool,
    metric: Option<Metric>,
}

impl CheckResult {
    pub fn new(state: State, text: impl Into<String>) -> Self {
        CheckResult {
            state,
            text: text.into(),
            notice: false,
            metric: None,
        }
    }

    pub fn ok(text: impl Into<String>) -> Self {
        Self::new(State::Ok, text)
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self::new(State::Warning, text)
    }

    pub fn crit(text: impl Into<String>) -> Self {
        Self::new(State::Critical, text)
    }

    pub fn unknown(text: impl Into<String>) -> Self {
        Self::new(State::Unknown, text)
    }

    /// An OK result without text that only carries a metric.
    pub fn metric_only(metric: Metric) -> Self {
        Self::ok("").with_metric(metric)
    }

    pub fn notice(mut self) -> Self {
        self.notice = true;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_notice(&self) -> bool {
        self.notice
    }

    pub fn metric(&self) -> Option<&Metric> {
        self.metric.as_ref()
    }
}

/// Evaluates a numeric value against optional levels and produces one [CheckResult], with a
/// metric attached when a metric name is set.
///
/// ```rust
/// # use opnsense_agent::{render, CheckLevels, Levels, State};
/// let result = CheckLevels::new("loss", render::percent)
///     .metric("pl")
///     .levels(Some(Levels::upper(10.0, 20.0)))
///     .check(100.0);
/// assert_eq!(result.state(), State::Critical);
/// assert_eq!(result.text(), "loss: 100.00% (warn/crit at 10.00%/20.00%)");
/// ```
pub struct CheckLevels {
    label: String,
    render: fn(f64) -> String,
    metric: Option<String>,
    unit: Unit,
    levels: Vec<Levels>,
    boundaries: Option<Boundaries>,
    notice_only: bool,
}

impl CheckLevels {
    pub fn new(label: &str, render: fn(f64) -> String) -> Self {
        CheckLevels {
            label: label.to_owned(),
            render,
            metric: None,
            unit: Unit::None,
            levels: Vec::new(),
            boundaries: None,
            notice_only: false,
        }
    }

    pub fn metric(mut self, name: &str) -> Self {
        self.metric = Some(name.to_owned());
        self
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Adds levels to evaluate against. `None` means no threshold for this direction.
    pub fn levels(mut self, levels: Option<Levels>) -> Self {
        self.levels.extend(levels);
        self
    }

    pub fn boundaries(mut self, min: f64, max: Option<f64>) -> Self {
        self.boundaries = Some(Boundaries { min, max });
        self
    }

    pub fn notice_only(mut self, notice_only: bool) -> Self {
        self.notice_only = notice_only;
        self
    }

    pub fn check(&self, value: f64) -> CheckResult {
        let mut state = State::Ok;
        let mut breached = None;
        for levels in &self.levels {
            let st = levels.evaluate(value);
            if st > state {
                state = st;
                breached = Some(levels);
            }
        }

        let mut text = format!("{}: {}", self.label, (self.render)(value));
        if let Some(levels) = breached {
            let how = match levels.direction {
                Direction::Upper => "at",
                Direction::Lower => "below",
            };
            text.push_str(&format!(
                " (warn/crit {} {}/{})",
                how,
                (self.render)(levels.warn),
                (self.render)(levels.crit)
            ));
        }

        let mut result = CheckResult::new(state, text);
        if self.notice_only {
            result = result.notice();
        }

        if let Some(ref name) = self.metric {
            let mut metric = Metric::new(name, value).with_unit(self.unit.clone());
            if let Some(upper) = self
                .levels
                .iter()
                .find(|l| l.direction == Direction::Upper)
            {
                metric = metric.with_levels(upper.warn, upper.crit);
            }
            if let Some(b) = self.boundaries {
                metric = metric.with_boundaries(b.min, b.max);
            }
            result = result.with_metric(metric);
        }

        result
    }
}
