//! Requested counter specifications.
//!
//! Users request counters as a comma separated list such as
//! `"PAPI_TOT_INS,PAPI_TOT_CYC,rapl::PACKAGE_ENERGY=instant"`. Each entry may
//! carry a `=instant` or `=delta` suffix selecting how the counter is
//! aggregated (see [`CounterKind`]).

use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::{HlError, Result};

/// Name of the synthetic counter that counts completed region executions.
pub const REGION_COUNT: &str = "region_count";

/// Name of the synthetic counter holding elapsed cycles.
pub const CYCLES: &str = "cycles";

/// Number of synthetic counters stored in front of the requested ones.
pub(crate) const NUM_SYNTHETIC: usize = 2;

/// Counters used when the user requested none, or none of the requested work.
pub const DEFAULT_EVENTS: [&str; 5] = [
    "perf::TASK-CLOCK",
    "PAPI_TOT_INS",
    "PAPI_TOT_CYC",
    "PAPI_FP_INS",
    "PAPI_FP_OPS",
];

/// How a counter's readings are aggregated within a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Reported value is the difference between the end (or read) and begin readings.
    #[default]
    Delta,
    /// Reported value is the absolute reading.
    ///
    /// Region ends add the absolute reading to the total, so after N
    /// executions the total is the sum of N readings, not the latest one.
    Instant,
}

impl CounterKind {
    /// Value contributed by `sample` relative to the begin `offset`.
    #[inline]
    pub(crate) fn contribution(self, sample: i64, offset: i64) -> i64 {
        match self {
            CounterKind::Delta => sample.wrapping_sub(offset),
            CounterKind::Instant => sample,
        }
    }
}

impl Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKind::Delta => write!(f, "delta"),
            CounterKind::Instant => write!(f, "instant"),
        }
    }
}

/// A single requested counter: its name and aggregation kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSpec {
    /// Counter name as understood by the counter subsystem.
    pub name: String,
    /// Aggregation kind.
    pub kind: CounterKind,
}

impl EventSpec {
    /// Creates a new event spec.
    pub fn new(name: impl Into<String>, kind: CounterKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Creates a delta event spec.
    pub fn delta(name: impl Into<String>) -> Self {
        Self::new(name, CounterKind::Delta)
    }

    /// Creates an instant event spec.
    pub fn instant(name: impl Into<String>) -> Self {
        Self::new(name, CounterKind::Instant)
    }
}

impl FromStr for EventSpec {
    type Err = HlError;

    /// Parses one entry. Only the exact suffixes `=instant` and `=delta` are
    /// stripped; any other `=...` stays part of the name.
    fn from_str(entry: &str) -> Result<Self> {
        let entry: String = entry.chars().filter(|c| *c != ' ').collect();
        if entry.is_empty() {
            return Err(HlError::InvalidArgument("empty event name".to_string()));
        }

        let spec = match entry.split_once('=') {
            Some((name, "instant")) => EventSpec::instant(name),
            Some((name, "delta")) => EventSpec::delta(name),
            _ => EventSpec::delta(entry.as_str()),
        };

        if spec.name.is_empty() {
            return Err(HlError::InvalidArgument(format!(
                "missing event name in {:?}",
                spec
            )));
        }
        Ok(spec)
    }
}

impl Display for EventSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.kind)
    }
}

/// Parses a comma separated event list.
///
/// Spaces are ignored and empty entries skipped. A list without a single
/// usable entry is rejected with [`HlError::InvalidArgument`].
///
/// # Examples
///
/// ```rust
/// use regioni::events::{parse_event_list, CounterKind};
///
/// let specs = parse_event_list("PAPI_TOT_INS, rapl::ENERGY=instant").unwrap();
/// assert_eq!(specs.len(), 2);
/// assert_eq!(specs[1].name, "rapl::ENERGY");
/// assert_eq!(specs[1].kind, CounterKind::Instant);
/// ```
pub fn parse_event_list(list: &str) -> Result<Vec<EventSpec>> {
    let specs = list
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(EventSpec::from_str)
        .collect::<Result<Vec<_>>>()?;

    if specs.is_empty() {
        return Err(HlError::InvalidArgument(format!(
            "event list {list:?} names no events"
        )));
    }
    Ok(specs)
}

/// The built-in default event list, all as delta counters.
pub fn default_event_specs() -> Vec<EventSpec> {
    DEFAULT_EVENTS.iter().map(|name| EventSpec::delta(*name)).collect()
}
