//! Runtime configuration.
//!
//! The engine is configured through environment variables, read once when a
//! [`Profiler`](crate::Profiler) is created:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `PAPI_EVENTS` | Requested counters, comma separated, optional `=instant`/`=delta` suffix |
//! | `PAPI_MULTIPLEX` | If set, multiplex event sets of component 0 |
//! | `PAPI_OUTPUT_DIRECTORY` | Parent directory of the measurement directory (default: cwd) |
//! | `PAPI_NO_WARNING` | If set, suppress informational and warning output |
//! | `PAPI_REPORT` | If set, also print the report to stdout |
//!
//! The process rank used to name the report file is taken from the first of
//! `OMPI_COMM_WORLD_RANK`, `ALPS_APP_PE`, `PMI_RANK` and `SLURM_PROCID` that
//! is set.

use std::path::PathBuf;

/// Environment variable holding the requested counter list.
pub const ENV_EVENTS: &str = "PAPI_EVENTS";
/// Environment variable enabling multiplexing.
pub const ENV_MULTIPLEX: &str = "PAPI_MULTIPLEX";
/// Environment variable overriding the output directory.
pub const ENV_OUTPUT_DIRECTORY: &str = "PAPI_OUTPUT_DIRECTORY";
/// Environment variable silencing diagnostics.
pub const ENV_NO_WARNING: &str = "PAPI_NO_WARNING";
/// Environment variable echoing the report to stdout.
pub const ENV_REPORT: &str = "PAPI_REPORT";

/// Rank variables in the order they are consulted.
pub const RANK_VARIABLES: [&str; 4] = [
    "OMPI_COMM_WORLD_RANK",
    "ALPS_APP_PE",
    "PMI_RANK",
    "SLURM_PROCID",
];

/// Engine configuration.
///
/// # Examples
///
/// ```rust
/// use regioni::Config;
///
/// let config = Config::default()
///     .with_events("PAPI_TOT_INS,PAPI_TOT_CYC")
///     .with_output_dir("/tmp/measurements")
///     .quiet(true);
///
/// assert!(config.quiet);
/// assert_eq!(config.events.as_deref(), Some("PAPI_TOT_INS,PAPI_TOT_CYC"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Requested counter list; `None` selects the default events.
    pub events: Option<String>,
    /// Multiplex counters of component 0.
    pub multiplex: bool,
    /// Parent directory of the measurement directory; `None` is the current directory.
    pub output_dir: Option<PathBuf>,
    /// Suppress informational and warning diagnostics.
    pub quiet: bool,
    /// Print the report to stdout after writing it.
    pub report_to_stdout: bool,
    /// Process rank used for the report file name.
    pub rank: Option<u32>,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    ///
    /// Flags are enabled by the mere presence of their variable.
    ///
    /// ```rust
    /// use std::collections::HashMap;
    /// use regioni::Config;
    ///
    /// let env = HashMap::from([("PAPI_NO_WARNING", "1"), ("PMI_RANK", "7")]);
    /// let config = Config::from_lookup(|key| env.get(key).map(|v| v.to_string()));
    ///
    /// assert!(config.quiet);
    /// assert_eq!(config.rank, Some(7));
    /// ```
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            events: lookup(ENV_EVENTS),
            multiplex: lookup(ENV_MULTIPLEX).is_some(),
            output_dir: lookup(ENV_OUTPUT_DIRECTORY).map(PathBuf::from),
            quiet: lookup(ENV_NO_WARNING).is_some(),
            report_to_stdout: lookup(ENV_REPORT).is_some(),
            rank: determine_rank(&lookup),
        }
    }

    /// Sets the requested counter list.
    pub fn with_events(mut self, events: impl Into<String>) -> Self {
        self.events = Some(events.into());
        self
    }

    /// Sets the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Sets the process rank.
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    /// Enables or disables multiplexing.
    pub fn multiplex(mut self, enabled: bool) -> Self {
        self.multiplex = enabled;
        self
    }

    /// Enables or disables quiet mode.
    pub fn quiet(mut self, enabled: bool) -> Self {
        self.quiet = enabled;
        self
    }

    /// Enables or disables printing the report to stdout.
    pub fn report_to_stdout(mut self, enabled: bool) -> Self {
        self.report_to_stdout = enabled;
        self
    }
}

/// The first rank variable that is set decides; a value that is not a
/// non-negative integer yields no rank.
fn determine_rank(lookup: &impl Fn(&str) -> Option<String>) -> Option<u32> {
    RANK_VARIABLES
        .iter()
        .find_map(|key| lookup(key))
        .and_then(|value| value.trim().parse().ok())
}
