//! # Regioni - Region Based Performance Counter Instrumentation
//!
//! A Rust library for instrumenting named code regions with performance
//! counters. Application code brackets a region with begin/end calls, may
//! take intermediate readings inside it, and the library accumulates per
//! thread, per region statistics across all invocations. At process exit
//! (or on request) the accumulated tree is written once as a JSON report.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! fn solve() {}
//!
//! for _ in 0..10 {
//!     regioni::region_begin("solve").unwrap();
//!     solve();
//!     regioni::read("solve").unwrap();
//!     regioni::region_end("solve").unwrap();
//! }
//!
//! // written automatically at exit; explicit calls are fine too
//! regioni::print_output().unwrap();
//! regioni::finalize().unwrap();
//! ```
//!
//! ## How It Works
//!
//! ```text
//!  region_begin("solve")
//!        │
//!        ├── first call: init, determine components, open thread session
//!        │
//!        ├── sample counters of the calling thread      (no lock held)
//!        │
//!        └── global lock: thread ──► region ──► offset / total / reads
//!
//!  exit / print_output()
//!        └── global lock, once: registry ──► papi/rank_NNNN (JSON)
//! ```
//!
//! 1. **Components**: requested counters are grouped by the subsystem that
//!    owns them, since one event set can only hold counters of one
//!    component. Counters that do not exist or cannot be combined are dropped
//!    with a warning; if none survive the default list is used.
//!
//! 2. **Thread sessions**: every thread counts in its own event sets, created
//!    on its first region begin and released by [`cleanup_thread`].
//!
//! 3. **Aggregation**: `Delta` counters accumulate `end - begin`, `Instant`
//!    counters accumulate the raw reading at end. Two synthetic counters are
//!    always present: `region_count` and `cycles`.
//!
//! 4. **Output**: written at most once per process. Unmatched begin/end calls
//!    suppress it with a warning.
//!
//! ## Configuration
//!
//! The process-global profiler reads its [`Config`] from the environment:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `PAPI_EVENTS` | Comma separated counters, each optionally `=instant` or `=delta` |
//! | `PAPI_MULTIPLEX` | Multiplex counters of component 0 |
//! | `PAPI_OUTPUT_DIRECTORY` | Directory receiving the `papi` measurement directory |
//! | `PAPI_NO_WARNING` | Suppress informational and warning messages |
//! | `PAPI_REPORT` | Also print the report to stdout |
//!
//! The output file is named after the MPI rank when one of
//! `OMPI_COMM_WORLD_RANK`, `ALPS_APP_PE`, `PMI_RANK` or `SLURM_PROCID` is
//! set, otherwise it gets a unique name.
//!
//! ## Threads
//!
//! Every thread that begins a region must call [`cleanup_thread`] before it
//! exits, and the initializing thread calls [`finalize`] last. Sessions that
//! are never released keep their event sets running and defer the backend
//! shutdown.
//!
//! ## Custom Instances
//!
//! [`Profiler`] can be instantiated directly with any
//! [`CounterBackend`](backend::CounterBackend), which is how tools and tests
//! run isolated engines side by side.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `table` | [`report::table`]: render reports as ASCII tables, used for `PAPI_REPORT` |
//! | `demo` | Dependencies of the `threads` demo |

pub mod backend;
pub mod components;
pub mod config;
pub mod error;
pub mod events;
pub mod profiler;
pub mod registry;
pub mod report;

mod session;

use std::sync::OnceLock;

pub use config::Config;
pub use error::{HlError, Result};
pub use events::{CounterKind, EventSpec};
pub use profiler::{LifecycleState, Profiler};
pub use report::Report;

/// Logs at info level unless `quiet` is set.
macro_rules! hl_info {
    ($quiet:expr, $($arg:tt)+) => {
        if !$quiet {
            log::info!($($arg)+);
        }
    };
}
pub(crate) use hl_info;

/// Logs at warn level unless `quiet` is set.
macro_rules! hl_warn {
    ($quiet:expr, $($arg:tt)+) => {
        if !$quiet {
            log::warn!($($arg)+);
        }
    };
}
pub(crate) use hl_warn;

/// Logs at error level unless `quiet` is set.
macro_rules! hl_error {
    ($quiet:expr, $($arg:tt)+) => {
        if !$quiet {
            log::error!($($arg)+);
        }
    };
}
pub(crate) use hl_error;

/// The process-global profiler behind the free functions.
static GLOBAL: OnceLock<Profiler> = OnceLock::new();

/// Returns the process-global profiler, configured from the environment.
///
/// The first call registers an exit hook that writes the report.
pub fn global() -> &'static Profiler {
    GLOBAL.get_or_init(|| {
        let profiler = Profiler::new(Config::from_env());
        // SAFETY: `print_output_at_exit` is a plain `extern "C"` function
        // without arguments that never unwinds.
        if unsafe { libc::atexit(print_output_at_exit) } != 0 {
            hl_warn!(
                profiler.config().quiet,
                "Cannot register exit handler, call print_output() explicitly."
            );
        }
        profiler
    })
}

extern "C" fn print_output_at_exit() {
    let Some(profiler) = GLOBAL.get() else {
        return;
    };
    if let Err(e) = profiler.print_output() {
        hl_error!(profiler.config().quiet, "Writing the report at exit failed: {e}");
    }
}

/// Initializes the process-global profiler. See [`Profiler::init`].
pub fn init() -> Result<()> {
    global().init()
}

/// Sets the counters to record. See [`Profiler::set_events`].
pub fn set_events(list: &str) -> Result<()> {
    global().set_events(list)
}

/// Begins the named region on the calling thread. See [`Profiler::region_begin`].
pub fn region_begin(name: &str) -> Result<()> {
    global().region_begin(name)
}

/// Takes an intermediate reading of the named region. See [`Profiler::read`].
pub fn read(name: &str) -> Result<()> {
    global().read(name)
}

/// Ends the named region. See [`Profiler::region_end`].
pub fn region_end(name: &str) -> Result<()> {
    global().region_end(name)
}

/// Releases the calling thread's counters. See [`Profiler::cleanup_thread`].
pub fn cleanup_thread() -> Result<()> {
    global().cleanup_thread()
}

/// Stops the process-global profiler. See [`Profiler::finalize`].
pub fn finalize() -> Result<()> {
    global().finalize()
}

/// Writes the report once. See [`Profiler::print_output`].
pub fn print_output() -> Result<()> {
    global().print_output()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(global(), global()));
    }

    #[test]
    fn test_global_end_without_begin() {
        // the global profiler may be in any state depending on test order,
        // but an end without begin is never accepted
        assert!(region_end("test_global_end_without_begin").is_err());
    }
}
