//! The instrumentation context: lifecycle, global lock and region operations.
//!
//! A [`Profiler`] owns everything one instrumented process needs: the counter
//! backend, the configuration, the component registry, the region registry
//! and the lifecycle state. The crate-level free functions operate on a
//! process-global instance; tests and tools create their own.
//!
//! # Lifecycle
//!
//! ```text
//!                 init / first region_begin
//!  Uninitialized ───────────────────────────► Initialized ──── finalize ───► Finalized
//!        │                                        │
//!        └──── backend init fails ────┐           └── fatal error ──┐
//!                                     ▼                             ▼
//!                                 Deactivated ◄─────────────────────┘
//! ```
//!
//! Orthogonally every thread is either active or cleaned up. A thread's
//! counter session is opened by its first `region_begin` and released by
//! `cleanup_thread`, by `finalize` (calling thread only) or by its next
//! region call after the engine stopped.
//!
//! # Locking
//!
//! One global lock guards the region registry and the bookkeeping shared by
//! all threads. Counters are sampled before the lock is taken. Event
//! determination and output generation use a check-lock-check on an atomic
//! flag, so once they are done the fast path never touches the lock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Once};
use std::time::SystemTime;

use arc_swap::ArcSwapOption;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::backend::{CounterBackend, SoftwareBackend, ThreadKey};
use crate::components::{available_defaults, ComponentRegistry};
use crate::config::Config;
use crate::error::{HlError, Result};
use crate::events::{default_event_specs, parse_event_list, EventSpec};
use crate::registry::{Operation, Recorded, RegionRegistry};
use crate::report::{output, Report};
use crate::session::ThreadSession;
use crate::{hl_error, hl_info, hl_warn};

/// Process-wide lifecycle state of a [`Profiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Nothing happened yet.
    Uninitialized = 0,
    /// Region operations are accepted.
    Initialized = 1,
    /// A fatal error stopped the engine; all operations fail.
    Deactivated = 2,
    /// `finalize` was called.
    Finalized = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Initialized,
            2 => LifecycleState::Deactivated,
            _ => LifecycleState::Finalized,
        }
    }
}

/// Global counter for assigning profiler identifiers.
static NEXT_PROFILER_ID: AtomicU64 = AtomicU64::new(1);

/// Per-thread state of one profiler.
#[derive(Debug, Default)]
struct LocalState {
    session: Option<ThreadSession>,
    cleaned_up: bool,
    begin_count: u64,
    end_count: u64,
}

thread_local! {
    /// Local states of the calling thread, keyed by profiler id.
    static LOCAL: RefCell<HashMap<u64, LocalState>> = RefCell::new(HashMap::new());
}

/// State guarded by the global lock.
#[derive(Debug, Default)]
struct Shared {
    registry: Option<RegionRegistry>,
    output_dir: Option<PathBuf>,
    master_thread: Option<ThreadKey>,
    sessions_opened: u64,
    sessions_released: u64,
    shutdown_pending: bool,
}

/// Region based counter instrumentation engine.
///
/// # Examples
///
/// ```rust
/// use regioni::{Config, Profiler};
///
/// let dir = tempfile::tempdir().unwrap();
/// let profiler = Profiler::new(
///     Config::default()
///         .with_events("sys::WALL_NS")
///         .with_output_dir(dir.path())
///         .with_rank(0)
///         .quiet(true),
/// );
///
/// profiler.region_begin("compute").unwrap();
/// let sum: u64 = (0..1000).sum();
/// profiler.read("compute").unwrap();
/// profiler.region_end("compute").unwrap();
/// assert_eq!(sum, 499500);
///
/// let report = profiler.snapshot().unwrap();
/// assert_eq!(report.threads.len(), 1);
///
/// profiler.print_output().unwrap();
/// assert!(dir.path().join("papi").join("rank_0000").is_file());
/// ```
#[derive(Debug)]
pub struct Profiler {
    id: u64,
    backend: Arc<dyn CounterBackend>,
    config: Config,
    init: Once,
    state: CachePadded<AtomicU8>,
    events_determined: CachePadded<AtomicBool>,
    output_generated: CachePadded<AtomicBool>,
    components: ArcSwapOption<ComponentRegistry>,
    shared: Mutex<Shared>,
}

impl Profiler {
    /// Creates a profiler on the clock based [`SoftwareBackend`].
    pub fn new(config: Config) -> Self {
        Self::with_backend(Arc::new(SoftwareBackend::new()), config)
    }

    /// Creates a profiler on a custom counter backend.
    pub fn with_backend(backend: Arc<dyn CounterBackend>, config: Config) -> Self {
        Self {
            id: NEXT_PROFILER_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            config,
            init: Once::new(),
            state: CachePadded::new(AtomicU8::new(LifecycleState::Uninitialized as u8)),
            events_determined: CachePadded::new(AtomicBool::new(false)),
            output_generated: CachePadded::new(AtomicBool::new(false)),
            components: ArcSwapOption::empty(),
            shared: Mutex::new(Shared::default()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The configuration this profiler was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The determined components, once events are determined and until shutdown.
    pub fn components(&self) -> Option<Arc<ComponentRegistry>> {
        self.components.load_full()
    }

    /// Initializes the engine.
    ///
    /// Concurrent callers wait for the first one. Fails with
    /// [`HlError::AlreadyInitialized`] if the engine was initialized before,
    /// [`HlError::AlreadyRunning`] after [`finalize`](Self::finalize) and
    /// [`HlError::NotRunning`] after deactivation.
    pub fn init(&self) -> Result<()> {
        match self.run_init() {
            Some(result) => result,
            None => Err(match self.state() {
                LifecycleState::Initialized => HlError::AlreadyInitialized,
                LifecycleState::Finalized => HlError::AlreadyRunning,
                LifecycleState::Deactivated => HlError::NotRunning,
                LifecycleState::Uninitialized => HlError::NotInitialized,
            }),
        }
    }

    /// Runs initialization if nobody did yet; `None` if it already ran.
    fn run_init(&self) -> Option<Result<()>> {
        let mut outcome = None;
        self.init.call_once(|| outcome = Some(self.initialize()));
        outcome
    }

    fn initialize(&self) -> Result<()> {
        let quiet = self.config.quiet;
        let result = self
            .backend
            .initialize()
            .map_err(HlError::from)
            .and_then(|()| -> Result<()> {
                let base = match &self.config.output_dir {
                    Some(dir) => dir.clone(),
                    None => std::env::current_dir()?,
                };
                let mut shared = self.shared.lock();
                shared.master_thread = Some(self.backend.current_thread());
                shared.output_dir = Some(output::prepare_measurement_dir(
                    &base,
                    SystemTime::now(),
                    quiet,
                ));
                Ok(())
            });

        match &result {
            Ok(()) => {
                self.state
                    .store(LifecycleState::Initialized as u8, Ordering::Release);
                log::debug!("profiler {} initialized", self.id);
            }
            Err(e) => {
                hl_error!(quiet, "Initialization failed: {e}");
                self.state
                    .store(LifecycleState::Deactivated as u8, Ordering::Release);
                self.output_generated.store(true, Ordering::Release);
            }
        }
        result
    }

    /// Sets the counters to record, e.g. `"PAPI_TOT_INS,temperature=instant"`.
    ///
    /// Only the first successful determination has an effect; later calls,
    /// and calls after the first region began, are no-ops. If no requested
    /// counter is usable the default counters are tried; if those fail too
    /// the engine is deactivated.
    pub fn set_events(&self, list: &str) -> Result<()> {
        match self.state() {
            LifecycleState::Uninitialized => return Err(HlError::NotInitialized),
            LifecycleState::Initialized => {}
            LifecycleState::Deactivated | LifecycleState::Finalized => {
                return Err(HlError::NotRunning)
            }
        }
        if self.events_determined.load(Ordering::Acquire) {
            return Ok(());
        }

        let requested = parse_event_list(list)?;
        self.determine_events(Some(requested)).inspect_err(|e| {
            hl_error!(self.config.quiet, "Event determination failed: {e}");
            self.deactivate();
        })
    }

    fn determine_events(&self, requested: Option<Vec<EventSpec>>) -> Result<()> {
        if self.events_determined.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut shared = self.shared.lock();
        if self.events_determined.load(Ordering::Acquire) {
            return Ok(());
        }

        let quiet = self.config.quiet;
        let requested = match (requested, &self.config.events) {
            (Some(requested), _) => requested,
            (None, Some(list)) => parse_event_list(list).unwrap_or_else(|e| {
                hl_warn!(quiet, "Cannot parse event list \"{list}\" ({e}), using default.");
                default_event_specs()
            }),
            (None, None) => available_defaults(self.backend.as_ref()),
        };

        let components = ComponentRegistry::determine(
            self.backend.as_ref(),
            &requested,
            self.config.multiplex,
            quiet,
        )?;
        shared.registry = Some(RegionRegistry::new(components.kinds()));
        self.components.store(Some(Arc::new(components)));
        self.events_determined.store(true, Ordering::Release);
        Ok(())
    }

    /// Begins (or restarts) the named region on the calling thread.
    ///
    /// Initializes the engine and determines the events on first use.
    pub fn region_begin(&self, name: &str) -> Result<()> {
        if let Some(Err(e)) = self.run_init() {
            return Err(e);
        }
        self.region_operation(name, Operation::Begin)
    }

    /// Records an intermediate reading of the named region.
    ///
    /// A read without a begun region is reported and ignored.
    pub fn read(&self, name: &str) -> Result<()> {
        self.region_operation(name, Operation::Read)
    }

    /// Ends the named region and accumulates its counters.
    ///
    /// Fails with [`HlError::InvalidArgument`] unless the region is open.
    pub fn region_end(&self, name: &str) -> Result<()> {
        self.region_operation(name, Operation::End)
    }

    fn region_operation(&self, name: &str, operation: Operation) -> Result<()> {
        match self.state() {
            LifecycleState::Deactivated | LifecycleState::Finalized => {
                self.release_local_session();
                return Err(HlError::NotRunning);
            }
            LifecycleState::Uninitialized | LifecycleState::Initialized => {}
        }

        if operation == Operation::Begin {
            if let Err(e) = self.determine_events(None) {
                hl_error!(self.config.quiet, "Event determination failed: {e}");
                self.deactivate();
                return Err(e);
            }
        }

        let result = LOCAL
            .try_with(|local| {
                let mut local = local.borrow_mut();
                let state = local.entry(self.id).or_default();
                self.apply(state, name, operation)
            })
            .unwrap_or(Err(HlError::NotRunning));

        match result {
            Err(e) if e.is_fatal() => {
                hl_error!(
                    self.config.quiet,
                    "Could not record counters for thread {}: {e}",
                    self.backend.current_thread()
                );
                self.deactivate();
                Err(e)
            }
            other => other,
        }
    }

    fn apply(&self, local: &mut LocalState, name: &str, operation: Operation) -> Result<()> {
        if local.cleaned_up {
            return Err(HlError::NotRunning);
        }
        if operation != Operation::Begin && local.begin_count == 0 {
            return self.unmatched(name, operation, false);
        }

        if local.session.is_none() {
            if operation != Operation::Begin {
                return Err(HlError::NotRunning);
            }
            let components = self.components.load_full().ok_or(HlError::NotRunning)?;
            let session = ThreadSession::open(
                self.backend.as_ref(),
                &components,
                self.config.multiplex,
                self.config.quiet,
            )?;
            self.shared.lock().sessions_opened += 1;
            local.session = Some(session);
        }
        let Some(session) = local.session.as_mut() else {
            return Err(HlError::NotRunning);
        };

        let sample = session.sample(self.backend.as_ref())?;
        let thread = self.backend.current_thread();
        let recorded = match self.shared.lock().registry.as_mut() {
            Some(registry) => registry.record(thread, name, operation, &sample),
            None => Err(HlError::NotRunning),
        };

        match recorded {
            Ok(Recorded::Applied) => {
                match operation {
                    Operation::Begin => local.begin_count += 1,
                    Operation::End => local.end_count += 1,
                    Operation::Read => {}
                }
                Ok(())
            }
            Ok(Recorded::Unmatched) => self.unmatched(name, operation, true),
            Err(e) => Err(e),
        }
    }

    /// Reports a read or end without matching begin.
    ///
    /// An unmatched end found in the registry also suppresses the report.
    fn unmatched(&self, name: &str, operation: Operation, registered: bool) -> Result<()> {
        let quiet = self.config.quiet;
        let function = match operation {
            Operation::Read => "read",
            _ => "region_end",
        };
        hl_warn!(
            quiet,
            "Cannot find matching region for {function}(\"{name}\") for thread id={}.",
            self.backend.current_thread()
        );
        if operation == Operation::Read {
            return Ok(());
        }
        if registered {
            hl_warn!(quiet, "Advice: Check if your regions are matching.");
            self.output_generated.store(true, Ordering::Release);
        }
        Err(HlError::InvalidArgument(format!(
            "no matching region_begin for \"{name}\""
        )))
    }

    /// Releases the calling thread's counter session.
    ///
    /// On the thread that initialized the engine this is a no-op; its
    /// session is released by [`finalize`](Self::finalize). After the engine
    /// stopped, a thread still holding a session releases it here, which may
    /// complete a deferred backend shutdown.
    pub fn cleanup_thread(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Uninitialized => Err(HlError::NotInitialized),
            LifecycleState::Initialized => {
                let thread = self.backend.current_thread();
                if self.shared.lock().master_thread == Some(thread) {
                    return Ok(());
                }
                let counts = LOCAL
                    .try_with(|local| {
                        let mut local = local.borrow_mut();
                        let state = local.entry(self.id).or_default();
                        if state.cleaned_up {
                            return None;
                        }
                        state.cleaned_up = true;
                        Some((state.begin_count, state.end_count))
                    })
                    .ok()
                    .flatten();
                let Some((begins, ends)) = counts else {
                    return Err(HlError::NotRunning);
                };
                if begins != ends {
                    hl_warn!(
                        self.config.quiet,
                        "Thread {thread} cleaned up with {begins} region begins and {ends} region ends."
                    );
                }
                self.release_local_session();
                Ok(())
            }
            LifecycleState::Deactivated | LifecycleState::Finalized => {
                if self.release_local_session() {
                    Ok(())
                } else {
                    Err(HlError::NotRunning)
                }
            }
        }
    }

    /// Stops the engine: releases the calling thread's session, drops all
    /// recorded regions and shuts the backend down once every session is
    /// released.
    ///
    /// Does not write the report; call [`print_output`](Self::print_output)
    /// first.
    pub fn finalize(&self) -> Result<()> {
        match self.state.compare_exchange(
            LifecycleState::Initialized as u8,
            LifecycleState::Finalized as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.clean_up_all();
                Ok(())
            }
            Err(raw) if LifecycleState::from_u8(raw) == LifecycleState::Uninitialized => {
                Err(HlError::NotInitialized)
            }
            Err(_) => Err(HlError::NotRunning),
        }
    }

    fn deactivate(&self) {
        let deactivated = self
            .state
            .compare_exchange(
                LifecycleState::Initialized as u8,
                LifecycleState::Deactivated as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if deactivated {
            hl_error!(self.config.quiet, "Instrumentation is deactivated.");
            self.clean_up_all();
        } else {
            self.release_local_session();
        }
    }

    fn clean_up_all(&self) {
        self.output_generated.store(true, Ordering::Release);
        self.release_local_session();

        let mut shared = self.shared.lock();
        shared.registry = None;
        hl_info!(self.config.quiet, "Output generation is deactivated!");

        if !self.try_shutdown(&mut shared) {
            shared.shutdown_pending = true;
            hl_warn!(
                self.config.quiet,
                "Could not shut down the counter backend since some threads still have running \
                 event sets. Make sure to call cleanup_thread() at the end of all parallel \
                 regions and finalize() in the master thread!"
            );
        }
    }

    /// Shuts the backend down if no session is outstanding.
    fn try_shutdown(&self, shared: &mut Shared) -> bool {
        if shared.sessions_released != shared.sessions_opened
            || self.backend.has_running_event_sets()
        {
            return false;
        }
        self.backend.shutdown();
        self.components.store(None);
        shared.shutdown_pending = false;
        log::debug!("profiler {} shut down its backend", self.id);
        true
    }

    /// Releases the calling thread's session, if any.
    fn release_local_session(&self) -> bool {
        let session = LOCAL
            .try_with(|local| {
                local
                    .borrow_mut()
                    .get_mut(&self.id)
                    .and_then(|state| state.session.take())
            })
            .ok()
            .flatten();
        let Some(session) = session else {
            return false;
        };

        session.release(self.backend.as_ref(), self.config.quiet);
        let mut shared = self.shared.lock();
        shared.sessions_released += 1;
        if shared.shutdown_pending && self.try_shutdown(&mut shared) {
            hl_info!(self.config.quiet, "Deferred backend shutdown completed.");
        }
        true
    }

    /// Writes the report once.
    ///
    /// Later calls, concurrent or not, do nothing. Output is skipped with a
    /// warning if region begins and ends do not match across all threads;
    /// the skip counts as generation. Only I/O and serialization failures
    /// are returned, and they allow a later retry.
    pub fn print_output(&self) -> Result<()> {
        if self.output_generated.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.state() != LifecycleState::Initialized {
            return Ok(());
        }
        let shared = self.shared.lock();
        if self.output_generated.load(Ordering::Acquire) {
            return Ok(());
        }

        let quiet = self.config.quiet;
        let (Some(registry), Some(components)) = (shared.registry.as_ref(), self.components())
        else {
            hl_info!(quiet, "No events were recorded.");
            self.output_generated.store(true, Ordering::Release);
            return Ok(());
        };
        if registry.thread_count() == 0 {
            hl_info!(quiet, "No events were recorded.");
            self.output_generated.store(true, Ordering::Release);
            return Ok(());
        }
        if registry.begin_count() != registry.end_count() {
            hl_warn!(quiet, "Cannot generate output due to not matching regions.");
            log::debug!(
                "region begins: {}, region ends: {}",
                registry.begin_count(),
                registry.end_count()
            );
            self.output_generated.store(true, Ordering::Release);
            return Ok(());
        }

        let report = Report::collect(
            registry,
            components.counter_names(),
            &self.backend.list_live_threads(),
            self.backend.clock_rate_mhz(),
        );
        let dir = match &shared.output_dir {
            Some(dir) => dir.clone(),
            None => {
                output::prepare_measurement_dir(&std::env::current_dir()?, SystemTime::now(), quiet)
            }
        };

        hl_info!(quiet, "Print results...");
        let path = output::write_report(&dir, self.config.rank, &report).inspect_err(|e| {
            hl_error!(quiet, "Cannot create output file in {}: {e}", dir.display());
        })?;
        self.output_generated.store(true, Ordering::Release);
        log::debug!("report written to {}", path.display());

        if self.config.report_to_stdout {
            output::echo(&report, &path)?;
        }
        Ok(())
    }

    /// Builds the report of everything recorded so far, without writing it.
    pub fn snapshot(&self) -> Result<Report> {
        match self.state() {
            LifecycleState::Uninitialized => return Err(HlError::NotInitialized),
            LifecycleState::Deactivated | LifecycleState::Finalized => {
                return Err(HlError::NotRunning)
            }
            LifecycleState::Initialized => {}
        }

        let shared = self.shared.lock();
        let cpu_in_mhz = self.backend.clock_rate_mhz();
        Ok(match (shared.registry.as_ref(), self.components()) {
            (Some(registry), Some(components)) => Report::collect(
                registry,
                components.counter_names(),
                &self.backend.list_live_threads(),
                cpu_in_mhz,
            ),
            _ => Report {
                cpu_in_mhz,
                threads: Vec::new(),
            },
        })
    }
}
