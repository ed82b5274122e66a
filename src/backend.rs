//! Counter subsystem adapter.
//!
//! The engine never talks to hardware counters directly. Everything it needs,
//! creating event sets, adding counters, starting, reading and stopping them,
//! resolving counter names and enumerating instrumented threads, goes through
//! the [`CounterBackend`] trait. An adapter must be safe to call from many
//! threads at once; a given event set is only ever used by the thread that
//! created it.
//!
//! Two implementations ship with the crate:
//!
//! - [`SoftwareBackend`] - clock based counters available on every platform
//! - `FakeBackend` - a scriptable backend used by the unit tests

mod software;

#[cfg(test)]
mod fake;

pub use software::SoftwareBackend;

#[cfg(test)]
pub(crate) use fake::FakeBackend;

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BackendError;

/// Identifier of an instrumented thread, as reported by the backend.
pub type ThreadKey = u64;

/// Handle of an event set created by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventSetHandle(usize);

impl EventSetHandle {
    /// Wraps a backend-specific raw handle.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the backend-specific raw handle.
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Result of resolving a counter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCounter {
    /// Code passed back to [`CounterBackend::add_counter`].
    pub code: u32,
    /// Identifier of the component owning the counter.
    pub component: u32,
}

/// Narrow interface to a performance counter subsystem.
pub trait CounterBackend: Debug + Send + Sync + 'static {
    /// One-time subsystem initialization, called by the initializing thread.
    fn initialize(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Resolves a counter name to its code and owning component.
    fn resolve_name(&self, name: &str) -> Result<ResolvedCounter, BackendError>;

    /// Human readable name of a component, used in diagnostics.
    fn component_name(&self, component: u32) -> String {
        format!("component {component}")
    }

    /// Creates an empty event set.
    fn create_event_set(&self) -> Result<EventSetHandle, BackendError>;

    /// Destroys an event set, stopped or not.
    fn destroy_event_set(&self, set: EventSetHandle) -> Result<(), BackendError>;

    /// Adds a counter to an event set.
    ///
    /// Fails with [`BackendError::Incompatible`] if the counter cannot be
    /// counted together with the counters already in the set.
    fn add_counter(&self, set: EventSetHandle, code: u32) -> Result<(), BackendError>;

    /// Switches an event set bound to `component` to multiplexed counting.
    fn enable_multiplex(&self, _set: EventSetHandle, _component: u32) -> Result<(), BackendError> {
        Err(BackendError::Failure("multiplexing is not supported".to_string()))
    }

    /// Starts counting.
    fn start(&self, set: EventSetHandle) -> Result<(), BackendError>;

    /// Stops counting and stores the final readings into `values`.
    fn stop(&self, set: EventSetHandle, values: &mut [i64]) -> Result<(), BackendError>;

    /// Stores the current readings into `values`.
    fn read(&self, set: EventSetHandle, values: &mut [i64]) -> Result<(), BackendError>;

    /// Stores the current readings into `values` and returns a cycle timestamp
    /// taken together with them.
    fn read_with_timestamp(
        &self,
        set: EventSetHandle,
        values: &mut [i64],
    ) -> Result<i64, BackendError>;

    /// Nominal clock rate in MHz, used to convert cycles to time.
    fn clock_rate_mhz(&self) -> i64;

    /// Identifier of the calling thread.
    fn current_thread(&self) -> ThreadKey {
        current_thread_key()
    }

    /// All threads known to the subsystem, in registration order.
    fn list_live_threads(&self) -> Vec<ThreadKey>;

    /// Whether any event set is still counting.
    fn has_running_event_sets(&self) -> bool;

    /// Releases all subsystem resources.
    fn shutdown(&self);
}

/// Global counter for assigning keys to threads.
static NEXT_THREAD_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Key assigned to the current thread on first use, stable for its lifetime.
    static THREAD_KEY: ThreadKey = NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed);
}

/// Returns a process-unique key for the calling thread.
///
/// Keys are never reused, even after the owning thread exits.
pub fn current_thread_key() -> ThreadKey {
    THREAD_KEY.with(|key| *key)
}
