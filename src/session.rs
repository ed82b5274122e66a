//! Thread-local counter session.
//!
//! Every instrumented thread owns one running event set per component of the
//! [`ComponentRegistry`]. Sessions are created on the thread's first region
//! begin and must be released explicitly; a session that is merely dropped
//! leaves its event sets running in the backend, which defers backend
//! shutdown.

use crate::backend::{CounterBackend, EventSetHandle};
use crate::components::{new_event_set, ComponentRegistry};
use crate::error::{BackendError, Result};
use crate::hl_error;

/// One counter sample of all components, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Sample {
    /// Timestamp taken with the last component's readings.
    pub(crate) cycles: i64,
    /// Readings of all component counters.
    pub(crate) values: Vec<i64>,
}

#[derive(Debug)]
struct LocalEventSet {
    handle: EventSetHandle,
    values: Vec<i64>,
}

/// Running event sets of one thread.
#[derive(Debug)]
pub(crate) struct ThreadSession {
    sets: Vec<LocalEventSet>,
}

impl ThreadSession {
    /// Creates, fills and starts one event set per component.
    ///
    /// On failure every event set created so far is destroyed again.
    pub(crate) fn open(
        backend: &dyn CounterBackend,
        registry: &ComponentRegistry,
        multiplex: bool,
        quiet: bool,
    ) -> Result<Self> {
        let mut session = Self { sets: Vec::new() };
        match session.create_sets(backend, registry, multiplex, quiet) {
            Ok(()) => Ok(session),
            Err(e) => {
                session.release(backend, quiet);
                Err(e.into())
            }
        }
    }

    fn create_sets(
        &mut self,
        backend: &dyn CounterBackend,
        registry: &ComponentRegistry,
        multiplex: bool,
        quiet: bool,
    ) -> std::result::Result<(), BackendError> {
        for component in registry.components() {
            let handle = new_event_set(backend, component.id, multiplex, quiet)?;
            self.sets.push(LocalEventSet {
                handle,
                values: vec![0; component.counters.len()],
            });
            for counter in &component.counters {
                backend.add_counter(handle, counter.code)?;
            }
        }

        for set in &mut self.sets {
            backend.start(set.handle)?;
            // warm up code paths and buffers
            backend.read_with_timestamp(set.handle, &mut set.values)?;
        }
        Ok(())
    }

    /// Reads all event sets in registry order.
    ///
    /// The cycle timestamp is taken together with the last component's
    /// readings.
    pub(crate) fn sample(&mut self, backend: &dyn CounterBackend) -> Result<Sample> {
        let mut cycles = 0;
        let last = self.sets.len().saturating_sub(1);
        for (index, set) in self.sets.iter_mut().enumerate() {
            if index == last {
                cycles = backend.read_with_timestamp(set.handle, &mut set.values)?;
            } else {
                backend.read(set.handle, &mut set.values)?;
            }
            log::trace!("event set {}: {:?}", set.handle.raw(), set.values);
        }

        Ok(Sample {
            cycles,
            values: self.sets.iter().flat_map(|s| s.values.iter().copied()).collect(),
        })
    }

    /// Stops and destroys all event sets. Failures are reported, not returned.
    pub(crate) fn release(mut self, backend: &dyn CounterBackend, quiet: bool) {
        for mut set in self.sets.drain(..) {
            match backend.stop(set.handle, &mut set.values) {
                Ok(()) | Err(BackendError::NotRunning) => {}
                Err(e) => hl_error!(quiet, "Stopping event set failed: {e}"),
            }
            if let Err(e) = backend.destroy_event_set(set.handle) {
                hl_error!(quiet, "Destroying event set failed: {e}");
            }
        }
    }
}
