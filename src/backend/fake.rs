//! Fake backend implementation for testing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{current_thread_key, CounterBackend, EventSetHandle, ResolvedCounter, ThreadKey};
use crate::error::BackendError;

#[derive(Debug)]
struct FakeEventSet {
    codes: Vec<u32>,
    running: bool,
    multiplexed: bool,
}

/// Internal state for the fake backend that can be shared between clones.
#[derive(Debug, Default)]
struct FakeState {
    /// (name, component); the index is the counter code.
    counters: Vec<(String, u32)>,
    incompatible: Vec<(u32, u32)>,
    values: HashMap<(ThreadKey, u32), i64>,
    cycles: HashMap<ThreadKey, i64>,
    sets: Vec<Option<FakeEventSet>>,
    threads: Vec<ThreadKey>,
    fail_event_set_creation: bool,
    fail_reads: bool,
    fail_initialize: bool,
    shutdowns: usize,
}

impl FakeState {
    fn code(&self, name: &str) -> u32 {
        let index = self
            .counters
            .iter()
            .position(|(known, _)| known == name)
            .unwrap_or_else(|| panic!("fake counter {name} is not defined"));
        u32::try_from(index).unwrap()
    }

    fn set_mut(&mut self, set: EventSetHandle) -> Result<&mut FakeEventSet, BackendError> {
        self.sets
            .get_mut(set.raw())
            .and_then(Option::as_mut)
            .ok_or_else(|| BackendError::Failure(format!("invalid event set {}", set.raw())))
    }
}

/// Fake implementation of the counter backend for testing.
///
/// Counter values are scripted per thread: every value setter affects the
/// calling thread only, and reads return the values of the calling thread.
/// Clones share state, so tests keep a clone to drive values while the
/// profiler owns another.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    /// Creates a fake backend without counters.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Defines a counter owned by `component`.
    pub(crate) fn with_counter(self, name: &str, component: u32) -> Self {
        self.state.lock().counters.push((name.to_string(), component));
        self
    }

    /// Declares two counters that cannot share an event set.
    pub(crate) fn with_incompatible(self, first: &str, second: &str) -> Self {
        {
            let mut state = self.state.lock();
            let pair = (state.code(first), state.code(second));
            state.incompatible.push(pair);
        }
        self
    }

    /// Sets the value the calling thread reads for `name`.
    pub(crate) fn set_value(&self, name: &str, value: i64) {
        let mut state = self.state.lock();
        let code = state.code(name);
        state.values.insert((current_thread_key(), code), value);
    }

    /// Adds `delta` to the value the calling thread reads for `name`.
    pub(crate) fn advance(&self, name: &str, delta: i64) {
        let mut state = self.state.lock();
        let code = state.code(name);
        *state.values.entry((current_thread_key(), code)).or_insert(0) += delta;
    }

    /// Adds `delta` to the cycle timestamp of the calling thread.
    pub(crate) fn advance_cycles(&self, delta: i64) {
        *self
            .state
            .lock()
            .cycles
            .entry(current_thread_key())
            .or_insert(0) += delta;
    }

    pub(crate) fn fail_event_set_creation(&self, enabled: bool) {
        self.state.lock().fail_event_set_creation = enabled;
    }

    pub(crate) fn fail_reads(&self, enabled: bool) {
        self.state.lock().fail_reads = enabled;
    }

    pub(crate) fn fail_initialize(&self, enabled: bool) {
        self.state.lock().fail_initialize = enabled;
    }

    /// Number of event sets that currently exist.
    pub(crate) fn live_sets(&self) -> usize {
        self.state.lock().sets.iter().flatten().count()
    }

    /// Number of existing event sets in multiplexed mode.
    pub(crate) fn multiplexed_sets(&self) -> usize {
        self.state
            .lock()
            .sets
            .iter()
            .flatten()
            .filter(|event_set| event_set.multiplexed)
            .count()
    }

    /// Number of times `shutdown` was called.
    pub(crate) fn shutdowns(&self) -> usize {
        self.state.lock().shutdowns
    }
}

impl CounterBackend for FakeBackend {
    fn initialize(&self) -> Result<(), BackendError> {
        if self.state.lock().fail_initialize {
            return Err(BackendError::Failure("initialization failed".to_string()));
        }
        Ok(())
    }

    fn resolve_name(&self, name: &str) -> Result<ResolvedCounter, BackendError> {
        let state = self.state.lock();
        state
            .counters
            .iter()
            .position(|(known, _)| known == name)
            .map(|index| ResolvedCounter {
                code: u32::try_from(index).unwrap(),
                component: state.counters[index].1,
            })
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    fn create_event_set(&self) -> Result<EventSetHandle, BackendError> {
        let mut state = self.state.lock();
        if state.fail_event_set_creation {
            return Err(BackendError::Failure("no more event sets".to_string()));
        }
        let thread = current_thread_key();
        if !state.threads.contains(&thread) {
            state.threads.push(thread);
        }
        state.sets.push(Some(FakeEventSet {
            codes: Vec::new(),
            running: false,
            multiplexed: false,
        }));
        Ok(EventSetHandle::new(state.sets.len() - 1))
    }

    fn destroy_event_set(&self, set: EventSetHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.set_mut(set)?;
        state.sets[set.raw()] = None;
        Ok(())
    }

    fn add_counter(&self, set: EventSetHandle, code: u32) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if code as usize >= state.counters.len() {
            return Err(BackendError::NotFound(format!("code {code}")));
        }
        let incompatible = state.incompatible.clone();
        let event_set = state.set_mut(set)?;
        let clash = event_set.codes.iter().any(|existing| {
            *existing == code
                || incompatible.contains(&(*existing, code))
                || incompatible.contains(&(code, *existing))
        });
        if clash {
            return Err(BackendError::Incompatible(format!("code {code}")));
        }
        event_set.codes.push(code);
        Ok(())
    }

    fn enable_multiplex(&self, set: EventSetHandle, _component: u32) -> Result<(), BackendError> {
        self.state.lock().set_mut(set)?.multiplexed = true;
        Ok(())
    }

    fn start(&self, set: EventSetHandle) -> Result<(), BackendError> {
        self.state.lock().set_mut(set)?.running = true;
        Ok(())
    }

    fn stop(&self, set: EventSetHandle, values: &mut [i64]) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let event_set = state.set_mut(set)?;
        if !event_set.running {
            return Err(BackendError::NotRunning);
        }
        event_set.running = false;
        values.iter_mut().for_each(|value| *value = 0);
        Ok(())
    }

    fn read(&self, set: EventSetHandle, values: &mut [i64]) -> Result<(), BackendError> {
        self.read_with_timestamp(set, values).map(|_| ())
    }

    fn read_with_timestamp(
        &self,
        set: EventSetHandle,
        values: &mut [i64],
    ) -> Result<i64, BackendError> {
        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(BackendError::Failure("read failed".to_string()));
        }
        let thread = current_thread_key();
        let event_set = state.set_mut(set)?;
        if !event_set.running {
            return Err(BackendError::NotRunning);
        }
        let codes = event_set.codes.clone();
        for (slot, code) in values.iter_mut().zip(codes) {
            *slot = state.values.get(&(thread, code)).copied().unwrap_or(0);
        }
        Ok(state.cycles.get(&thread).copied().unwrap_or(0))
    }

    fn clock_rate_mhz(&self) -> i64 {
        2400
    }

    fn list_live_threads(&self) -> Vec<ThreadKey> {
        self.state.lock().threads.clone()
    }

    fn has_running_event_sets(&self) -> bool {
        self.state
            .lock()
            .sets
            .iter()
            .flatten()
            .any(|event_set| event_set.running)
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdowns += 1;
        state.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_per_thread() {
        let backend = FakeBackend::new().with_counter("A", 0);
        backend.set_value("A", 10);
        let set = backend.create_event_set().unwrap();
        backend.add_counter(set, 0).unwrap();
        backend.start(set).unwrap();

        let mut values = [0i64; 1];
        backend.read(set, &mut values).unwrap();
        assert_eq!(values[0], 10);

        let clone = backend.clone();
        std::thread::spawn(move || {
            let mut values = [0i64; 1];
            clone.read(set, &mut values).unwrap();
            assert_eq!(values[0], 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_incompatible_pair() {
        let backend = FakeBackend::new()
            .with_counter("A", 0)
            .with_counter("B", 0)
            .with_incompatible("A", "B");
        let set = backend.create_event_set().unwrap();
        backend.add_counter(set, 1).unwrap();
        assert!(matches!(
            backend.add_counter(set, 0),
            Err(BackendError::Incompatible(_))
        ));
    }

    #[test]
    fn test_shared_state_between_clones() {
        let first = FakeBackend::new().with_counter("A", 0);
        let second = first.clone();
        second.fail_reads(true);
        let set = first.create_event_set().unwrap();
        first.start(set).unwrap();
        let mut values = [0i64; 0];
        assert!(first.read(set, &mut values).is_err());
    }
}
