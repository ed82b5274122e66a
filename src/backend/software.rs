//! Clock based counter backend.
//!
//! Provides a handful of software counters that exist on every platform, so
//! instrumented programs produce meaningful reports without hardware counter
//! support:
//!
//! | Name | Component | Meaning |
//! |------|-----------|---------|
//! | `sys::THREAD_CPU_NS` (alias `perf::TASK-CLOCK`) | 0 (`cpu`) | CPU time of the calling thread |
//! | `sys::PROCESS_CPU_NS` | 0 (`cpu`) | CPU time of the whole process |
//! | `sys::WALL_NS` | 1 (`clock`) | Wall clock time |
//!
//! Cycles are reported as nanoseconds of wall clock time, so the nominal
//! clock rate is 1000 MHz. A counter may appear only once per event set.

use std::time::Instant;

use cpu_time::{ProcessTime, ThreadTime};
use parking_lot::Mutex;

use crate::backend::{current_thread_key, CounterBackend, EventSetHandle, ResolvedCounter, ThreadKey};
use crate::error::BackendError;

const THREAD_CPU_NS: u32 = 0;
const PROCESS_CPU_NS: u32 = 1;
const WALL_NS: u32 = 2;

const COMPONENT_CPU: u32 = 0;
const COMPONENT_CLOCK: u32 = 1;

/// Name table: (name, code, component).
const COUNTERS: [(&str, u32, u32); 4] = [
    ("sys::THREAD_CPU_NS", THREAD_CPU_NS, COMPONENT_CPU),
    ("perf::TASK-CLOCK", THREAD_CPU_NS, COMPONENT_CPU),
    ("sys::PROCESS_CPU_NS", PROCESS_CPU_NS, COMPONENT_CPU),
    ("sys::WALL_NS", WALL_NS, COMPONENT_CLOCK),
];

#[derive(Debug)]
struct SoftEventSet {
    codes: Vec<u32>,
    base: Vec<i64>,
    running: bool,
    multiplexed: bool,
}

#[derive(Debug, Default)]
struct SoftState {
    sets: Vec<Option<SoftEventSet>>,
    threads: Vec<ThreadKey>,
}

/// Counter backend built on thread, process and wall clocks.
///
/// # Examples
///
/// ```rust
/// use regioni::backend::{CounterBackend, SoftwareBackend};
///
/// let backend = SoftwareBackend::new();
/// let resolved = backend.resolve_name("sys::WALL_NS").unwrap();
/// let set = backend.create_event_set().unwrap();
/// backend.add_counter(set, resolved.code).unwrap();
/// backend.start(set).unwrap();
///
/// let mut values = [0i64; 1];
/// backend.read(set, &mut values).unwrap();
/// assert!(values[0] >= 0);
///
/// backend.stop(set, &mut values).unwrap();
/// backend.destroy_event_set(set).unwrap();
/// ```
#[derive(Debug)]
pub struct SoftwareBackend {
    epoch: Instant,
    state: Mutex<SoftState>,
}

impl SoftwareBackend {
    /// Creates a backend whose wall clock starts now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(SoftState::default()),
        }
    }

    /// Whether an event set was switched to multiplexed counting.
    pub fn is_multiplexed(&self, set: EventSetHandle) -> bool {
        let state = self.state.lock();
        lookup(&state.sets, set).is_ok_and(|event_set| event_set.multiplexed)
    }

    fn wall_ns(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn raw_value(&self, code: u32) -> Result<i64, BackendError> {
        let duration = match code {
            THREAD_CPU_NS => ThreadTime::try_now()
                .map_err(|e| BackendError::Failure(format!("thread cpu clock: {e}")))?
                .as_duration(),
            PROCESS_CPU_NS => ProcessTime::try_now()
                .map_err(|e| BackendError::Failure(format!("process cpu clock: {e}")))?
                .as_duration(),
            WALL_NS => return Ok(self.wall_ns()),
            other => return Err(BackendError::NotFound(format!("counter code {other}"))),
        };
        Ok(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }

    fn raw_values(&self, codes: &[u32]) -> Result<Vec<i64>, BackendError> {
        codes.iter().map(|code| self.raw_value(*code)).collect()
    }

    /// Copies the codes and start values of a set without holding the lock
    /// while clocks are read.
    fn counting_state(&self, set: EventSetHandle) -> Result<(Vec<u32>, Vec<i64>), BackendError> {
        let state = self.state.lock();
        let event_set = lookup(&state.sets, set)?;
        if !event_set.running {
            return Err(BackendError::NotRunning);
        }
        Ok((event_set.codes.clone(), event_set.base.clone()))
    }

    fn fill(&self, set: EventSetHandle, values: &mut [i64]) -> Result<(), BackendError> {
        let (codes, base) = self.counting_state(set)?;
        if values.len() < codes.len() {
            return Err(BackendError::Failure(format!(
                "value buffer holds {} entries, event set has {}",
                values.len(),
                codes.len()
            )));
        }
        for (slot, (raw, start)) in values
            .iter_mut()
            .zip(self.raw_values(&codes)?.into_iter().zip(base))
        {
            *slot = raw.wrapping_sub(start);
        }
        Ok(())
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(sets: &[Option<SoftEventSet>], set: EventSetHandle) -> Result<&SoftEventSet, BackendError> {
    sets.get(set.raw())
        .and_then(Option::as_ref)
        .ok_or_else(|| BackendError::Failure(format!("invalid event set {}", set.raw())))
}

fn lookup_mut(
    sets: &mut [Option<SoftEventSet>],
    set: EventSetHandle,
) -> Result<&mut SoftEventSet, BackendError> {
    sets.get_mut(set.raw())
        .and_then(Option::as_mut)
        .ok_or_else(|| BackendError::Failure(format!("invalid event set {}", set.raw())))
}

impl CounterBackend for SoftwareBackend {
    fn resolve_name(&self, name: &str) -> Result<ResolvedCounter, BackendError> {
        COUNTERS
            .iter()
            .find(|(known, _, _)| *known == name)
            .map(|(_, code, component)| ResolvedCounter {
                code: *code,
                component: *component,
            })
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    fn component_name(&self, component: u32) -> String {
        match component {
            COMPONENT_CPU => "cpu".to_string(),
            COMPONENT_CLOCK => "clock".to_string(),
            other => format!("component {other}"),
        }
    }

    fn create_event_set(&self) -> Result<EventSetHandle, BackendError> {
        let thread = current_thread_key();
        let mut state = self.state.lock();
        if !state.threads.contains(&thread) {
            state.threads.push(thread);
        }

        let event_set = SoftEventSet {
            codes: Vec::new(),
            base: Vec::new(),
            running: false,
            multiplexed: false,
        };
        let index = match state.sets.iter().position(Option::is_none) {
            Some(free) => {
                state.sets[free] = Some(event_set);
                free
            }
            None => {
                state.sets.push(Some(event_set));
                state.sets.len() - 1
            }
        };
        Ok(EventSetHandle::new(index))
    }

    fn destroy_event_set(&self, set: EventSetHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        lookup(&state.sets, set)?;
        state.sets[set.raw()] = None;
        Ok(())
    }

    fn add_counter(&self, set: EventSetHandle, code: u32) -> Result<(), BackendError> {
        if !COUNTERS.iter().any(|(_, known, _)| *known == code) {
            return Err(BackendError::NotFound(format!("counter code {code}")));
        }
        let mut state = self.state.lock();
        let event_set = lookup_mut(&mut state.sets, set)?;
        if event_set.running {
            return Err(BackendError::Failure("event set is running".to_string()));
        }
        if event_set.codes.contains(&code) {
            return Err(BackendError::Incompatible(format!(
                "counter code {code} is already part of the event set"
            )));
        }
        event_set.codes.push(code);
        Ok(())
    }

    fn enable_multiplex(&self, set: EventSetHandle, component: u32) -> Result<(), BackendError> {
        if component != COMPONENT_CPU {
            return Err(BackendError::Failure(format!(
                "component {component} cannot be multiplexed"
            )));
        }
        let mut state = self.state.lock();
        lookup_mut(&mut state.sets, set)?.multiplexed = true;
        Ok(())
    }

    fn start(&self, set: EventSetHandle) -> Result<(), BackendError> {
        let codes = {
            let state = self.state.lock();
            lookup(&state.sets, set)?.codes.clone()
        };
        let base = self.raw_values(&codes)?;

        let mut state = self.state.lock();
        let event_set = lookup_mut(&mut state.sets, set)?;
        if event_set.running {
            return Err(BackendError::Failure("event set is already running".to_string()));
        }
        event_set.base = base;
        event_set.running = true;
        Ok(())
    }

    fn stop(&self, set: EventSetHandle, values: &mut [i64]) -> Result<(), BackendError> {
        self.fill(set, values)?;
        let mut state = self.state.lock();
        lookup_mut(&mut state.sets, set)?.running = false;
        Ok(())
    }

    fn read(&self, set: EventSetHandle, values: &mut [i64]) -> Result<(), BackendError> {
        self.fill(set, values)
    }

    fn read_with_timestamp(
        &self,
        set: EventSetHandle,
        values: &mut [i64],
    ) -> Result<i64, BackendError> {
        self.fill(set, values)?;
        Ok(self.wall_ns())
    }

    fn clock_rate_mhz(&self) -> i64 {
        1000
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
        state.sets.clear();
        state.threads.clear();
    }
}
