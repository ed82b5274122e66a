//! Region registry: per thread, per region counter aggregation.
//!
//! The registry maps every instrumented thread to the regions it opened, in
//! the order they were first opened. Each region keeps one [`CounterSlot`]
//! per stored value: slot 0 counts completed invocations, slot 1 holds
//! elapsed cycles and the remaining slots follow the component counters in
//! registry order.
//!
//! The registry itself is not synchronized. The profiler owns it behind its
//! global lock and samples counters before taking that lock, so every
//! operation here is pure bookkeeping.
//!
//! ```text
//!  thread 7 ──► [ "init" ] [ "solve" ] [ "io" ]
//!  thread 9 ──► [ "solve" ]
//!                   │
//!                   ▼
//!        region_count │ cycles │ A │ B ...
//!        offset         offset   offset
//!        total          total    total
//!        reads: -       reads    reads
//! ```

use std::collections::HashMap;

use crate::backend::ThreadKey;
use crate::error::{HlError, Result};
use crate::events::CounterKind;
use crate::session::Sample;

const REGION_COUNT_SLOT: usize = 0;
const CYCLES_SLOT: usize = 1;

/// Kind of region operation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Begin,
    Read,
    End,
}

/// Outcome of a recorded operation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    /// The registry was updated.
    Applied,
    /// A read without matching region, or an end without an open one;
    /// nothing changed.
    Unmatched,
}

/// Aggregated state of one counter within one region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSlot {
    /// Value sampled at the most recent begin.
    pub offset: i64,
    /// Accumulated value of all completed begin/end cycles.
    pub total: i64,
    /// Values recorded by reads, oldest first.
    pub reads: Vec<i64>,
}

/// A named measurement span of one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    name: String,
    slots: Vec<CounterSlot>,
    open: bool,
}

impl Region {
    fn new(name: &str, width: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(width)
            .map_err(|_| HlError::OutOfMemory)?;
        slots.resize_with(width, CounterSlot::default);
        Ok(Self {
            name: name.to_string(),
            slots,
            open: false,
        })
    }

    /// Region name, unique within its thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All counter slots in storage order.
    pub fn slots(&self) -> &[CounterSlot] {
        &self.slots
    }

    /// Whether the region was begun and not ended since.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of completed begin/end cycles.
    pub fn invocations(&self) -> i64 {
        self.slots[REGION_COUNT_SLOT].total
    }

    fn begin(&mut self, sample: &Sample) {
        self.open = true;
        self.slots[REGION_COUNT_SLOT].offset = 1;
        self.slots[CYCLES_SLOT].offset = sample.cycles;
        for (slot, value) in self.slots[2..].iter_mut().zip(&sample.values) {
            slot.offset = *value;
        }
    }

    fn read(&mut self, sample: &Sample, kinds: &[CounterKind]) -> Result<()> {
        // reserve first so a failed allocation leaves the region untouched
        for slot in &mut self.slots[CYCLES_SLOT..] {
            slot.reads.try_reserve(1).map_err(|_| HlError::OutOfMemory)?;
        }

        let cycles = &mut self.slots[CYCLES_SLOT];
        cycles.reads.push(sample.cycles.wrapping_sub(cycles.offset));
        for ((slot, value), kind) in self.slots[2..]
            .iter_mut()
            .zip(&sample.values)
            .zip(&kinds[2..])
        {
            slot.reads.push(kind.contribution(*value, slot.offset));
        }
        Ok(())
    }

    fn end(&mut self, sample: &Sample, kinds: &[CounterKind]) {
        self.open = false;
        let count = &mut self.slots[REGION_COUNT_SLOT];
        count.total += count.offset;

        let cycles = &mut self.slots[CYCLES_SLOT];
        cycles.total = cycles
            .total
            .wrapping_add(sample.cycles.wrapping_sub(cycles.offset));

        for ((slot, value), kind) in self.slots[2..]
            .iter_mut()
            .zip(&sample.values)
            .zip(&kinds[2..])
        {
            slot.total = slot.total.wrapping_add(kind.contribution(*value, slot.offset));
        }
    }
}

/// Regions of one thread in first-begin order.
#[derive(Debug, Default)]
struct ThreadRegions {
    regions: Vec<Region>,
    index: HashMap<String, usize>,
}

impl ThreadRegions {
    fn find_mut(&mut self, name: &str) -> Option<&mut Region> {
        let index = *self.index.get(name)?;
        self.regions.get_mut(index)
    }

    fn find_or_insert(&mut self, name: &str, width: usize) -> Result<&mut Region> {
        let index = match self.index.get(name) {
            Some(index) => *index,
            None => {
                self.regions
                    .try_reserve(1)
                    .map_err(|_| HlError::OutOfMemory)?;
                self.index
                    .try_reserve(1)
                    .map_err(|_| HlError::OutOfMemory)?;
                self.regions.push(Region::new(name, width)?);
                let index = self.regions.len() - 1;
                self.index.insert(name.to_string(), index);
                index
            }
        };
        Ok(&mut self.regions[index])
    }
}

/// Thread to region list index with global begin/end bookkeeping.
#[derive(Debug)]
pub(crate) struct RegionRegistry {
    threads: HashMap<ThreadKey, ThreadRegions>,
    kinds: Vec<CounterKind>,
    begin_count: u64,
    end_count: u64,
}

impl RegionRegistry {
    /// Creates an empty registry for values of the given kinds, synthetic
    /// counters included.
    pub(crate) fn new(kinds: &[CounterKind]) -> Self {
        Self {
            threads: HashMap::new(),
            kinds: kinds.to_vec(),
            begin_count: 0,
            end_count: 0,
        }
    }

    /// Applies one region operation of `thread` with an already taken sample.
    ///
    /// A read without matching region and an end of a region that is not
    /// open are reported as [`Recorded::Unmatched`] and leave the registry
    /// untouched. A sample of the wrong width fails with
    /// [`HlError::InvalidArgument`].
    pub(crate) fn record(
        &mut self,
        thread: ThreadKey,
        name: &str,
        operation: Operation,
        sample: &Sample,
    ) -> Result<Recorded> {
        let width = self.kinds.len();
        if sample.values.len() + 2 != width {
            return Err(HlError::InvalidArgument(format!(
                "sample holds {} values, expected {}",
                sample.values.len(),
                width - 2
            )));
        }

        if operation == Operation::Begin {
            if !self.threads.contains_key(&thread) {
                self.threads
                    .try_reserve(1)
                    .map_err(|_| HlError::OutOfMemory)?;
            }
            let region = self
                .threads
                .entry(thread)
                .or_default()
                .find_or_insert(name, width)?;
            region.begin(sample);
            self.begin_count += 1;
            return Ok(Recorded::Applied);
        }

        let Some(region) = self
            .threads
            .get_mut(&thread)
            .and_then(|regions| regions.find_mut(name))
        else {
            return Ok(Recorded::Unmatched);
        };

        match operation {
            Operation::Read => region.read(sample, &self.kinds)?,
            _ if !region.is_open() => return Ok(Recorded::Unmatched),
            _ => {
                region.end(sample, &self.kinds);
                self.end_count += 1;
            }
        }
        Ok(Recorded::Applied)
    }

    /// Total begin calls recorded across all threads.
    pub(crate) fn begin_count(&self) -> u64 {
        self.begin_count
    }

    /// Total end calls recorded across all threads.
    pub(crate) fn end_count(&self) -> u64 {
        self.end_count
    }

    /// Regions of `thread` in first-begin order.
    pub(crate) fn regions(&self, thread: ThreadKey) -> Option<&[Region]> {
        self.threads.get(&thread).map(|t| t.regions.as_slice())
    }

    /// Number of threads that opened at least one region.
    pub(crate) fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELTA_ONLY: [CounterKind; 3] = [CounterKind::Delta; 3];
    const WITH_INSTANT: [CounterKind; 4] = [
        CounterKind::Delta,
        CounterKind::Delta,
        CounterKind::Delta,
        CounterKind::Instant,
    ];

    fn sample(cycles: i64, values: &[i64]) -> Sample {
        Sample {
            cycles,
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_repeated_cycles_accumulate() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        let mut value = 0;
        for _ in 0..5 {
            registry
                .record(1, "loop", Operation::Begin, &sample(value, &[value]))
                .unwrap();
            value += 7;
            registry
                .record(1, "loop", Operation::End, &sample(value, &[value]))
                .unwrap();
        }

        let region = &registry.regions(1).unwrap()[0];
        assert_eq!(region.invocations(), 5);
        assert_eq!(region.slots()[1].total, 35);
        assert_eq!(region.slots()[2].total, 35);
        assert_eq!(registry.begin_count(), 5);
        assert_eq!(registry.end_count(), 5);
    }

    #[test]
    fn test_instant_counter_sums_absolute_readings() {
        let mut registry = RegionRegistry::new(&WITH_INSTANT);
        for i in 0..4 {
            registry
                .record(1, "r", Operation::Begin, &sample(0, &[i, 42]))
                .unwrap();
            registry
                .record(1, "r", Operation::End, &sample(0, &[i + 1, 42]))
                .unwrap();
        }
        let region = &registry.regions(1).unwrap()[0];
        assert_eq!(region.slots()[2].total, 4);
        assert_eq!(region.slots()[3].total, 4 * 42);
    }

    #[test]
    fn test_reads_append_history() {
        let mut registry = RegionRegistry::new(&WITH_INSTANT);
        registry
            .record(1, "r", Operation::Begin, &sample(100, &[10, 5]))
            .unwrap();
        for i in 1..=3 {
            registry
                .record(1, "r", Operation::Read, &sample(100 + i, &[10 + 2 * i, 5 + i]))
                .unwrap();
        }
        registry
            .record(1, "r", Operation::End, &sample(110, &[20, 9]))
            .unwrap();

        let region = &registry.regions(1).unwrap()[0];
        assert!(region.slots()[0].reads.is_empty());
        assert_eq!(region.slots()[1].reads, vec![1, 2, 3]);
        assert_eq!(region.slots()[2].reads, vec![2, 4, 6]);
        assert_eq!(region.slots()[3].reads, vec![6, 7, 8]);
        assert_eq!(region.slots()[1].total, 10);
    }

    #[test]
    fn test_read_without_begin_is_noop() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        assert_eq!(
            registry
                .record(1, "r", Operation::Read, &sample(1, &[1]))
                .unwrap(),
            Recorded::Unmatched
        );
        assert_eq!(registry.thread_count(), 0);

        registry
            .record(1, "other", Operation::Begin, &sample(1, &[1]))
            .unwrap();
        assert_eq!(
            registry
                .record(1, "r", Operation::Read, &sample(1, &[1]))
                .unwrap(),
            Recorded::Unmatched
        );
        assert_eq!(registry.regions(1).unwrap().len(), 1);
    }

    #[test]
    fn test_end_without_begin_is_unmatched() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        assert_eq!(
            registry
                .record(1, "r", Operation::End, &sample(1, &[1]))
                .unwrap(),
            Recorded::Unmatched
        );
        assert_eq!(registry.thread_count(), 0);
        assert_eq!(registry.end_count(), 0);
    }

    #[test]
    fn test_second_end_is_unmatched() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        registry
            .record(1, "r", Operation::Begin, &sample(0, &[0]))
            .unwrap();
        registry
            .record(1, "r", Operation::End, &sample(10, &[5]))
            .unwrap();
        assert!(!registry.regions(1).unwrap()[0].is_open());

        assert_eq!(
            registry
                .record(1, "r", Operation::End, &sample(20, &[12]))
                .unwrap(),
            Recorded::Unmatched
        );
        let region = &registry.regions(1).unwrap()[0];
        assert_eq!(region.invocations(), 1);
        assert_eq!(region.slots()[1].total, 10);
        assert_eq!(region.slots()[2].total, 5);
        assert_eq!(registry.end_count(), 1);
    }

    #[test]
    fn test_double_begin_double_end_counts_one_cycle() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        registry
            .record(1, "r", Operation::Begin, &sample(0, &[0]))
            .unwrap();
        registry
            .record(1, "r", Operation::Begin, &sample(0, &[0]))
            .unwrap();
        registry
            .record(1, "r", Operation::End, &sample(0, &[12]))
            .unwrap();
        assert_eq!(
            registry
                .record(1, "r", Operation::End, &sample(0, &[12]))
                .unwrap(),
            Recorded::Unmatched
        );

        let region = &registry.regions(1).unwrap()[0];
        assert_eq!(region.invocations(), 1);
        assert_eq!(region.slots()[2].total, 12);
        assert_ne!(registry.begin_count(), registry.end_count());
    }

    #[test]
    fn test_repeated_begin_resets_offset() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        registry
            .record(1, "r", Operation::Begin, &sample(0, &[0]))
            .unwrap();
        registry
            .record(1, "r", Operation::Begin, &sample(50, &[50]))
            .unwrap();
        registry
            .record(1, "r", Operation::End, &sample(60, &[60]))
            .unwrap();
        let region = &registry.regions(1).unwrap()[0];
        assert_eq!(region.slots()[2].total, 10);
        assert_eq!(region.invocations(), 1);
        assert_eq!(registry.begin_count(), 2);
    }

    #[test]
    fn test_regions_keep_first_begin_order() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        for name in ["c", "a", "b", "a", "c"] {
            registry
                .record(3, name, Operation::Begin, &sample(0, &[0]))
                .unwrap();
            registry
                .record(3, name, Operation::End, &sample(0, &[0]))
                .unwrap();
        }
        let names: Vec<&str> = registry
            .regions(3)
            .unwrap()
            .iter()
            .map(Region::name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_threads_are_isolated() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        registry
            .record(1, "r", Operation::Begin, &sample(0, &[0]))
            .unwrap();
        registry
            .record(2, "r", Operation::Begin, &sample(0, &[100]))
            .unwrap();
        registry
            .record(1, "r", Operation::End, &sample(0, &[3]))
            .unwrap();
        assert_eq!(
            registry
                .record(4, "r", Operation::End, &sample(0, &[3]))
                .unwrap(),
            Recorded::Unmatched
        );
        registry
            .record(2, "r", Operation::End, &sample(0, &[105]))
            .unwrap();

        assert_eq!(registry.regions(1).unwrap()[0].slots()[2].total, 3);
        assert_eq!(registry.regions(2).unwrap()[0].slots()[2].total, 5);
    }

    #[test]
    fn test_sample_width_mismatch() {
        let mut registry = RegionRegistry::new(&DELTA_ONLY);
        assert!(matches!(
            registry.record(1, "r", Operation::Begin, &sample(0, &[0, 1])),
            Err(HlError::InvalidArgument(_))
        ));
        assert_eq!(registry.thread_count(), 0);
    }
}
