//! Report document: the accumulated region tree of all threads.
//!
//! A [`Report`] is built from the region registry once, when output is
//! generated (or on demand through `Profiler::snapshot`). It serializes with
//! serde to the nested layout tools downstream expect:
//!
//! ```text
//! {
//!   "cpu in mhz": "2400",
//!   "threads": [
//!     {
//!       "id": "1",
//!       "regions": [
//!         {
//!           "solve": {
//!             "region_count": "3",
//!             "cycles": { "total": "9000", "read_1": "1200" },
//!             "perf::TASK-CLOCK": "8100"
//!           }
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! All numbers are emitted as strings. Regions appear in the order they were
//! first opened, counters in storage order, reads oldest first.

pub(crate) mod output;

#[cfg(feature = "table")]
pub mod table;

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

use crate::backend::ThreadKey;
use crate::registry::RegionRegistry;

/// Final value and read history of one counter in one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReport {
    /// Counter name.
    pub name: String,
    /// Accumulated total.
    pub total: i64,
    /// Intermediate reads, oldest first.
    pub reads: Vec<i64>,
}

/// All counters of one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionReport {
    /// Region name.
    pub name: String,
    /// Counters in storage order, synthetic counters first.
    pub counters: Vec<CounterReport>,
}

impl RegionReport {
    /// Finds a counter by name.
    pub fn counter(&self, name: &str) -> Option<&CounterReport> {
        self.counters.iter().find(|c| c.name == name)
    }
}

/// Regions of one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReport {
    /// Thread identifier.
    pub id: ThreadKey,
    /// Regions in first-begin order.
    pub regions: Vec<RegionReport>,
}

/// The complete report of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Nominal clock rate of the counter subsystem.
    pub cpu_in_mhz: i64,
    /// Threads with recorded regions, in subsystem order.
    pub threads: Vec<ThreadReport>,
}

impl Report {
    /// Builds a report from the registry.
    ///
    /// Only threads listed in `threads` are emitted, and only if they opened
    /// at least one region.
    pub(crate) fn collect<'a>(
        registry: &RegionRegistry,
        counter_names: impl Iterator<Item = &'a str> + Clone,
        threads: &[ThreadKey],
        cpu_in_mhz: i64,
    ) -> Self {
        let threads = threads
            .iter()
            .filter_map(|id| {
                let regions = registry.regions(*id)?;
                Some(ThreadReport {
                    id: *id,
                    regions: regions
                        .iter()
                        .map(|region| RegionReport {
                            name: region.name().to_string(),
                            counters: counter_names
                                .clone()
                                .zip(region.slots())
                                .map(|(name, slot)| CounterReport {
                                    name: name.to_string(),
                                    total: slot.total,
                                    reads: slot.reads.clone(),
                                })
                                .collect(),
                        })
                        .collect(),
                })
            })
            .collect();

        Self {
            cpu_in_mhz,
            threads,
        }
    }

    /// Finds a thread by identifier.
    pub fn thread(&self, id: ThreadKey) -> Option<&ThreadReport> {
        self.threads.iter().find(|t| t.id == id)
    }

    /// Finds a region of a thread.
    pub fn region(&self, thread: ThreadKey, name: &str) -> Option<&RegionReport> {
        self.thread(thread)?.regions.iter().find(|r| r.name == name)
    }

    /// Whether no thread recorded any region.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Serializes the report to a JSON string.
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("cpu in mhz", &self.cpu_in_mhz.to_string())?;
        map.serialize_entry("threads", &self.threads)?;
        map.end()
    }
}

impl Serialize for ThreadReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("id", &self.id.to_string())?;
        map.serialize_entry("regions", &Regions(&self.regions))?;
        map.end()
    }
}

struct Regions<'a>(&'a [RegionReport]);

impl Serialize for Regions<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for region in self.0 {
            seq.serialize_element(&SingleEntry(&region.name, Counters(&region.counters)))?;
        }
        seq.end()
    }
}

struct SingleEntry<'a, V>(&'a str, V);

impl<V: Serialize> Serialize for SingleEntry<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.0, &self.1)?;
        map.end()
    }
}

struct Counters<'a>(&'a [CounterReport]);

impl Serialize for Counters<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for counter in self.0 {
            map.serialize_entry(&counter.name, counter)?;
        }
        map.end()
    }
}

impl Serialize for CounterReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.reads.is_empty() {
            return serializer.collect_str(&self.total);
        }
        let mut map = serializer.serialize_map(Some(self.reads.len() + 1))?;
        map.serialize_entry("total", &self.total.to_string())?;
        for (index, value) in self.reads.iter().enumerate() {
            map.serialize_entry(&format!("read_{}", index + 1), &value.to_string())?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CounterKind;
    use crate::registry::Operation;
    use crate::session::Sample;

    const NAMES: [&str; 3] = ["region_count", "cycles", "A"];

    fn sample(cycles: i64, value: i64) -> Sample {
        Sample {
            cycles,
            values: vec![value],
        }
    }

    fn registry() -> RegionRegistry {
        let mut registry = RegionRegistry::new(&[CounterKind::Delta; 3]);
        registry.record(1, "outer", Operation::Begin, &sample(0, 0)).unwrap();
        registry.record(1, "inner", Operation::Begin, &sample(10, 1)).unwrap();
        registry.record(1, "inner", Operation::End, &sample(20, 3)).unwrap();
        registry.record(1, "outer", Operation::Read, &sample(25, 4)).unwrap();
        registry.record(1, "outer", Operation::End, &sample(30, 5)).unwrap();
        registry.record(2, "other", Operation::Begin, &sample(0, 0)).unwrap();
        registry.record(2, "other", Operation::End, &sample(1, 1)).unwrap();
        registry
    }

    #[test]
    fn test_collect_filters_threads() {
        let report = Report::collect(&registry(), NAMES.into_iter(), &[2, 5], 2400);
        assert_eq!(report.threads.len(), 1);
        assert_eq!(report.threads[0].id, 2);
        assert!(report.thread(1).is_none());
    }

    #[test]
    fn test_collect_region_contents() {
        let report = Report::collect(&registry(), NAMES.into_iter(), &[1, 2], 2400);
        let names: Vec<&str> = report.threads[0]
            .regions
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["outer", "inner"]);

        let outer = report.region(1, "outer").unwrap();
        assert_eq!(outer.counter("region_count").unwrap().total, 1);
        assert_eq!(outer.counter("cycles").unwrap().total, 30);
        assert_eq!(outer.counter("cycles").unwrap().reads, vec![25]);
        assert_eq!(outer.counter("A").unwrap().reads, vec![4]);
        assert_eq!(report.region(1, "inner").unwrap().counter("A").unwrap().total, 2);
    }

    #[test]
    fn test_json_layout() {
        let report = Report::collect(&registry(), NAMES.into_iter(), &[1, 2], 2400);
        let json = report.to_json(false).unwrap();
        assert!(json.starts_with(r#"{"cpu in mhz":"2400","threads":[{"id":"1","regions":[{"outer":{"region_count":"1","cycles":{"total":"30","read_1":"25"},"A":{"total":"5","read_1":"4"}}}"#));
        assert!(json.contains(r#"{"inner":{"region_count":"1","cycles":"10","A":"2"}}"#));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["threads"][1]["id"], "2");
        assert_eq!(value["threads"][1]["regions"][0]["other"]["A"], "1");
    }

    #[test]
    fn test_empty_report() {
        let registry = RegionRegistry::new(&[CounterKind::Delta; 2]);
        let report = Report::collect(&registry, ["region_count", "cycles"].into_iter(), &[1], 100);
        assert!(report.is_empty());
        assert_eq!(
            report.to_json(false).unwrap(),
            r#"{"cpu in mhz":"100","threads":[]}"#
        );
    }
}
