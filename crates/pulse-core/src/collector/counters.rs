//! Interval deltas over monotonically increasing kernel counters.
//!
//! A [`SnapshotSource`] reads absolute counter values keyed by resource
//! (the singleton `cpu`, or a block device name). [`DeltaEngine`] keeps the
//! previous snapshot and turns each new read into a [`CounterDelta`].
//!
//! Deltas are computed only for resources present in both snapshots: a
//! device that just appeared has no baseline yet and a device that vanished
//! has nothing to compare against.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::collector::CollectError;
use crate::collector::procfs::parser::{DISK_FIELDS, parse_cpu_ticks, parse_diskstats};
use crate::collector::traits::FileSystem;
use crate::exposition::{Metric, MetricFamily, MetricType, Value};

/// Resource key used for the aggregate CPU counters.
pub const CPU_KEY: &str = "cpu";

/// Named counters for one resource.
pub type CounterSet = BTreeMap<&'static str, u64>;

/// Absolute counter values captured at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    resources: BTreeMap<String, CounterSet>,
}

impl CounterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, counters: CounterSet) {
        self.resources.insert(key.into(), counters);
    }

    pub fn get(&self, key: &str) -> Option<&CounterSet> {
        self.resources.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<K: Into<String>, const N: usize> From<[(K, CounterSet); N]> for CounterSnapshot {
    fn from(entries: [(K, CounterSet); N]) -> Self {
        let mut snapshot = Self::new();
        for (key, counters) in entries {
            snapshot.insert(key, counters);
        }
        snapshot
    }
}

/// Per-resource `current - previous` for one interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterDelta {
    resources: BTreeMap<String, BTreeMap<&'static str, i64>>,
}

impl CounterDelta {
    pub fn get(&self, key: &str) -> Option<&BTreeMap<&'static str, i64>> {
        self.resources.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<&'static str, i64>)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// `(resource, field, delta)` for every negative delta.
    pub fn negative_fields(&self) -> impl Iterator<Item = (&str, &'static str, i64)> {
        self.iter().flat_map(|(key, fields)| {
            fields
                .iter()
                .filter(|(_, v)| **v < 0)
                .map(move |(field, v)| (key, *field, *v))
        })
    }
}

/// What to do when a counter went backwards between two reads.
///
/// Raw subtraction cannot tell a 32-bit wrap from a reset (reboot, driver
/// reload, device re-attach), so the policy is explicit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterResetPolicy {
    /// Emit the negative delta unchanged.
    #[default]
    PassThrough,
    /// Replace a negative delta with zero.
    ClampToZero,
    /// Drop the whole resource from this interval; the new reading becomes the baseline.
    SkipResource,
}

/// Field-wise `current - previous` over resources present in both snapshots.
///
/// Fields missing from either side are omitted. Differences are exact for
/// any advance or regression below 2^63.
pub fn compute_delta(
    previous: &CounterSnapshot,
    current: &CounterSnapshot,
    policy: CounterResetPolicy,
) -> CounterDelta {
    let mut resources = BTreeMap::new();

    for (key, cur) in &current.resources {
        let Some(prev) = previous.resources.get(key) else {
            continue;
        };

        let mut fields = BTreeMap::new();
        let mut regressed = false;
        for (field, cur_value) in cur {
            let Some(prev_value) = prev.get(field) else {
                continue;
            };
            let mut delta = cur_value.wrapping_sub(*prev_value) as i64;
            if delta < 0 {
                regressed = true;
                if policy == CounterResetPolicy::ClampToZero {
                    delta = 0;
                }
            }
            fields.insert(*field, delta);
        }

        if regressed && policy == CounterResetPolicy::SkipResource {
            continue;
        }
        resources.insert(key.clone(), fields);
    }

    CounterDelta { resources }
}

/// A source of absolute counter snapshots.
pub trait SnapshotSource {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    fn read_snapshot(&self) -> Result<CounterSnapshot, CollectError>;
}

/// Aggregate CPU ticks from `<proc>/stat`, under the single key [`CPU_KEY`].
pub struct CpuCounters<F: FileSystem> {
    fs: F,
    proc_path: String,
}

impl<F: FileSystem> CpuCounters<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }
}

impl<F: FileSystem> SnapshotSource for CpuCounters<F> {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn read_snapshot(&self) -> Result<CounterSnapshot, CollectError> {
        let path = format!("{}/stat", self.proc_path);
        let content = self.fs.read_to_string(Path::new(&path))?;
        let ticks = parse_cpu_ticks(&content)?;

        let mut snapshot = CounterSnapshot::new();
        snapshot.insert(CPU_KEY, ticks.fields.into_iter().collect());
        Ok(snapshot)
    }
}

/// Per-device I/O counters from `<proc>/diskstats`.
///
/// Devices whose name matches `exclude` are never read. The pattern is
/// applied on every read.
pub struct DiskCounters<F: FileSystem> {
    fs: F,
    proc_path: String,
    exclude: Option<Regex>,
}

impl<F: FileSystem> DiskCounters<F> {
    pub fn new(fs: F, proc_path: impl Into<String>, exclude: Option<Regex>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            exclude,
        }
    }
}

impl<F: FileSystem> SnapshotSource for DiskCounters<F> {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn read_snapshot(&self) -> Result<CounterSnapshot, CollectError> {
        let path = format!("{}/diskstats", self.proc_path);
        let content = self.fs.read_to_string(Path::new(&path))?;
        let disks = parse_diskstats(&content)?;

        let mut snapshot = CounterSnapshot::new();
        for disk in disks {
            if self
                .exclude
                .as_ref()
                .is_some_and(|re| re.is_match(&disk.device))
            {
                continue;
            }
            snapshot.insert(disk.device, DISK_FIELDS.into_iter().zip(disk.counters).collect());
        }
        Ok(snapshot)
    }
}

/// Owns the previous snapshot of one source and yields interval deltas.
pub struct DeltaEngine<S: SnapshotSource> {
    source: S,
    previous: Option<CounterSnapshot>,
    policy: CounterResetPolicy,
}

impl<S: SnapshotSource> DeltaEngine<S> {
    pub fn new(source: S, policy: CounterResetPolicy) -> Self {
        Self {
            source,
            previous: None,
            policy,
        }
    }

    /// Reads a fresh snapshot and returns the delta against the previous one.
    ///
    /// The first successful read only establishes the baseline and returns
    /// `Ok(None)`. A failed read leaves the baseline untouched.
    pub fn advance(&mut self) -> Result<Option<CounterDelta>, CollectError> {
        let current = self.source.read_snapshot()?;

        let Some(previous) = self.previous.replace(current) else {
            return Ok(None);
        };
        // `replace` just stored the current snapshot.
        let Some(current) = self.previous.as_ref() else {
            return Ok(None);
        };

        let delta = compute_delta(&previous, current, self.policy);
        for (resource, field, value) in delta.negative_fields() {
            warn!(
                source = self.source.name(),
                resource,
                field,
                delta = value,
                "counter went backwards"
            );
        }
        if self.policy != CounterResetPolicy::PassThrough {
            for key in current.keys().filter(|k| previous.get(k).is_some()) {
                if delta.get(key).is_none() {
                    warn!(
                        source = self.source.name(),
                        resource = key,
                        "counter reset, resource skipped this interval"
                    );
                }
            }
        }
        Ok(Some(delta))
    }

    pub fn previous(&self) -> Option<&CounterSnapshot> {
        self.previous.as_ref()
    }
}

/// `node_cpu_ticks_delta{mode}` and `node_cpu_usage_percent{mode}`.
///
/// Usage is the mode's share of all ticks in the interval. It is omitted
/// when the interval saw no positive tick total.
pub fn cpu_families(delta: &CounterDelta) -> Vec<MetricFamily> {
    let Some(cpu) = delta.get(CPU_KEY) else {
        return Vec::new();
    };

    let mut ticks = MetricFamily::new("node_cpu_ticks_delta", MetricType::Gauge);
    let mut usage = MetricFamily::new("node_cpu_usage_percent", MetricType::Gauge);
    let total: i64 = cpu.values().sum();

    for (mode, value) in cpu {
        ticks.push(Metric::new(Value::Gauge(*value as f64)).with_label("mode", *mode));
        if total > 0 {
            usage.push(
                Metric::new(Value::Gauge(*value as f64 / total as f64 * 100.0))
                    .with_label("mode", *mode),
            );
        }
    }

    let mut families = vec![ticks];
    if !usage.metrics.is_empty() {
        families.push(usage);
    }
    families
}

/// One `node_disk_<field>_delta{device}` family per diskstats counter.
pub fn disk_families(delta: &CounterDelta) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = DISK_FIELDS
        .iter()
        .map(|field| MetricFamily::new(format!("node_disk_{field}_delta"), MetricType::Gauge))
        .collect();

    for (device, fields) in delta.iter() {
        for (family, field) in families.iter_mut().zip(DISK_FIELDS) {
            if let Some(value) = fields.get(field) {
                family.push(Metric::new(Value::Gauge(*value as f64)).with_label("device", device));
            }
        }
    }

    families.retain(|f| !f.metrics.is_empty());
    families
}
