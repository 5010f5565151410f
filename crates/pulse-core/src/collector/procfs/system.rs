//! Point-in-time readers for host gauges.
//!
//! Unlike the counter sources these keep no history: load, memory, NIC totals
//! and filesystem capacity are read and turned into metric families directly.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};

use crate::collector::CollectError;
use crate::collector::procfs::parser::{
    MountEntry, parse_loadavg, parse_meminfo, parse_mounts, parse_net_dev,
};
use crate::collector::traits::FileSystem;
use crate::exposition::{Metric, MetricFamily, MetricType, Value};

/// Reads host-wide gauges from a proc tree.
pub struct SystemReader<F: FileSystem> {
    fs: F,
    proc_path: String,
}

impl<F: FileSystem> SystemReader<F> {
    /// Creates a new reader rooted at `proc_path` (usually "/proc").
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }

    fn read(&self, name: &str) -> Result<String, CollectError> {
        let path = format!("{}/{}", self.proc_path, name);
        Ok(self.fs.read_to_string(Path::new(&path))?)
    }

    /// `node_load1`, `node_load5` and `node_load15` from `loadavg`.
    pub fn read_load(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let load = parse_loadavg(&self.read("loadavg")?)?;
        Ok(vec![
            MetricFamily::gauge("node_load1", load.load1),
            MetricFamily::gauge("node_load5", load.load5),
            MetricFamily::gauge("node_load15", load.load15),
        ])
    }

    /// `node_memory_*_bytes` plus `node_memory_used_percent` from `meminfo`.
    pub fn read_memory(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mem = parse_meminfo(&self.read("meminfo")?)?;

        let mut families: Vec<MetricFamily> = [
            ("total", mem.mem_total),
            ("free", mem.mem_free),
            ("available", mem.mem_available),
            ("buffers", mem.buffers),
            ("cached", mem.cached),
            ("swap_total", mem.swap_total),
            ("swap_free", mem.swap_free),
            ("dirty", mem.dirty),
            ("slab", mem.slab),
        ]
        .into_iter()
        .map(|(field, kib)| {
            MetricFamily::gauge(
                format!("node_memory_{field}_bytes"),
                kib.saturating_mul(1024) as f64,
            )
        })
        .collect();

        if mem.mem_total > 0 {
            let used = mem.mem_total.saturating_sub(mem.mem_available);
            families.push(MetricFamily::gauge(
                "node_memory_used_percent",
                used as f64 / mem.mem_total as f64 * 100.0,
            ));
        }
        Ok(families)
    }

    /// Absolute per-interface totals from `net/dev`.
    ///
    /// Interfaces matching `exclude` are skipped. A malformed line ends the
    /// read; interfaces before it are still reported.
    pub fn read_nics(&self, exclude: Option<&Regex>) -> Result<Vec<MetricFamily>, CollectError> {
        let devices = parse_net_dev(&self.read("net/dev")?);

        let mut families: Vec<MetricFamily> = NIC_FIELDS
            .iter()
            .map(|name| MetricFamily::new(format!("node_network_{name}_total"), MetricType::Counter))
            .collect();

        for dev in devices {
            if exclude.is_some_and(|re| re.is_match(&dev.interface)) {
                continue;
            }
            let values = [
                dev.rx_bytes,
                dev.rx_packets,
                dev.rx_errs,
                dev.rx_drop,
                dev.tx_bytes,
                dev.tx_packets,
                dev.tx_errs,
                dev.tx_drop,
            ];
            for (family, value) in families.iter_mut().zip(values) {
                family.push(
                    Metric::new(Value::Counter(value as f64)).with_label("device", &dev.interface),
                );
            }
        }

        families.retain(|f| !f.metrics.is_empty());
        Ok(families)
    }

    /// Capacity of every locally backed mount.
    ///
    /// Only mounts whose source is an absolute path are considered, each mount
    /// point once. A mount reporting zero total size is left out. A mount
    /// whose `statvfs` fails is skipped with a warning.
    pub fn read_filesystems(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let mounts = parse_mounts(&self.read("mounts")?);

        let mut size = MetricFamily::new("node_filesystem_size_bytes", MetricType::Gauge);
        let mut free = MetricFamily::new("node_filesystem_free_bytes", MetricType::Gauge);
        let mut avail = MetricFamily::new("node_filesystem_avail_bytes", MetricType::Gauge);
        let mut used = MetricFamily::new("node_filesystem_used_percent", MetricType::Gauge);

        let mut seen = HashSet::new();
        for mount in mounts {
            if !mount.device.starts_with('/') || !seen.insert(mount.mount_point.clone()) {
                continue;
            }

            let usage = match self.fs.statvfs(Path::new(&mount.mount_point)) {
                Ok(usage) => usage,
                Err(e) => {
                    warn!(mountpoint = %mount.mount_point, error = %e, "statvfs failed");
                    continue;
                }
            };
            if usage.total == 0 {
                debug!(mountpoint = %mount.mount_point, "skipping zero-sized filesystem");
                continue;
            }

            let used_percent =
                usage.total.saturating_sub(usage.free) as f64 / usage.total as f64 * 100.0;
            size.push(mount_metric(&mount, usage.total as f64));
            free.push(mount_metric(&mount, usage.free as f64));
            avail.push(mount_metric(&mount, usage.avail as f64));
            used.push(mount_metric(&mount, used_percent));
        }

        let mut families = vec![size, free, avail, used];
        families.retain(|f| !f.metrics.is_empty());
        Ok(families)
    }
}

const NIC_FIELDS: [&str; 8] = [
    "receive_bytes",
    "receive_packets",
    "receive_errs",
    "receive_drop",
    "transmit_bytes",
    "transmit_packets",
    "transmit_errs",
    "transmit_drop",
];

fn mount_metric(mount: &MountEntry, value: f64) -> Metric {
    Metric::new(Value::Gauge(value))
        .with_label("device", &mount.device)
        .with_label("mountpoint", &mount.mount_point)
        .with_label("fstype", &mount.fs_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn find<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("{name} missing"))
    }

    #[test]
    fn test_read_load() {
        let reader = SystemReader::new(MockFs::typical_system(), "/proc");
        let families = reader.read_load().unwrap();
        assert_eq!(families.len(), 3);
        assert_eq!(find(&families, "node_load1").metrics[0].value, Value::Gauge(0.15));
        assert_eq!(find(&families, "node_load15").metrics[0].value, Value::Gauge(0.05));
    }

    #[test]
    fn test_read_memory() {
        let reader = SystemReader::new(MockFs::typical_system(), "/proc");
        let families = reader.read_memory().unwrap();

        assert_eq!(
            find(&families, "node_memory_total_bytes").metrics[0].value,
            Value::Gauge(16_384_000.0 * 1024.0)
        );
        let Value::Gauge(used) = find(&families, "node_memory_used_percent").metrics[0].value
        else {
            panic!("used percent is not a gauge");
        };
        assert!((used - 26.757_812_5).abs() < 1e-6, "{used}");
    }

    #[test]
    fn test_read_memory_malformed_fails_whole_read() {
        let fs = MockFs::typical_system();
        fs.add_file("/proc/meminfo", "MemTotal: 100 kB\nbroken line with many fields here\n");
        let reader = SystemReader::new(fs, "/proc");
        assert!(matches!(reader.read_memory(), Err(CollectError::Format(_))));
    }

    #[test]
    fn test_read_nics_with_exclusion() {
        let reader = SystemReader::new(MockFs::typical_system(), "/proc");
        let lo = Regex::new("^lo$").unwrap();
        let families = reader.read_nics(Some(&lo)).unwrap();

        assert_eq!(families.len(), 8);
        let rx = find(&families, "node_network_receive_bytes_total");
        assert_eq!(rx.metrics.len(), 1);
        assert_eq!(rx.metrics[0].label("device"), Some("eth0"));
        assert_eq!(rx.metrics[0].value, Value::Counter(987_654_321.0));
        let tx_drop = find(&families, "node_network_transmit_drop_total");
        assert_eq!(tx_drop.metrics[0].value, Value::Counter(5.0));

        let all = reader.read_nics(None).unwrap();
        assert_eq!(find(&all, "node_network_receive_bytes_total").metrics.len(), 2);
    }

    #[test]
    fn test_read_nics_stops_at_malformed_line() {
        let fs = MockFs::new();
        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive |  Transmit
 face |bytes packets|bytes packets
  eth0: 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16
  eth1 garbage
  eth2: 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16
",
        );
        let reader = SystemReader::new(fs, "/proc");
        let families = reader.read_nics(None).unwrap();
        let rx = find(&families, "node_network_receive_bytes_total");
        assert_eq!(rx.metrics.len(), 1);
        assert_eq!(rx.metrics[0].label("device"), Some("eth0"));
    }

    #[test]
    fn test_read_filesystems() {
        let reader = SystemReader::new(MockFs::typical_system(), "/proc");
        let families = reader.read_filesystems().unwrap();

        let size = find(&families, "node_filesystem_size_bytes");
        // "/" is listed twice, proc and tmpfs are not device-backed.
        assert_eq!(size.metrics.len(), 2);
        assert_eq!(size.metrics[0].label("mountpoint"), Some("/"));
        assert_eq!(size.metrics[0].label("fstype"), Some("ext4"));
        assert_eq!(size.metrics[1].label("device"), Some("/dev/nvme0n1"));

        let used = find(&families, "node_filesystem_used_percent");
        assert_eq!(used.metrics[0].value, Value::Gauge(60.0));
        assert_eq!(used.metrics[1].value, Value::Gauge(50.0));
    }

    #[test]
    fn test_zero_sized_filesystem_is_excluded() {
        let fs = MockFs::new();
        fs.add_file(
            "/proc/mounts",
            "/dev/sda1 / ext4 rw 0 0\n/dev/sdz /empty ext4 rw 0 0\n",
        );
        fs.add_mount("/", 1000, 250, 200);
        fs.add_mount("/empty", 0, 0, 0);

        let reader = SystemReader::new(fs, "/proc");
        let families = reader.read_filesystems().unwrap();
        for family in &families {
            assert_eq!(family.metrics.len(), 1, "{}", family.name);
            assert_eq!(family.metrics[0].label("mountpoint"), Some("/"));
        }
        let used = find(&families, "node_filesystem_used_percent");
        assert_eq!(used.metrics[0].value, Value::Gauge(75.0));
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let reader = SystemReader::new(MockFs::new(), "/proc");
        assert!(matches!(reader.read_load(), Err(CollectError::Io(_))));
        assert!(matches!(reader.read_filesystems(), Err(CollectError::Io(_))));
    }
}
