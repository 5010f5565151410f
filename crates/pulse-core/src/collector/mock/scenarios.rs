//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` states for the readers and
//! counter sources.

use super::filesystem::MockFs;

impl MockFs {
    /// Creates a typical host: four CPUs, two disks plus a partition and a
    /// loop device, two NICs, and a mix of real and pseudo mounts.
    pub fn typical_system() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/sys/kernel/hostname", "node-01\n");
        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
Dirty:              1024 kB
Writeback:             0 kB
Slab:             512000 kB
SReclaimable:     256000 kB
",
        );
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/diskstats",
            "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
   7       0 loop0 10 0 20 0 0 0 0 0 0 0 0 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
",
        );
        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 12345678     9876    0    0    0     0          0         0 12345678     9876    0    0    0     0       0          0
  eth0: 987654321   654321    5   10    0     0          0       100 123456789   456789    2    5    0     0       0          0
",
        );
        fs.add_file(
            "/proc/mounts",
            "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /run tmpfs rw,nosuid,nodev 0 0
/dev/nvme0n1 /data xfs rw,noatime 0 0
/dev/sda1 / ext4 rw,relatime 0 0
",
        );
        fs.add_mount("/", 100_000_000_000, 40_000_000_000, 35_000_000_000);
        fs.add_mount("/data", 500_000_000_000, 250_000_000_000, 250_000_000_000);

        fs
    }

    /// Replaces `/proc/stat` and `/proc/diskstats` with the next interval's
    /// readings for `typical_system()`: CPU ticks advance and `sdb` appears.
    pub fn advance_typical_counters(&self) {
        self.add_file(
            "/proc/stat",
            "\
cpu  10600 500 3200 80900 1100 200 100 0 0 0
cpu0 2650 125 800 20225 275 50 25 0 0 0
cpu1 2650 125 800 20225 275 50 25 0 0 0
cpu2 2650 125 800 20225 275 50 25 0 0 0
cpu3 2650 125 800 20225 275 50 25 0 0 0
ctxt 510000
btime 1700000000
",
        );
        self.add_file(
            "/proc/diskstats",
            "\
   8       0 sda 12395 100 988054 5020 6800 50 456889 3010 0 4030 8030 0 0 0 0
   8       1 sda1 10040 80 800320 4015 5008 40 400070 2507 0 3520 6520 0 0 0 0
   8      16 sdb 5 0 40 1 0 0 0 0 0 1 1 0 0 0 0
   7       0 loop0 10 0 20 0 0 0 0 0 0 0 0 0 0 0 0
 259       0 nvme0n1 50100 200 2000800 10040 30050 150 1500400 8020 2 15050 18060 0 0 0 0
",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::FileSystem;
    use std::path::Path;

    #[test]
    fn typical_system_has_core_files() {
        let fs = MockFs::typical_system();
        for file in [
            "/proc/stat",
            "/proc/diskstats",
            "/proc/meminfo",
            "/proc/loadavg",
            "/proc/net/dev",
            "/proc/mounts",
        ] {
            assert!(fs.read_to_string(Path::new(file)).is_ok(), "{file} missing");
        }
        assert!(fs.statvfs(Path::new("/data")).is_ok());
    }

    #[test]
    fn advance_rewrites_counters_in_place() {
        let fs = MockFs::typical_system();
        fs.advance_typical_counters();
        let diskstats = fs.read_to_string(Path::new("/proc/diskstats")).unwrap();
        assert!(diskstats.contains(" sdb "));
    }
}
