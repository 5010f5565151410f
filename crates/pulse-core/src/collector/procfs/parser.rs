//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string inputs.
//!
//! Two failure styles exist. Single-document sources (`stat`, `diskstats`,
//! `meminfo`, `loadavg`) fail as a whole on any malformed record. Line-oriented
//! sources (`net/dev`, `mounts`) stop at the first malformed line and return
//! what was parsed before it.

use thiserror::Error;

/// A kernel source did not have the expected field layout.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct FormatError {
    pub message: String,
}

impl FormatError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

fn parse_u64(token: &str, what: &str) -> Result<u64, FormatError> {
    token
        .parse()
        .map_err(|_| FormatError::new(format!("invalid {what}: {token:?}")))
}

// ============ /proc/stat ============

/// Names of the aggregate CPU tick columns, in kernel order.
pub const CPU_FIELDS: [&str; 10] = [
    "user",
    "nice",
    "system",
    "idle",
    "iowait",
    "irq",
    "softirq",
    "steal",
    "guest",
    "guest_nice",
];

/// Aggregate CPU tick counters from the first line of `/proc/stat`.
///
/// Kernels older than 2.6.33 report fewer columns; only the columns present
/// are returned, paired with their names from [`CPU_FIELDS`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTicks {
    pub fields: Vec<(&'static str, u64)>,
}

impl CpuTicks {
    pub fn get(&self, name: &str) -> Option<u64> {
        self.fields
            .iter()
            .find_map(|(field, value)| (*field == name).then_some(*value))
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
///
/// Format: `cpu  user nice system idle iowait irq softirq steal guest guest_nice`
pub fn parse_cpu_ticks(content: &str) -> Result<CpuTicks, FormatError> {
    let line = content
        .lines()
        .next()
        .ok_or_else(|| FormatError::new("empty /proc/stat"))?;
    let parts: Vec<&str> = line.split_whitespace().collect();

    match parts.first() {
        Some(&"cpu") => {}
        Some(other) => {
            return Err(FormatError::new(format!(
                "unexpected leading token in /proc/stat: {other:?}"
            )));
        }
        None => return Err(FormatError::new("empty cpu line")),
    }

    let values = &parts[1..];
    if !(7..=CPU_FIELDS.len()).contains(&values.len()) {
        return Err(FormatError::new(format!(
            "cpu line has {} fields, expected 7 to {}",
            values.len(),
            CPU_FIELDS.len()
        )));
    }

    let fields = values
        .iter()
        .zip(CPU_FIELDS)
        .map(|(token, name)| Ok((name, parse_u64(token, name)?)))
        .collect::<Result<Vec<_>, FormatError>>()?;

    Ok(CpuTicks { fields })
}

// ============ /proc/loadavg ============

/// Parsed data from `/proc/loadavg`.
#[derive(Debug, Clone, Default)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub running: u32,
    pub total: u32,
}

/// Parses `/proc/loadavg` content.
pub fn parse_loadavg(content: &str) -> Result<LoadAvg, FormatError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(FormatError::new(format!(
            "loadavg has {} fields, expected 5",
            parts.len()
        )));
    }

    let load = |idx: usize, name: &str| -> Result<f64, FormatError> {
        parts[idx]
            .parse()
            .map_err(|_| FormatError::new(format!("invalid {name}")))
    };

    let (running, total) = parts[3]
        .split_once('/')
        .and_then(|(r, t)| Some((r.parse().ok()?, t.parse().ok()?)))
        .ok_or_else(|| FormatError::new("invalid running/total field"))?;

    Ok(LoadAvg {
        load1: load(0, "load1")?,
        load5: load(1, "load5")?,
        load15: load(2, "load15")?,
        running,
        total,
    })
}

// ============ /proc/meminfo ============

/// Parsed data from `/proc/meminfo`, in kibibytes as the kernel reports them.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
    pub dirty: u64,
    pub slab: u64,
}

/// Parses `/proc/meminfo` content.
///
/// Every line must be `Key: value` or `Key: value kB`; one malformed line
/// fails the whole document.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, FormatError> {
    let mut info = MemInfo::default();

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(FormatError::new(format!(
                "meminfo line {} has {} fields",
                idx + 1,
                parts.len()
            )));
        }
        let key = parts[0]
            .strip_suffix(':')
            .ok_or_else(|| FormatError::new(format!("meminfo line {} lacks ':'", idx + 1)))?;
        let value = parse_u64(parts[1], key)?;

        match key {
            "MemTotal" => info.mem_total = value,
            "MemFree" => info.mem_free = value,
            "MemAvailable" => info.mem_available = value,
            "Buffers" => info.buffers = value,
            "Cached" => info.cached = value,
            "SwapTotal" => info.swap_total = value,
            "SwapFree" => info.swap_free = value,
            "Dirty" => info.dirty = value,
            "Slab" => info.slab = value,
            _ => {}
        }
    }

    if info.mem_total == 0 {
        return Err(FormatError::new("meminfo lacks MemTotal"));
    }

    Ok(info)
}

// ============ /proc/diskstats ============

/// Names of the monotonic diskstats columns kept as counters.
///
/// `io_in_progress` (column 12) is an instantaneous gauge and is skipped.
pub const DISK_FIELDS: [&str; 10] = [
    "reads",
    "reads_merged",
    "read_sectors",
    "read_time_ms",
    "writes",
    "writes_merged",
    "write_sectors",
    "write_time_ms",
    "io_time_ms",
    "io_weighted_time_ms",
];

/// Parsed data from one `/proc/diskstats` record.
#[derive(Debug, Clone, Default)]
pub struct DiskStats {
    pub major: u32,
    pub minor: u32,
    /// Device name (sda, nvme0n1, etc.)
    pub device: String,
    /// Counter values, ordered as [`DISK_FIELDS`].
    pub counters: [u64; 10],
    /// Number of I/Os currently in progress.
    pub io_in_progress: u64,
}

/// Parses `/proc/diskstats` content.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged
/// w_sectors w_time io_pending io_time w_io_time [discards ...] [flushes ...]
///
/// Records carry 14, 18 or 20 fields depending on kernel version. Any other
/// count fails the whole read.
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskStats>, FormatError> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if !matches!(parts.len(), 14 | 18 | 20) {
            return Err(FormatError::new(format!(
                "diskstats record {:?} has {} fields, expected 14, 18 or 20",
                parts.get(2).copied().unwrap_or_default(),
                parts.len()
            )));
        }

        let major = parts[0]
            .parse()
            .map_err(|_| FormatError::new("invalid major"))?;
        let minor = parts[1]
            .parse()
            .map_err(|_| FormatError::new("invalid minor"))?;

        let mut counters = [0u64; 10];
        for ((slot, name), idx) in counters
            .iter_mut()
            .zip(DISK_FIELDS)
            .zip([3, 4, 5, 6, 7, 8, 9, 10, 12, 13])
        {
            *slot = parse_u64(parts[idx], name)?;
        }

        disks.push(DiskStats {
            major,
            minor,
            device: parts[2].to_string(),
            counters,
            io_in_progress: parse_u64(parts[11], "io_in_progress")?,
        });
    }

    Ok(disks)
}

// ============ /proc/net/dev ============

/// Parsed data from `/proc/net/dev`.
#[derive(Debug, Clone, Default)]
pub struct NetDevStats {
    /// Interface name (eth0, lo, etc.)
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errs: u64,
    pub rx_drop: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errs: u64,
    pub tx_drop: u64,
}

/// Parses `/proc/net/dev` content.
///
/// Format:
/// Inter-|   Receive                                                |  Transmit
///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
///    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
///
/// Parsing stops at the first malformed interface line.
pub fn parse_net_dev(content: &str) -> Vec<NetDevStats> {
    let mut devices = Vec::new();

    for line in content.lines() {
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }

        let Some((interface, rest)) = line.split_once(':') else {
            break;
        };
        let values: Option<Vec<u64>> = rest
            .split_whitespace()
            .map(|s| s.parse::<u64>().ok())
            .collect();
        let Some(values) = values.filter(|v| v.len() == 16) else {
            break;
        };

        devices.push(NetDevStats {
            interface: interface.trim().to_string(),
            rx_bytes: values[0],
            rx_packets: values[1],
            rx_errs: values[2],
            rx_drop: values[3],
            tx_bytes: values[8],
            tx_packets: values[9],
            tx_errs: values[10],
            tx_drop: values[11],
        });
    }

    devices
}

// ============ /proc/mounts ============

/// One entry of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
}

/// Parses `/proc/mounts` content.
///
/// Format: `device mount_point fs_type options dump pass`. Octal escapes
/// (`\040` for space) in the mount point are decoded. Parsing stops at the
/// first line with the wrong number of fields.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    let mut mounts = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 6 {
            break;
        }
        mounts.push(MountEntry {
            device: unescape_octal(parts[0]),
            mount_point: unescape_octal(parts[1]),
            fs_type: parts[2].to_string(),
        });
    }

    mounts
}

fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(code as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_ticks() {
        let content = "cpu  10000 500 3000 80000 1000 200 100 0 0 0\ncpu0 1 2 3 4 5 6 7 0 0 0\n";
        let ticks = parse_cpu_ticks(content).unwrap();
        assert_eq!(ticks.fields.len(), 10);
        assert_eq!(ticks.get("user"), Some(10000));
        assert_eq!(ticks.get("idle"), Some(80000));
        assert_eq!(ticks.get("guest_nice"), Some(0));
    }

    #[test]
    fn test_parse_cpu_ticks_old_kernel() {
        let ticks = parse_cpu_ticks("cpu 1 2 3 4 5 6 7\n").unwrap();
        assert_eq!(ticks.fields.len(), 7);
        assert_eq!(ticks.get("steal"), None);
    }

    #[test]
    fn test_parse_cpu_ticks_rejects_wrong_leading_token() {
        let err = parse_cpu_ticks("intr 1 2 3 4 5 6 7 8\n").unwrap_err();
        assert!(err.message.contains("leading token"));
    }

    #[test]
    fn test_parse_cpu_ticks_rejects_wrong_field_count() {
        assert!(parse_cpu_ticks("cpu 1 2 3\n").is_err());
        assert!(parse_cpu_ticks("cpu 1 2 3 4 5 6 7 8 9 10 11\n").is_err());
        assert!(parse_cpu_ticks("").is_err());
    }

    #[test]
    fn test_parse_loadavg() {
        let load = parse_loadavg("0.15 0.10 0.05 1/150 1234\n").unwrap();
        assert_eq!(load.load1, 0.15);
        assert_eq!(load.load15, 0.05);
        assert_eq!(load.running, 1);
        assert_eq!(load.total, 150);
        assert!(parse_loadavg("0.15 0.10\n").is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
HugePages_Total:       0
";
        let info = parse_meminfo(content).unwrap();
        assert_eq!(info.mem_total, 16384000);
        assert_eq!(info.mem_available, 12000000);
    }

    #[test]
    fn test_parse_meminfo_malformed_line_fails_document() {
        let content = "MemTotal: 100 kB\nMemFree: 50 kB extra junk\n";
        assert!(parse_meminfo(content).is_err());
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
";
        let disks = parse_diskstats(content).unwrap();
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].device, "sda");
        assert_eq!(disks[0].counters[0], 12345);
        assert_eq!(disks[0].counters[8], 4000);
        assert_eq!(disks[1].io_in_progress, 5);
        assert_eq!(disks[1].counters[9], 18000);
    }

    #[test]
    fn test_parse_diskstats_bad_record_fails_whole_read() {
        let content = "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000
   8      16 sdb 1 2 3
";
        let err = parse_diskstats(content).unwrap_err();
        assert!(err.message.contains("sdb"));
    }

    #[test]
    fn test_parse_net_dev() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 12345678     9876    0    0    0     0          0         0 12345678     9876    0    0    0     0       0          0
  eth0: 987654321   654321    5   10    0     0          0       100 123456789   456789    2    5    0     0       0          0
";
        let devices = parse_net_dev(content);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].interface, "eth0");
        assert_eq!(devices[1].rx_bytes, 987654321);
        assert_eq!(devices[1].tx_drop, 5);
    }

    #[test]
    fn test_parse_net_dev_stops_at_malformed_line() {
        let content = "\
    lo: 1 2 0 0 0 0 0 0 1 2 0 0 0 0 0 0
  eth0: garbage
  eth1: 1 2 0 0 0 0 0 0 1 2 0 0 0 0 0 0
";
        let devices = parse_net_dev(content);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].interface, "lo");
    }

    #[test]
    fn test_parse_mounts() {
        let content = "\
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb1 /mnt/my\\040disk ext4 rw 0 0
broken line
/dev/sdc1 /never xfs rw 0 0
";
        let mounts = parse_mounts(content);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].mount_point, "/mnt/my disk");
        assert_eq!(mounts[0].fs_type, "ext4");
    }
}
