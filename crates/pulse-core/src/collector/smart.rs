//! SMART attributes via `smartctl`.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::collector::CollectError;
use crate::collector::command::CommandRunner;
use crate::exposition::MetricFamily;
use crate::registry::{AgentRegistry, SmartReading};

/// Subset of `smartctl -A -j` output.
#[derive(Debug, Default, Deserialize)]
struct SmartctlReport {
    #[serde(default)]
    ata_smart_attributes: Option<AtaAttributes>,
    #[serde(default)]
    nvme_smart_health_information_log: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct AtaAttributes {
    #[serde(default)]
    table: Vec<AtaAttribute>,
}

#[derive(Debug, Deserialize)]
struct AtaAttribute {
    id: u32,
    name: String,
    value: f64,
    raw: AtaRaw,
}

#[derive(Debug, Deserialize)]
struct AtaRaw {
    value: f64,
}

/// Collects SMART attributes for every device `smartctl --scan` reports.
pub struct SmartCollector<R: CommandRunner> {
    runner: R,
    binary: String,
}

impl<R: CommandRunner> SmartCollector<R> {
    pub fn new(runner: R, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    /// Replaces all SMART series in `registry` with a fresh reading.
    ///
    /// The scan failing fails the collection. A single device that cannot be
    /// read is logged and skipped.
    pub fn collect(&self, registry: &AgentRegistry) -> Result<Vec<MetricFamily>, CollectError> {
        registry.reset_smart();

        for device in self.scan()? {
            match self.read_device(&device) {
                Ok(report) => record(registry, &device, &report),
                Err(e) => warn!(device = %device, error = %e, "SMART read failed"),
            }
        }

        registry.smart_families()
    }

    fn scan(&self) -> Result<Vec<String>, CollectError> {
        let output = self.runner.run(&self.binary, &["--scan"])?;
        if !output.success {
            return Err(CollectError::command(&self.binary, output.stderr.trim()));
        }
        Ok(parse_scan(&output.stdout))
    }

    fn read_device(&self, device: &str) -> Result<SmartctlReport, CollectError> {
        let output = self.runner.run(&self.binary, &["-A", "-j", device])?;
        // smartctl's exit status is a bit mask that also flags failing disks;
        // only an empty report means the read itself failed.
        if output.stdout.trim().is_empty() {
            return Err(CollectError::command(&self.binary, output.stderr.trim()));
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| CollectError::command(&self.binary, format!("{device}: {e}")))
    }
}

/// Device paths from `smartctl --scan` (`/dev/sda -d sat # comment`).
fn parse_scan(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn record(registry: &AgentRegistry, device: &str, report: &SmartctlReport) {
    let mut recorded = 0;

    if let Some(ata) = &report.ata_smart_attributes {
        for attr in &ata.table {
            let id = attr.id.to_string();
            registry.set_smart(&SmartReading {
                device,
                attribute: &attr.name,
                id: &id,
                value: attr.value,
                raw_value: attr.raw.value,
            });
            recorded += 1;
        }
    }

    if let Some(log) = &report.nvme_smart_health_information_log {
        for (name, value) in log {
            let Some(value) = value.as_f64() else {
                continue;
            };
            registry.set_smart(&SmartReading {
                device,
                attribute: name,
                id: "nvme",
                value,
                raw_value: value,
            });
            recorded += 1;
        }
    }

    debug!(device, attributes = recorded, "SMART attributes recorded");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::ScriptedRunner;

    const ATA_REPORT: &str = r#"{
        "device": {"name": "/dev/sda"},
        "ata_smart_attributes": {
            "revision": 16,
            "table": [
                {"id": 5, "name": "Reallocated_Sector_Ct", "value": 100, "worst": 100, "raw": {"value": 0, "string": "0"}},
                {"id": 194, "name": "Temperature_Celsius", "value": 64, "worst": 50, "raw": {"value": 36, "string": "36"}}
            ]
        }
    }"#;

    const NVME_REPORT: &str = r#"{
        "nvme_smart_health_information_log": {
            "critical_warning": 0,
            "temperature": 41,
            "percentage_used": 3,
            "temperature_sensors": [41, 45]
        }
    }"#;

    fn runner() -> ScriptedRunner {
        let runner = ScriptedRunner::new();
        runner.on_success(
            "smartctl --scan",
            "/dev/sda -d sat # /dev/sda [SAT], ATA device\n/dev/nvme0 -d nvme # /dev/nvme0, NVMe device\n",
        );
        runner.on_success("smartctl -A -j /dev/sda", ATA_REPORT);
        runner.on_success("smartctl -A -j /dev/nvme0", NVME_REPORT);
        runner
    }

    fn series_for<'a>(families: &'a [MetricFamily], name: &str, device: &str) -> usize {
        families
            .iter()
            .filter(|f| f.name == name)
            .flat_map(|f| &f.metrics)
            .filter(|m| m.label("device") == Some(device))
            .count()
    }

    #[test]
    fn test_parse_scan() {
        let devices = parse_scan("# header\n/dev/sda -d sat # c\n\n/dev/sdb -d scsi\n");
        assert_eq!(devices, vec!["/dev/sda", "/dev/sdb"]);
    }

    #[test]
    fn test_collect_ata_and_nvme() {
        let registry = AgentRegistry::new().unwrap();
        let collector = SmartCollector::new(runner(), "smartctl");
        let families = collector.collect(&registry).unwrap();

        assert_eq!(series_for(&families, "smart_attribute_value", "/dev/sda"), 2);
        // Array-valued fields are skipped.
        assert_eq!(series_for(&families, "smart_attribute_value", "/dev/nvme0"), 3);

        let raw = families
            .iter()
            .find(|f| f.name == "smart_attribute_raw_value")
            .unwrap();
        let temp = raw
            .metrics
            .iter()
            .find(|m| m.label("attribute") == Some("Temperature_Celsius"))
            .unwrap();
        assert_eq!(temp.label("id"), Some("194"));
        assert_eq!(temp.value.scalar(), 36.0);
    }

    #[test]
    fn test_removed_device_leaves_no_stale_series() {
        let registry = AgentRegistry::new().unwrap();
        let runner = runner();
        let collector = SmartCollector::new(runner.clone(), "smartctl");
        collector.collect(&registry).unwrap();

        runner.on_success("smartctl --scan", "/dev/sda -d sat\n");
        let families = collector.collect(&registry).unwrap();
        assert_eq!(series_for(&families, "smart_attribute_value", "/dev/nvme0"), 0);
        assert_eq!(series_for(&families, "smart_attribute_value", "/dev/sda"), 2);
    }

    #[test]
    fn test_unreadable_device_is_skipped() {
        let registry = AgentRegistry::new().unwrap();
        let runner = runner();
        runner.on_success("smartctl -A -j /dev/nvme0", "not json");
        let families = SmartCollector::new(runner, "smartctl")
            .collect(&registry)
            .unwrap();
        assert_eq!(series_for(&families, "smart_attribute_value", "/dev/sda"), 2);
        assert_eq!(series_for(&families, "smart_attribute_value", "/dev/nvme0"), 0);
    }

    #[test]
    fn test_scan_failure_fails_collection() {
        let registry = AgentRegistry::new().unwrap();
        let runner = ScriptedRunner::new();
        runner.on_failure("smartctl --scan", "permission denied\n");
        let err = SmartCollector::new(runner, "smartctl")
            .collect(&registry)
            .unwrap_err();
        assert!(matches!(err, CollectError::Command { ref message, .. } if message == "permission denied"));
    }
}
