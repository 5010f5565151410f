//! The agent's own metric families.
//!
//! Health verdicts and device readings (SMART, GPU) are owned by one
//! [`AgentRegistry`] that the orchestrator holds and lends to collectors. Reading
//! families back goes through the text exposition and [`parse_families`], the
//! same path scraped payloads take.

use std::collections::HashMap;

use prometheus::{Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder};

use crate::collector::CollectError;
use crate::exposition::{MetricFamily, parse_families};
use crate::orchestrator::CollectorKind;

const SMART_VALUE: &str = "smart_attribute_value";
const SMART_RAW_VALUE: &str = "smart_attribute_raw_value";
const SMART_LABELS: [&str; 3] = ["device", "attribute", "id"];

const GPU_UTILIZATION: &str = "gpu_utilization_percent";
const GPU_MEMORY_USED: &str = "gpu_memory_used_bytes";
const GPU_MEMORY_TOTAL: &str = "gpu_memory_total_bytes";
const GPU_TEMPERATURE: &str = "gpu_temperature_celsius";
const GPU_LABELS: [&str; 2] = ["gpu", "name"];

/// One SMART attribute of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartReading<'a> {
    pub device: &'a str,
    pub attribute: &'a str,
    pub id: &'a str,
    pub value: f64,
    pub raw_value: f64,
}

/// One row of `nvidia-smi` output. Absent fields were reported as
/// unsupported by the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuReading {
    pub index: String,
    pub name: String,
    pub utilization_percent: Option<f64>,
    pub memory_used_bytes: Option<f64>,
    pub memory_total_bytes: Option<f64>,
    pub temperature_celsius: Option<f64>,
}

pub struct AgentRegistry {
    registry: Registry,
    health: HashMap<CollectorKind, IntGauge>,
    smart_value: GaugeVec,
    smart_raw_value: GaugeVec,
    gpu_utilization: GaugeVec,
    gpu_memory_used: GaugeVec,
    gpu_memory_total: GaugeVec,
    gpu_temperature: GaugeVec,
}

impl AgentRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let mut health = HashMap::new();
        for kind in CollectorKind::ALL.into_iter().filter(|k| k.is_health_checked()) {
            let gauge = IntGauge::with_opts(Opts::new(
                Self::health_metric_name(kind),
                format!("Health of {kind}: 0 healthy, 1 unhealthy"),
            ))?;
            registry.register(Box::new(gauge.clone()))?;
            health.insert(kind, gauge);
        }

        let gauge_vec = |name: &str, help: &str, labels: &[&str]| -> Result<GaugeVec, prometheus::Error> {
            let vec = GaugeVec::new(Opts::new(name, help), labels)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let smart_value = gauge_vec(SMART_VALUE, "Normalized SMART attribute value", &SMART_LABELS)?;
        let smart_raw_value = gauge_vec(SMART_RAW_VALUE, "Raw SMART attribute value", &SMART_LABELS)?;
        let gpu_utilization = gauge_vec(GPU_UTILIZATION, "GPU utilization", &GPU_LABELS)?;
        let gpu_memory_used = gauge_vec(GPU_MEMORY_USED, "GPU memory in use", &GPU_LABELS)?;
        let gpu_memory_total = gauge_vec(GPU_MEMORY_TOTAL, "GPU memory installed", &GPU_LABELS)?;
        let gpu_temperature = gauge_vec(GPU_TEMPERATURE, "GPU core temperature", &GPU_LABELS)?;

        Ok(Self {
            registry,
            health,
            smart_value,
            smart_raw_value,
            gpu_utilization,
            gpu_memory_used,
            gpu_memory_total,
            gpu_temperature,
        })
    }

    /// `<service>_health_status`, with dashes turned into underscores.
    pub fn health_metric_name(kind: CollectorKind) -> String {
        format!("{}_health_status", kind.as_str().replace('-', "_"))
    }

    /// Records a probe verdict. Kinds without a health probe are ignored.
    pub fn set_health(&self, kind: CollectorKind, healthy: bool) {
        if let Some(gauge) = self.health.get(&kind) {
            gauge.set(if healthy { 0 } else { 1 });
        }
    }

    pub fn health_families(&self, kind: CollectorKind) -> Result<Vec<MetricFamily>, CollectError> {
        let name = Self::health_metric_name(kind);
        self.gather(&[name.as_str()])
    }

    /// Forgets every SMART series so removed devices stop reporting.
    pub fn reset_smart(&self) {
        self.smart_value.reset();
        self.smart_raw_value.reset();
    }

    pub fn set_smart(&self, reading: &SmartReading<'_>) {
        let labels = [reading.device, reading.attribute, reading.id];
        self.smart_value.with_label_values(&labels).set(reading.value);
        self.smart_raw_value.with_label_values(&labels).set(reading.raw_value);
    }

    pub fn smart_families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        self.gather(&[SMART_VALUE, SMART_RAW_VALUE])
    }

    pub fn reset_gpu(&self) {
        self.gpu_utilization.reset();
        self.gpu_memory_used.reset();
        self.gpu_memory_total.reset();
        self.gpu_temperature.reset();
    }

    pub fn set_gpu(&self, reading: &GpuReading) {
        let labels = [reading.index.as_str(), reading.name.as_str()];
        for (vec, value) in [
            (&self.gpu_utilization, reading.utilization_percent),
            (&self.gpu_memory_used, reading.memory_used_bytes),
            (&self.gpu_memory_total, reading.memory_total_bytes),
            (&self.gpu_temperature, reading.temperature_celsius),
        ] {
            if let Some(value) = value {
                vec.with_label_values(&labels).set(value);
            }
        }
    }

    pub fn gpu_families(&self) -> Result<Vec<MetricFamily>, CollectError> {
        self.gather(&[
            GPU_UTILIZATION,
            GPU_MEMORY_USED,
            GPU_MEMORY_TOTAL,
            GPU_TEMPERATURE,
        ])
    }

    /// Encodes the named families and parses them back into the shared model.
    /// Families without any series are absent from the result.
    fn gather(&self, names: &[&str]) -> Result<Vec<MetricFamily>, CollectError> {
        let families: Vec<_> = self
            .registry
            .gather()
            .into_iter()
            .filter(|mf| names.contains(&mf.get_name()))
            .collect();
        if families.is_empty() {
            return Ok(Vec::new());
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(parse_families(&buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::{MetricType, Value};

    #[test]
    fn test_health_gauge_per_checked_service() {
        let registry = AgentRegistry::new().unwrap();
        registry.set_health(CollectorKind::NginxVts, false);

        let families = registry.health_families(CollectorKind::NginxVts).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "nginx_vts_health_status");
        assert_eq!(families[0].kind, MetricType::Gauge);
        assert_eq!(families[0].metrics[0].value, Value::Gauge(1.0));

        registry.set_health(CollectorKind::NginxVts, true);
        let families = registry.health_families(CollectorKind::NginxVts).unwrap();
        assert_eq!(families[0].metrics[0].value, Value::Gauge(0.0));

        // No probe for host collectors.
        registry.set_health(CollectorKind::Cpu, false);
        assert!(registry.health_families(CollectorKind::Cpu).unwrap().is_empty());
    }

    #[test]
    fn test_smart_reset_drops_removed_devices() {
        let registry = AgentRegistry::new().unwrap();
        for device in ["/dev/sda", "/dev/sdb"] {
            registry.set_smart(&SmartReading {
                device,
                attribute: "Reallocated_Sector_Ct",
                id: "5",
                value: 100.0,
                raw_value: 0.0,
            });
        }
        let families = registry.smart_families().unwrap();
        assert_eq!(families.len(), 2);
        assert!(families.iter().all(|f| f.metrics.len() == 2));

        registry.reset_smart();
        assert!(registry.smart_families().unwrap().is_empty());

        registry.set_smart(&SmartReading {
            device: "/dev/sda",
            attribute: "Reallocated_Sector_Ct",
            id: "5",
            value: 99.0,
            raw_value: 3.0,
        });
        let families = registry.smart_families().unwrap();
        let raw = families.iter().find(|f| f.name == SMART_RAW_VALUE).unwrap();
        assert_eq!(raw.metrics.len(), 1);
        assert_eq!(raw.metrics[0].label("device"), Some("/dev/sda"));
        assert_eq!(raw.metrics[0].label("id"), Some("5"));
        assert_eq!(raw.metrics[0].value, Value::Gauge(3.0));
    }

    #[test]
    fn test_gpu_skips_unsupported_fields() {
        let registry = AgentRegistry::new().unwrap();
        registry.set_gpu(&GpuReading {
            index: "0".into(),
            name: "Tesla T4".into(),
            utilization_percent: Some(42.0),
            memory_used_bytes: Some(1024.0),
            memory_total_bytes: Some(4096.0),
            temperature_celsius: None,
        });

        let families = registry.gpu_families().unwrap();
        assert_eq!(families.len(), 3);
        assert!(families.iter().all(|f| f.name != GPU_TEMPERATURE));
        let util = families.iter().find(|f| f.name == GPU_UTILIZATION).unwrap();
        assert_eq!(util.metrics[0].label("name"), Some("Tesla T4"));

        registry.reset_gpu();
        assert!(registry.gpu_families().unwrap().is_empty());
    }
}
