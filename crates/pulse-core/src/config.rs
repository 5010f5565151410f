//! YAML configuration for the agent.
//!
//! Every field has a default, so an empty file (or no file) yields a valid
//! configuration with the host collectors enabled and every service
//! collector disabled.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::collector::CounterResetPolicy;
use crate::orchestrator::CollectorKind;
use crate::remote::{BasicAuth, RemoteWriteConfig, TlsConfig};
use crate::scrape::ScrapeTarget;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Gather cycle period in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_proc_path")]
    pub proc_path: String,

    /// Timeout of each health probe and metrics scrape, in seconds.
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,

    #[serde(default)]
    pub counter_reset_policy: CounterResetPolicy,

    #[serde(default)]
    pub host: HostConfig,

    /// Health-checked services keyed by collector name (`etcd`, `nginx-vts`, ...).
    /// A service listed here is enabled unless `enabled: false`.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    #[serde(default)]
    pub pods: PodsConfig,

    #[serde(default = "default_smart")]
    pub smart: DeviceToolConfig,

    #[serde(default = "default_gpu")]
    pub gpu: DeviceToolConfig,

    #[serde(default)]
    pub remote_write: RemoteWriteSection,

    /// Identity labels injected into every shipped metric.
    #[serde(default)]
    pub identity: BTreeMap<String, String>,
}

/// Toggles for the collectors that read the local kernel.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_true")]
    pub load: bool,
    #[serde(default = "default_true")]
    pub cpu: bool,
    #[serde(default = "default_true")]
    pub memory: bool,
    #[serde(default = "default_true")]
    pub nic: bool,
    #[serde(default = "default_true")]
    pub disk: bool,
    #[serde(default = "default_true")]
    pub filesystem: bool,
    /// Block devices never read. Empty disables the filter.
    #[serde(default = "default_disk_exclude")]
    pub disk_exclude: String,
    /// Interfaces never reported. Empty disables the filter.
    #[serde(default = "default_nic_exclude")]
    pub nic_exclude: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub health_url: Option<String>,
    pub metrics_url: Option<String>,
    /// Drop `#` lines before parsing. Defaults per service.
    pub strip_metadata: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub targets: Vec<ScrapeTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceToolConfig {
    #[serde(default)]
    pub enabled: bool,
    pub binary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteWriteSection {
    pub url: Option<String>,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub tls: Option<TlsSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsSection {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_proc_path() -> String {
    "/proc".to_string()
}

fn default_scrape_timeout_secs() -> u64 {
    5
}

fn default_remote_timeout_secs() -> u64 {
    10
}

fn default_disk_exclude() -> String {
    r"^(ram|loop|fd|sr)\d+$".to_string()
}

fn default_nic_exclude() -> String {
    "^lo$".to_string()
}

fn default_smart() -> DeviceToolConfig {
    DeviceToolConfig {
        enabled: false,
        binary: "smartctl".to_string(),
    }
}

fn default_gpu() -> DeviceToolConfig {
    DeviceToolConfig {
        enabled: false,
        binary: "nvidia-smi".to_string(),
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            proc_path: default_proc_path(),
            scrape_timeout_secs: default_scrape_timeout_secs(),
            counter_reset_policy: CounterResetPolicy::default(),
            host: HostConfig::default(),
            services: BTreeMap::new(),
            pods: PodsConfig::default(),
            smart: default_smart(),
            gpu: default_gpu(),
            remote_write: RemoteWriteSection::default(),
            identity: BTreeMap::new(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            load: true,
            cpu: true,
            memory: true,
            nic: true,
            disk: true,
            filesystem: true,
            disk_exclude: default_disk_exclude(),
            nic_exclude: default_nic_exclude(),
        }
    }
}

impl Default for RemoteWriteSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_remote_timeout_secs(),
            username: None,
            password: None,
            headers: BTreeMap::new(),
            tls: None,
        }
    }
}

impl AgentConfig {
    /// Reads and validates a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses and validates YAML text. Empty text gives the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be positive".into()));
        }
        for (name, service) in &self.services {
            let kind = CollectorKind::from_str(name).map_err(ConfigError::Invalid)?;
            if !kind.is_health_checked() {
                return Err(ConfigError::Invalid(format!(
                    "{name} is not a service collector"
                )));
            }
            if service.health_url.is_none() && service.metrics_url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "service {name} needs health_url or metrics_url"
                )));
            }
        }
        self.disk_exclude()?;
        self.nic_exclude()?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn disk_exclude(&self) -> Result<Option<Regex>, ConfigError> {
        compile_exclude("host.disk_exclude", &self.host.disk_exclude)
    }

    pub fn nic_exclude(&self) -> Result<Option<Regex>, ConfigError> {
        compile_exclude("host.nic_exclude", &self.host.nic_exclude)
    }

    /// Settings of a service collector, if it is configured and enabled.
    pub fn service(&self, kind: CollectorKind) -> Option<&ServiceConfig> {
        self.services
            .get(kind.as_str())
            .filter(|service| service.enabled)
    }

    pub fn is_enabled(&self, kind: CollectorKind) -> bool {
        match kind {
            CollectorKind::Load => self.host.load,
            CollectorKind::Cpu => self.host.cpu,
            CollectorKind::Memory => self.host.memory,
            CollectorKind::Nic => self.host.nic,
            CollectorKind::Disk => self.host.disk,
            CollectorKind::Filesystem => self.host.filesystem,
            CollectorKind::Pods => self.pods.enabled,
            CollectorKind::Smart => self.smart.enabled,
            CollectorKind::Gpu => self.gpu.enabled,
            service => self.service(service).is_some(),
        }
    }

    /// Enabled collectors in gather order.
    pub fn enabled_collectors(&self) -> Vec<CollectorKind> {
        CollectorKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    pub fn remote_write_config(&self) -> Result<RemoteWriteConfig, ConfigError> {
        let section = &self.remote_write;
        let url = section
            .url
            .clone()
            .ok_or_else(|| ConfigError::Invalid("remote_write.url is required".into()))?;

        let mut config = RemoteWriteConfig::new(url, Duration::from_secs(section.timeout_secs));
        config.basic_auth = section.username.clone().map(|username| BasicAuth {
            username,
            password: section.password.clone(),
        });
        config.headers = section
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        config.tls = section.tls.as_ref().map(|tls| TlsConfig {
            ca_file: tls.ca_file.clone(),
            cert_file: tls.cert_file.clone(),
            key_file: tls.key_file.clone(),
            insecure_skip_verify: tls.insecure_skip_verify,
        });
        Ok(config)
    }
}

fn compile_exclude(field: &str, pattern: &str) -> Result<Option<Regex>, ConfigError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| ConfigError::Invalid(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AgentConfig::from_yaml("").unwrap();
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.proc_path, "/proc");
        assert_eq!(config.counter_reset_policy, CounterResetPolicy::PassThrough);
        assert_eq!(
            config.enabled_collectors(),
            vec![
                CollectorKind::Load,
                CollectorKind::Cpu,
                CollectorKind::Memory,
                CollectorKind::Nic,
                CollectorKind::Disk,
                CollectorKind::Filesystem,
            ]
        );
        assert!(config.disk_exclude().unwrap().unwrap().is_match("loop0"));
        assert!(config.remote_write_config().is_err());
    }

    #[test]
    fn test_full_config_from_file() {
        let yaml = r#"
interval_secs: 30
counter_reset_policy: clamp_to_zero
host:
  nic: false
  disk_exclude: ""
services:
  etcd:
    health_url: http://127.0.0.1:2379/health
    metrics_url: http://127.0.0.1:2379/metrics
  nginx-vts:
    metrics_url: http://127.0.0.1:8080/status/format/prometheus
  dns:
    enabled: false
    metrics_url: http://127.0.0.1:9153/metrics
pods:
  enabled: true
  targets:
    - url: http://10.0.0.7:9100/metrics
      labels:
        pod: web-0
        namespace: shop
smart:
  enabled: true
  binary: /usr/sbin/smartctl
remote_write:
  url: https://metrics.example.com/api/v1/write
  timeout_secs: 3
  username: agent
  password: secret
  headers:
    X-Scope-OrgID: tenant-1
identity:
  subid: s-42
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.counter_reset_policy, CounterResetPolicy::ClampToZero);
        assert!(config.disk_exclude().unwrap().is_none());
        assert_eq!(
            config.enabled_collectors(),
            vec![
                CollectorKind::Load,
                CollectorKind::Cpu,
                CollectorKind::Memory,
                CollectorKind::Disk,
                CollectorKind::Filesystem,
                CollectorKind::Etcd,
                CollectorKind::NginxVts,
                CollectorKind::Pods,
                CollectorKind::Smart,
            ]
        );
        assert_eq!(config.pods.targets[0].labels["namespace"], "shop");
        assert_eq!(config.smart.binary, "/usr/sbin/smartctl");
        assert_eq!(config.identity["subid"], "s-42");

        let remote = config.remote_write_config().unwrap();
        assert_eq!(remote.timeout, Duration::from_secs(3));
        assert_eq!(remote.basic_auth.unwrap().username, "agent");
        assert_eq!(remote.headers, vec![("X-Scope-OrgID".to_string(), "tenant-1".to_string())]);
    }

    #[test]
    fn test_invalid_configs() {
        let cases = [
            "interval_secs: 0",
            "services:\n  postgres:\n    metrics_url: http://x/metrics",
            "services:\n  gpu:\n    metrics_url: http://x/metrics",
            "services:\n  etcd:\n    enabled: true",
            "host:\n  disk_exclude: '('",
        ];
        for yaml in cases {
            assert!(
                matches!(AgentConfig::from_yaml(yaml), Err(ConfigError::Invalid(_))),
                "{yaml}"
            );
        }
        assert!(matches!(
            AgentConfig::from_yaml("interval_secs: [1"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = AgentConfig::load(Path::new("/nonexistent/pulse.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
