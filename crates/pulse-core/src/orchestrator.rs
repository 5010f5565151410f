//! The gather cycle.
//!
//! One cycle walks the enabled collectors in a fixed order. For each one it
//! collects, enriches, projects and ships, strictly one after another. A
//! collector that fails to collect or ship is logged and skipped; it never
//! stops the cycle, and nothing is retried or buffered for the next one.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::counters::{cpu_families, disk_families};
use crate::collector::{
    CollectError, CommandRunner, CpuCounters, DeltaEngine, DiskCounters, FileSystem,
    GpuCollector, SmartCollector, SystemReader,
};
use crate::config::{AgentConfig, ConfigError};
use crate::exposition::{
    EnrichmentDictionary, Label, MetricFamily, add_target_labels, enrich_labels,
};
use crate::registry::AgentRegistry;
use crate::remote::RemoteWriteClient;
use crate::scrape::{Scraper, TargetDiscovery};
use crate::series::project;

/// Every collector the agent knows, in gather order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    Load,
    Cpu,
    Memory,
    Nic,
    Disk,
    Filesystem,
    Kubernetes,
    Konnectivity,
    Etcd,
    NginxVts,
    CdnAgent,
    Haproxy,
    Ceph,
    Dns,
    Pods,
    Smart,
    Gpu,
}

impl CollectorKind {
    pub const ALL: [CollectorKind; 17] = [
        CollectorKind::Load,
        CollectorKind::Cpu,
        CollectorKind::Memory,
        CollectorKind::Nic,
        CollectorKind::Disk,
        CollectorKind::Filesystem,
        CollectorKind::Kubernetes,
        CollectorKind::Konnectivity,
        CollectorKind::Etcd,
        CollectorKind::NginxVts,
        CollectorKind::CdnAgent,
        CollectorKind::Haproxy,
        CollectorKind::Ceph,
        CollectorKind::Dns,
        CollectorKind::Pods,
        CollectorKind::Smart,
        CollectorKind::Gpu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollectorKind::Load => "load",
            CollectorKind::Cpu => "cpu",
            CollectorKind::Memory => "memory",
            CollectorKind::Nic => "nic",
            CollectorKind::Disk => "disk",
            CollectorKind::Filesystem => "filesystem",
            CollectorKind::Kubernetes => "kubernetes",
            CollectorKind::Konnectivity => "konnectivity",
            CollectorKind::Etcd => "etcd",
            CollectorKind::NginxVts => "nginx-vts",
            CollectorKind::CdnAgent => "cdn-agent",
            CollectorKind::Haproxy => "haproxy",
            CollectorKind::Ceph => "ceph",
            CollectorKind::Dns => "dns",
            CollectorKind::Pods => "pods",
            CollectorKind::Smart => "smart",
            CollectorKind::Gpu => "gpu",
        }
    }

    /// Services that get a `<service>_health_status` probe before their scrape.
    pub fn is_health_checked(self) -> bool {
        matches!(
            self,
            CollectorKind::Kubernetes
                | CollectorKind::Konnectivity
                | CollectorKind::Etcd
                | CollectorKind::NginxVts
                | CollectorKind::CdnAgent
                | CollectorKind::Haproxy
                | CollectorKind::Ceph
                | CollectorKind::Dns
        )
    }

    /// Services known to repeat `# HELP`/`# TYPE` blocks in their output.
    pub fn strips_metadata_by_default(self) -> bool {
        matches!(self, CollectorKind::NginxVts | CollectorKind::CdnAgent)
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown collector {s:?}"))
    }
}

/// Outcome counts of one gather cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Collectors whose collection succeeded.
    pub collected: usize,
    /// Collectors whose batch the remote store accepted.
    pub shipped: usize,
    pub collect_failures: usize,
    pub ship_failures: usize,
    /// Series accepted by the remote store.
    pub series: usize,
}

struct ServiceEndpoint {
    health_url: Option<String>,
    metrics_url: Option<String>,
    strip_metadata: bool,
}

/// Everything the orchestrator drives but does not build itself.
pub struct Dependencies<F: FileSystem + Clone, R: CommandRunner + Clone> {
    pub fs: F,
    pub runner: R,
    pub registry: Arc<AgentRegistry>,
    pub dictionary: Arc<EnrichmentDictionary>,
    pub discovery: Box<dyn TargetDiscovery>,
    pub remote: RemoteWriteClient,
}

pub struct Orchestrator<F: FileSystem + Clone, R: CommandRunner + Clone> {
    enabled: Vec<CollectorKind>,
    system: SystemReader<F>,
    cpu: DeltaEngine<CpuCounters<F>>,
    disk: DeltaEngine<DiskCounters<F>>,
    nic_exclude: Option<Regex>,
    services: HashMap<CollectorKind, ServiceEndpoint>,
    discovery: Box<dyn TargetDiscovery>,
    scraper: Scraper,
    smart: SmartCollector<R>,
    gpu: GpuCollector<R>,
    registry: Arc<AgentRegistry>,
    dictionary: Arc<EnrichmentDictionary>,
    remote: RemoteWriteClient,
}

impl<F: FileSystem + Clone, R: CommandRunner + Clone> Orchestrator<F, R> {
    pub fn new(config: &AgentConfig, deps: Dependencies<F, R>) -> Result<Self, ConfigError> {
        let proc_path = config.proc_path.as_str();
        let policy = config.counter_reset_policy;

        let services = CollectorKind::ALL
            .into_iter()
            .filter(|kind| kind.is_health_checked())
            .filter_map(|kind| {
                let service = config.service(kind)?;
                Some((
                    kind,
                    ServiceEndpoint {
                        health_url: service.health_url.clone(),
                        metrics_url: service.metrics_url.clone(),
                        strip_metadata: service
                            .strip_metadata
                            .unwrap_or_else(|| kind.strips_metadata_by_default()),
                    },
                ))
            })
            .collect();

        let scraper = Scraper::new(config.scrape_timeout())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self {
            enabled: config.enabled_collectors(),
            system: SystemReader::new(deps.fs.clone(), proc_path),
            cpu: DeltaEngine::new(CpuCounters::new(deps.fs.clone(), proc_path), policy),
            disk: DeltaEngine::new(
                DiskCounters::new(deps.fs, proc_path, config.disk_exclude()?),
                policy,
            ),
            nic_exclude: config.nic_exclude()?,
            services,
            discovery: deps.discovery,
            scraper,
            smart: SmartCollector::new(deps.runner.clone(), config.smart.binary.clone()),
            gpu: GpuCollector::new(deps.runner, config.gpu.binary.clone()),
            registry: deps.registry,
            dictionary: deps.dictionary,
            remote: deps.remote,
        })
    }

    pub fn enabled(&self) -> &[CollectorKind] {
        &self.enabled
    }

    /// Runs every enabled collector once.
    ///
    /// `cancel` is checked between collectors and also aborts an in-flight
    /// remote write.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        for kind in self.enabled.clone() {
            if cancel.is_cancelled() {
                info!(next = %kind, "shutdown requested, ending gather cycle early");
                break;
            }

            let families = match self.collect(kind, cancel).await {
                Ok(families) => families,
                Err(CollectError::Cancelled) => {
                    info!(collector = %kind, "shutdown requested, collection abandoned");
                    break;
                }
                Err(e) => {
                    warn!(collector = %kind, error = %e, "collection failed");
                    report.collect_failures += 1;
                    continue;
                }
            };
            report.collected += 1;

            if families.is_empty() {
                debug!(collector = %kind, "nothing to ship");
                continue;
            }

            let families = enrich_labels(families, &self.dictionary);
            let series = project(&families, Utc::now());
            match self.remote.store(cancel, &series).await {
                Ok(()) => {
                    debug!(collector = %kind, series = series.len(), "shipped");
                    report.shipped += 1;
                    report.series += series.len();
                }
                Err(e) => {
                    error!(collector = %kind, series = series.len(), error = %e, "remote write failed");
                    report.ship_failures += 1;
                }
            }
        }

        report
    }

    /// Runs a cycle every `period` until `cancel` fires. The first cycle
    /// starts immediately; a cycle that overruns skips the missed ticks.
    pub async fn run(
        &mut self,
        period: Duration,
        cancel: CancellationToken,
        mut on_cycle: impl FnMut(&CycleReport),
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_cycle(&cancel).await;
            info!(
                collected = report.collected,
                shipped = report.shipped,
                collect_failures = report.collect_failures,
                ship_failures = report.ship_failures,
                series = report.series,
                "gather cycle complete"
            );
            on_cycle(&report);
        }

        info!("gather loop stopped");
    }

    async fn collect(
        &mut self,
        kind: CollectorKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricFamily>, CollectError> {
        match kind {
            CollectorKind::Load => self.system.read_load(),
            CollectorKind::Cpu => Ok(self
                .cpu
                .advance()?
                .map(|delta| cpu_families(&delta))
                .unwrap_or_default()),
            CollectorKind::Memory => self.system.read_memory(),
            CollectorKind::Nic => self.system.read_nics(self.nic_exclude.as_ref()),
            CollectorKind::Disk => Ok(self
                .disk
                .advance()?
                .map(|delta| disk_families(&delta))
                .unwrap_or_default()),
            CollectorKind::Filesystem => self.system.read_filesystems(),
            CollectorKind::Pods => self.collect_pods(cancel).await,
            CollectorKind::Smart => self.smart.collect(&self.registry),
            CollectorKind::Gpu => self.gpu.collect(&self.registry),
            service => self.collect_service(service, cancel).await,
        }
    }

    /// Probe, then scrape. Both are attempted; a failed scrape still ships
    /// the health verdict.
    async fn collect_service(
        &self,
        kind: CollectorKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricFamily>, CollectError> {
        let endpoint = self
            .services
            .get(&kind)
            .ok_or_else(|| CollectError::Config(format!("{kind} has no endpoints configured")))?;

        let mut families = Vec::new();
        if let Some(url) = &endpoint.health_url {
            let healthy = self.scraper.probe(cancel, url).await?;
            if !healthy {
                warn!(collector = %kind, endpoint = %url, "service unhealthy");
            }
            self.registry.set_health(kind, healthy);
            families.extend(self.registry.health_families(kind)?);
        }

        if let Some(url) = &endpoint.metrics_url {
            match self
                .scraper
                .scrape_families(cancel, url, endpoint.strip_metadata)
                .await
            {
                Ok(scraped) => families.extend(scraped),
                Err(e @ CollectError::Cancelled) => return Err(e),
                Err(e) if families.is_empty() => return Err(e),
                Err(e) => {
                    warn!(collector = %kind, endpoint = %url, error = %e, "metrics scrape failed, shipping health only");
                }
            }
        }

        Ok(families)
    }

    /// Scrapes every discovered target. Targets that fail are logged and
    /// skipped; shutdown abandons the remaining ones.
    async fn collect_pods(&self, cancel: &CancellationToken) -> Result<Vec<MetricFamily>, CollectError> {
        let targets = self.discovery.targets()?;
        let mut families = Vec::new();

        for target in &targets {
            if cancel.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            match self.scraper.scrape_families(cancel, &target.url, false).await {
                Ok(scraped) => {
                    let labels: Vec<Label> = target
                        .labels
                        .iter()
                        .map(|(name, value)| Label::new(name, value))
                        .collect();
                    families.extend(add_target_labels(scraped, &labels));
                }
                Err(CollectError::Cancelled) => return Err(CollectError::Cancelled),
                Err(e) => warn!(endpoint = %target.url, error = %e, "pod scrape failed"),
            }
        }

        debug!(targets = targets.len(), families = families.len(), "pods scraped");
        Ok(families)
    }
}
