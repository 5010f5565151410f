//! pulsed - host telemetry agent.
//!
//! Gathers host counters, device readings and co-located service metrics on
//! a fixed interval and ships them to a remote-write endpoint.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod memory;
mod probe;

use std::collections::BTreeMap;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use pulse_core::collector::{RealCommandRunner, RealFs};
use pulse_core::config::{AgentConfig, TlsSection};
use pulse_core::exposition::EnrichmentDictionary;
use pulse_core::orchestrator::{Dependencies, Orchestrator};
use pulse_core::registry::AgentRegistry;
use pulse_core::remote::RemoteWriteClient;
use pulse_core::scrape::StaticDiscovery;

use crate::memory::{heap_stats, release_memory_to_os};
use crate::probe::ProbeState;

/// Host telemetry agent.
#[derive(Parser, Debug)]
#[command(name = "pulsed", about = "Host telemetry agent", version)]
struct Args {
    /// YAML config file. Without it every collector runs with defaults.
    #[arg(short, long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Gather interval in seconds [default: 60].
    #[arg(short, long, env = "PULSE_INTERVAL", value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Path to /proc filesystem (for testing/mocking) [default: /proc].
    #[arg(long, env = "PULSE_PROC_PATH")]
    proc_path: Option<String>,

    /// Remote-write endpoint, e.g. https://metrics.example.com/api/v1/write.
    #[arg(long, env = "PULSE_REMOTE_WRITE_URL")]
    remote_write_url: Option<String>,

    /// Remote-write request timeout in seconds [default: 10].
    #[arg(long, env = "PULSE_REMOTE_WRITE_TIMEOUT")]
    remote_write_timeout: Option<u64>,

    /// Basic auth user for remote write.
    #[arg(long, env = "PULSE_REMOTE_WRITE_USER")]
    remote_write_user: Option<String>,

    /// Basic auth password for remote write.
    #[arg(long, env = "PULSE_REMOTE_WRITE_PASSWORD", hide_env_values = true)]
    remote_write_password: Option<String>,

    /// Extra request header as name=value. Repeatable.
    #[arg(long = "remote-write-header", value_name = "NAME=VALUE", value_parser = parse_header)]
    remote_write_headers: Vec<(String, String)>,

    /// CA bundle (PEM) trusted for the remote-write endpoint.
    #[arg(long, env = "PULSE_TLS_CA")]
    tls_ca: Option<PathBuf>,

    /// Client certificate (PEM). Requires --tls-key.
    #[arg(long, env = "PULSE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Client private key (PEM). Requires --tls-cert.
    #[arg(long, env = "PULSE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Accept any server certificate.
    #[arg(long, env = "PULSE_TLS_INSECURE_SKIP_VERIFY")]
    tls_insecure_skip_verify: bool,

    /// Identity label `hostname` [default: kernel hostname].
    #[arg(long, env = "PULSE_HOSTNAME")]
    hostname: Option<String>,

    /// Identity label `subid`.
    #[arg(long, env = "PULSE_SUBID")]
    subid: Option<String>,

    /// Identity label `vpsid`.
    #[arg(long, env = "PULSE_VPSID")]
    vpsid: Option<String>,

    /// Identity label `product`.
    #[arg(long, env = "PULSE_PRODUCT")]
    product: Option<String>,

    /// Listen address of the /healthz, /readyz and /debug/heap server.
    #[arg(long, env = "PULSE_PROBE_LISTEN", default_value = "0.0.0.0:9810")]
    probe_listen: SocketAddr,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Parses a `name=value` header flag.
fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{s}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pulsed", "pulse_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Flags win over the config file.
fn apply_overrides(args: &Args, config: &mut AgentConfig) {
    if let Some(interval) = args.interval {
        config.interval_secs = interval;
    }
    if let Some(proc_path) = &args.proc_path {
        config.proc_path = proc_path.clone();
    }

    let remote = &mut config.remote_write;
    if let Some(url) = &args.remote_write_url {
        remote.url = Some(url.clone());
    }
    if let Some(timeout) = args.remote_write_timeout {
        remote.timeout_secs = timeout;
    }
    if let Some(user) = &args.remote_write_user {
        remote.username = Some(user.clone());
    }
    if let Some(password) = &args.remote_write_password {
        remote.password = Some(password.clone());
    }
    for (name, value) in &args.remote_write_headers {
        remote.headers.insert(name.clone(), value.clone());
    }

    let tls_flags = args.tls_ca.is_some()
        || args.tls_cert.is_some()
        || args.tls_key.is_some()
        || args.tls_insecure_skip_verify;
    if tls_flags {
        let tls = remote.tls.get_or_insert_with(TlsSection::default);
        if args.tls_ca.is_some() {
            tls.ca_file = args.tls_ca.clone();
        }
        if args.tls_cert.is_some() {
            tls.cert_file = args.tls_cert.clone();
            tls.key_file = args.tls_key.clone();
        }
        tls.insecure_skip_verify |= args.tls_insecure_skip_verify;
    }

    let flags = [
        ("hostname", &args.hostname),
        ("subid", &args.subid),
        ("vpsid", &args.vpsid),
        ("product", &args.product),
    ];
    for (name, value) in flags {
        if let Some(value) = value {
            config.identity.insert(name.to_string(), value.clone());
        }
    }
}

/// Kernel hostname from `<proc>/sys/kernel/hostname`, empty if unreadable.
fn kernel_hostname(proc_path: &str) -> String {
    let path = format!("{}/sys/kernel/hostname", proc_path);
    match std::fs::read_to_string(&path) {
        Ok(content) => content.trim().to_string(),
        Err(e) => {
            warn!(path = %path, error = %e, "cannot read kernel hostname");
            String::new()
        }
    }
}

/// Identity labels from config and flags, with the kernel hostname as the
/// fallback for `hostname`.
fn identity_labels(config: &AgentConfig) -> BTreeMap<String, String> {
    let mut identity = config.identity.clone();
    let missing_hostname = identity.get("hostname").is_none_or(|h| h.is_empty());
    if missing_hostname {
        identity.insert("hostname".to_string(), kernel_hostname(&config.proc_path));
    }
    identity
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(args)) {
        error!(error = %e, "startup failed");
        process::exit(1);
    }
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    apply_overrides(&args, &mut config);

    let dictionary = EnrichmentDictionary::new(identity_labels(&config))?;
    let remote = RemoteWriteClient::new(config.remote_write_config()?)?;
    let registry = AgentRegistry::new()?;

    let deps = Dependencies {
        fs: RealFs,
        runner: RealCommandRunner,
        registry: Arc::new(registry),
        dictionary: Arc::new(dictionary),
        discovery: Box::new(StaticDiscovery::new(config.pods.targets.clone())),
        remote,
    };
    let mut orchestrator = Orchestrator::new(&config, deps)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        on_signal.cancel();
    })?;

    let probe_state = ProbeState::new(heap_stats);
    let listener = tokio::net::TcpListener::bind(args.probe_listen).await?;
    let probe_app = probe::router(probe_state.clone());
    let probe_shutdown = cancel.clone();
    let probe_server = tokio::spawn(async move {
        axum::serve(listener, probe_app)
            .with_graceful_shutdown(probe_shutdown.cancelled_owned())
            .await
    });

    info!(
        interval_secs = config.interval_secs,
        proc_path = %config.proc_path,
        probe_listen = %args.probe_listen,
        collectors = ?orchestrator.enabled(),
        "pulsed starting"
    );

    orchestrator
        .run(config.interval(), cancel.clone(), |_report| {
            probe_state.mark_ready();
            release_memory_to_os();
        })
        .await;

    // The gather loop only returns on shutdown; make sure the probe server
    // follows even if the loop stopped for another reason.
    cancel.cancel();
    match probe_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "probe server stopped with error"),
        Err(e) => warn!(error = %e, "probe server task failed"),
    }

    info!("pulsed stopped");
    Ok(())
}
