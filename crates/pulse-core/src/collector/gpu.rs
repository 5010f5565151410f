//! NVIDIA GPU gauges via `nvidia-smi`.

use tracing::warn;

use crate::collector::CollectError;
use crate::collector::command::CommandRunner;
use crate::exposition::MetricFamily;
use crate::registry::{AgentRegistry, GpuReading};

const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu",
    "--format=csv,noheader,nounits",
];

const MIB: f64 = 1024.0 * 1024.0;

pub struct GpuCollector<R: CommandRunner> {
    runner: R,
    binary: String,
}

impl<R: CommandRunner> GpuCollector<R> {
    pub fn new(runner: R, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    /// Replaces all GPU series in `registry` with a fresh reading.
    pub fn collect(&self, registry: &AgentRegistry) -> Result<Vec<MetricFamily>, CollectError> {
        registry.reset_gpu();

        let output = self.runner.run(&self.binary, &QUERY_ARGS)?;
        if !output.success {
            return Err(CollectError::command(&self.binary, output.stderr.trim()));
        }

        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            match parse_gpu_line(line) {
                Some(reading) => registry.set_gpu(&reading),
                None => warn!(line, "unexpected nvidia-smi row"),
            }
        }

        registry.gpu_families()
    }
}

/// Parses `index, name, util, mem.used, mem.total, temp` (memory in MiB).
///
/// Values such as `[N/A]` or `[Not Supported]` leave that field empty.
fn parse_gpu_line(line: &str) -> Option<GpuReading> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != 6 || parts[0].is_empty() {
        return None;
    }

    let number = |s: &str| s.parse::<f64>().ok();
    Some(GpuReading {
        index: parts[0].to_string(),
        name: parts[1].to_string(),
        utilization_percent: number(parts[2]),
        memory_used_bytes: number(parts[3]).map(|v| v * MIB),
        memory_total_bytes: number(parts[4]).map(|v| v * MIB),
        temperature_celsius: number(parts[5]),
    })
}
