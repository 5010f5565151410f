//! Host and device collectors.
//!
//! Every source the agent reads locally lives here. Kernel sources go through
//! the `FileSystem` trait and device tools through `CommandRunner`, so tests
//! swap in `MockFs` and `ScriptedRunner`.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                          │
//! │  ┌───────────────────────┐   ┌─────────────────────────────┐  │
//! │  │   DeltaEngine<S>      │   │       SystemReader          │  │
//! │  │  - CpuCounters        │   │  - /proc/loadavg            │  │
//! │  │  - DiskCounters       │   │  - /proc/meminfo            │  │
//! │  │  (previous snapshot)  │   │  - /proc/net/dev, mounts    │  │
//! │  └──────────┬────────────┘   └──────────────┬──────────────┘  │
//! │             └──────────────┬────────────────┘                 │
//! │                     ┌──────▼──────┐      ┌───────────────┐    │
//! │                     │  FileSystem │      │ CommandRunner │    │
//! │                     └──────┬──────┘      └───────┬───────┘    │
//! └────────────────────────────┼─────────────────────┼────────────┘
//!                              │                     │
//!                  ┌───────────┴─────┐   ┌─────────┴────────────┐
//!                  │ RealFs │ MockFs │   │ RealCommandRunner    │
//!                  └─────────────────┘   │ ScriptedRunner       │
//!                                        └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use pulse_core::collector::{CounterResetPolicy, CpuCounters, DeltaEngine, MockFs};
//!
//! let fs = MockFs::typical_system();
//! let mut cpu = DeltaEngine::new(CpuCounters::new(fs.clone(), "/proc"), CounterResetPolicy::default());
//! assert!(cpu.advance().unwrap().is_none());
//! fs.advance_typical_counters();
//! assert!(cpu.advance().unwrap().is_some());
//! ```

pub mod command;
pub mod counters;
mod error;
pub mod gpu;
pub mod mock;
pub mod procfs;
pub mod smart;
pub mod traits;

pub use command::{CommandOutput, CommandRunner, RealCommandRunner};
pub use counters::{
    CounterDelta, CounterResetPolicy, CounterSnapshot, CpuCounters, DeltaEngine, DiskCounters,
    SnapshotSource, compute_delta,
};
pub use error::CollectError;
pub use gpu::GpuCollector;
pub use mock::{MockFs, ScriptedRunner};
pub use procfs::SystemReader;
pub use smart::SmartCollector;
pub use traits::{FileSystem, FsUsage, RealFs};
