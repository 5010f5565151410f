//! Mock filesystem and command runner for testing.
//!
//! This module provides `MockFs`, `ScriptedRunner` and pre-built `/proc`
//! scenarios so collectors can be exercised without Linux or device tools.

mod filesystem;
mod runner;
mod scenarios;

pub use filesystem::MockFs;
pub use runner::ScriptedRunner;
