//! Readers for the Linux `/proc` filesystem.
//!
//! `parser` holds the pure text parsers; `system` turns their output into
//! metric families for the point-in-time host gauges.

pub mod parser;
pub mod system;

pub use parser::FormatError;
pub use system::SystemReader;
