//! Error type shared by every collection source.

use thiserror::Error;

use crate::collector::procfs::parser::FormatError;
use crate::exposition::ParseError;

/// Error type for collection failures.
///
/// The orchestrator catches these at its per-collector boundary; none of them
/// abort a gather cycle.
#[derive(Debug, Error)]
pub enum CollectError {
    /// A kernel pseudo-file (or other local source) could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A kernel source did not have the expected field layout.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// A metrics exposition payload was malformed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// An HTTP scrape failed or returned a non-2xx status.
    #[error("scrape of {endpoint} failed: {message}")]
    Scrape { endpoint: String, message: String },

    /// An external device tool failed or produced unusable output.
    #[error("{program} failed: {message}")]
    Command { program: String, message: String },

    /// The agent's own metric registry could not be updated or encoded.
    #[error("registry error: {0}")]
    Registry(#[from] prometheus::Error),

    /// The collector is enabled but lacks a setting it needs.
    #[error("configuration error: {0}")]
    Config(String),

    /// Shutdown was requested while the collection was in flight.
    #[error("collection cancelled")]
    Cancelled,
}

impl CollectError {
    pub fn scrape(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        CollectError::Scrape {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        CollectError::Command {
            program: program.into(),
            message: message.into(),
        }
    }
}
