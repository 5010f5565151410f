//! pulse-core - collection and shipping pipeline of the pulse agent.
//!
//! Provides:
//! - `collector` - kernel counter deltas, host snapshot readers, SMART and GPU
//! - `exposition` - metric family model, text exposition parser, label enrichment
//! - `series` - flattening families into single-sample time series
//! - `remote` - remote-write protobuf encoding, snappy framing, HTTP client
//! - `scrape` - health probes and metrics scrapes of co-located services
//! - `registry` - the agent's own gauges (health, SMART, GPU)
//! - `orchestrator` - the gather cycle and its loop
//! - `config` - YAML configuration

pub mod collector;
pub mod config;
pub mod exposition;
pub mod orchestrator;
pub mod registry;
pub mod remote;
pub mod scrape;
pub mod series;
