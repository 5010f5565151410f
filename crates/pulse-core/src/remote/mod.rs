//! Shipping time series to a remote store over the remote-write protocol.

mod client;
pub mod proto;

pub use client::{
    BasicAuth, RemoteWriteClient, RemoteWriteConfig, RemoteWriteError, TlsConfig,
    encode_write_request,
};
