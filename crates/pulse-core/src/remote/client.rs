use std::path::PathBuf;
use std::time::Duration;

use prost::Message;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Client, Identity, Response, Url};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::proto;
use crate::series::TimeSeries;

const REMOTE_WRITE_VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";
const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// Longest rejection body kept for diagnostics.
const MAX_ERROR_BODY: usize = 4096;

#[derive(Debug, Error)]
pub enum RemoteWriteError {
    #[error("invalid remote write endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("failed to build remote write client: {0}")]
    Client(String),

    #[error("failed to encode write request: {0}")]
    Encode(String),

    #[error("write request of {size} bytes is too large to compress")]
    PayloadTooLarge { size: usize },

    #[error("remote write rejected with status {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("remote write cancelled")]
    Cancelled,

    #[error("remote write timed out")]
    Timeout,

    #[error("remote write transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for RemoteWriteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteWriteError::Timeout
        } else {
            RemoteWriteError::Transport(e)
        }
    }
}

/// PEM files for TLS to the remote store.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Extra root certificate to trust.
    pub ca_file: Option<PathBuf>,
    /// Client certificate; used together with `key_file`.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteWriteConfig {
    pub url: String,
    pub timeout: Duration,
    pub tls: Option<TlsConfig>,
    pub basic_auth: Option<BasicAuth>,
    /// Sent with every request, e.g. a tenant id.
    pub headers: Vec<(String, String)>,
}

impl RemoteWriteConfig {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            tls: None,
            basic_auth: None,
            headers: Vec::new(),
        }
    }
}

/// Client for one remote-write endpoint.
///
/// Each [`store`](Self::store) call is one HTTP request with one outcome;
/// there is no retry or buffering here.
#[derive(Debug, Clone)]
pub struct RemoteWriteClient {
    client: Client,
    url: Url,
    basic_auth: Option<BasicAuth>,
}

impl RemoteWriteClient {
    pub fn new(config: RemoteWriteConfig) -> Result<Self, RemoteWriteError> {
        let url = Url::parse(&config.url).map_err(|e| RemoteWriteError::InvalidEndpoint {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RemoteWriteError::InvalidEndpoint {
                url: config.url,
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RemoteWriteError::Client(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RemoteWriteError::Client(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(tls) = &config.tls {
            builder = apply_tls(builder, tls)?;
        }
        let client = builder
            .build()
            .map_err(|e| RemoteWriteError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url,
            basic_auth: config.basic_auth,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Ships `series` in a single request.
    ///
    /// `cancel` aborts the in-flight request and yields
    /// [`RemoteWriteError::Cancelled`]. The configured timeout yields
    /// [`RemoteWriteError::Timeout`].
    pub async fn store(
        &self,
        cancel: &CancellationToken,
        series: &[TimeSeries],
    ) -> Result<(), RemoteWriteError> {
        let body = encode_write_request(series)?;
        let size = body.len();

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_ENCODING, "snappy")
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header(REMOTE_WRITE_VERSION_HEADER, REMOTE_WRITE_VERSION)
            .body(body);
        if let Some(auth) = &self.basic_auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }

        let round_trip = async {
            let response = request.send().await?;
            classify(response).await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RemoteWriteError::Cancelled),
            result = round_trip => {
                if result.is_ok() {
                    debug!(endpoint = %self.url, series = series.len(), bytes = size, "remote write accepted");
                }
                result
            }
        }
    }
}

/// Serializes `series` into a `WriteRequest` and snappy-compresses it.
pub fn encode_write_request(series: &[TimeSeries]) -> Result<Vec<u8>, RemoteWriteError> {
    let request = proto::WriteRequest {
        timeseries: series.iter().map(proto::TimeSeries::from).collect(),
    };
    let raw = request.encode_to_vec();

    check_compress_bound(raw.len())?;
    snap::raw::Encoder::new()
        .compress_vec(&raw)
        .map_err(|e| RemoteWriteError::Encode(e.to_string()))
}

/// Snappy block lengths are a 32-bit varint; reject inputs whose worst-case
/// output could not be represented before trying.
fn check_compress_bound(size: usize) -> Result<(), RemoteWriteError> {
    if snap::raw::max_compress_len(size) == 0 {
        return Err(RemoteWriteError::PayloadTooLarge { size });
    }
    Ok(())
}

async fn classify(response: Response) -> Result<(), RemoteWriteError> {
    let status = response.status();
    if status.is_success() {
        response.bytes().await?;
        return Ok(());
    }

    let body = match response.bytes().await {
        Ok(bytes) => {
            let end = bytes.len().min(MAX_ERROR_BODY);
            String::from_utf8_lossy(&bytes[..end]).trim().to_string()
        }
        Err(e) => format!("<failed to read body: {e}>"),
    };
    Err(RemoteWriteError::RemoteRejected {
        status: status.as_u16(),
        body,
    })
}

fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> Result<reqwest::ClientBuilder, RemoteWriteError> {
    let read = |path: &PathBuf| {
        std::fs::read(path)
            .map_err(|e| RemoteWriteError::Client(format!("{}: {e}", path.display())))
    };

    if let Some(ca) = &tls.ca_file {
        let cert = Certificate::from_pem(&read(ca)?)
            .map_err(|e| RemoteWriteError::Client(format!("{}: {e}", ca.display())))?;
        builder = builder.add_root_certificate(cert);
    }

    match (&tls.cert_file, &tls.key_file) {
        (Some(cert), Some(key)) => {
            let mut pem = read(cert)?;
            pem.push(b'\n');
            pem.extend(read(key)?);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| RemoteWriteError::Client(format!("client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(RemoteWriteError::Client(
                "client certificate and key must be given together".to_string(),
            ));
        }
    }

    Ok(builder.danger_accept_invalid_certs(tls.insecure_skip_verify))
}
