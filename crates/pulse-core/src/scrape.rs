//! HTTP scraping of co-located services.
//!
//! Health probes only look at the status code. Metrics scrapes return the
//! payload parsed into families, optionally after stripping the comment
//! lines some services emit more than once.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collector::CollectError;
use crate::exposition::{MetricFamily, parse_families, strip_metadata_comments};

/// An endpoint to scrape plus labels describing where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScrapeTarget {
    pub url: String,
    /// Added to every scraped metric that lacks them (`pod`, `namespace`, ...).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Supplies scrape targets for the `pods` collector.
pub trait TargetDiscovery: Send + Sync {
    fn targets(&self) -> Result<Vec<ScrapeTarget>, CollectError>;
}

/// A fixed target list, usually from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    targets: Vec<ScrapeTarget>,
}

impl StaticDiscovery {
    pub fn new(targets: Vec<ScrapeTarget>) -> Self {
        Self { targets }
    }
}

impl TargetDiscovery for StaticDiscovery {
    fn targets(&self) -> Result<Vec<ScrapeTarget>, CollectError> {
        Ok(self.targets.clone())
    }
}

/// HTTP client for probes and scrapes.
///
/// Idle connections are not pooled: targets are hit once per cycle and a
/// long-running agent should not hold sockets to each of them in between.
#[derive(Debug, Clone)]
pub struct Scraper {
    client: reqwest::Client,
}

impl Scraper {
    pub fn new(timeout: Duration) -> Result<Self, CollectError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| CollectError::Config(format!("failed to build scrape client: {e}")))?;
        Ok(Self { client })
    }

    /// `true` if `url` answers with a 2xx status within the timeout.
    ///
    /// The only error is [`CollectError::Cancelled`]; a cancelled probe has
    /// no verdict.
    pub async fn probe(&self, cancel: &CancellationToken, url: &str) -> Result<bool, CollectError> {
        let request = self.client.get(url).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollectError::Cancelled),
            response = request => response,
        };

        match response {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                debug!(endpoint = %url, status = %response.status(), "health probe failed");
                Ok(false)
            }
            Err(e) => {
                debug!(endpoint = %url, error = %e, "health probe failed");
                Ok(false)
            }
        }
    }

    /// Fetches a payload; any non-2xx status is an error.
    pub async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<Bytes, CollectError> {
        let round_trip = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| CollectError::scrape(url, e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(CollectError::scrape(url, format!("unexpected status {status}")));
            }

            response
                .bytes()
                .await
                .map_err(|e| CollectError::scrape(url, e.to_string()))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CollectError::Cancelled),
            result = round_trip => result,
        }
    }

    /// Fetches and parses an exposition payload.
    pub async fn scrape_families(
        &self,
        cancel: &CancellationToken,
        url: &str,
        strip_metadata: bool,
    ) -> Result<Vec<MetricFamily>, CollectError> {
        let payload = self.fetch(cancel, url).await?;
        let families = if strip_metadata {
            parse_families(&strip_metadata_comments(&payload))?
        } else {
            parse_families(&payload)?
        };
        debug!(endpoint = %url, families = families.len(), "scraped");
        Ok(families)
    }
}
