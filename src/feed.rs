// Upstream BODS datafeed access.

use bytes::Bytes;
use futures_util::future::try_join_all;
use std::future::Future;
use tracing::debug;
use url::form_urlencoded;

use crate::config::Config;
use crate::error::{Result, TrackerError};

/// Anything that can hand back the raw documents for one refresh cycle.
pub trait FeedSource: Send + Sync + 'static {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Bytes>>> + Send;
}

#[derive(Debug, Clone)]
struct FeedEndpoint {
    /// Safe to log; the real URL carries the API key.
    label: String,
    url: String,
}

pub struct FeedClient {
    client: reqwest::Client,
    endpoints: Vec<FeedEndpoint>,
}

/// Appends `target` to the relay prefix as a single encoded query component.
pub fn relay_url(prefix: Option<&str>, target: &str) -> String {
    match prefix {
        Some(prefix) => {
            let encoded: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
            format!("{prefix}{encoded}")
        }
        None => target.to_string(),
    }
}

impl FeedClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let endpoints = config
            .feed_ids
            .iter()
            .zip(config.feed_urls())
            .map(|(id, url)| FeedEndpoint {
                label: format!("datafeed {id}"),
                url: relay_url(config.relay_prefix.as_deref(), &url),
            })
            .collect();

        Ok(Self { client, endpoints })
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    async fn fetch_one(&self, endpoint: &FeedEndpoint) -> Result<Bytes> {
        let response = self.client.get(&endpoint.url).send().await?;

        if !response.status().is_success() {
            return Err(TrackerError::Status {
                feed: endpoint.label.clone(),
                status: response.status(),
            });
        }

        let body = response.bytes().await?;
        debug!("Fetched {} KB from {}", body.len() / 1024, endpoint.label);
        Ok(body)
    }
}

impl FeedSource for FeedClient {
    async fn fetch_all(&self) -> Result<Vec<Bytes>> {
        try_join_all(self.endpoints.iter().map(|endpoint| self.fetch_one(endpoint))).await
    }
}
