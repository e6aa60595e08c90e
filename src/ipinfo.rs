//! HTTP client for the ipinfo lookup service.
//!
//! Defines the remote-fetch boundary used by IP enrichment. Failures are
//! classified so the retry loop can branch without inspecting error types:
//! a rate-limit response is non-retryable, everything else is transient.

use crate::config::IpInfoConfig;
use crate::schemas::IpInfo;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    /// The service refused the request due to volume. Never retried.
    #[error("rate limited by lookup service")]
    RateLimited,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(u16),
}

impl FetchError {
    /// Rate-limit responses are the only non-retryable classification.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

/// Remote lookup boundary: one IP in, one metadata record out.
#[async_trait]
pub trait IpInfoClient: Send + Sync {
    async fn fetch(&self, ip: &str) -> Result<IpInfo, FetchError>;
}

/// reqwest-backed client for the ipinfo API.
pub struct IpInfoApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl IpInfoApiClient {
    pub fn new(config: &IpInfoConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn lookup_url(&self, ip: &str) -> String {
        format!("{}/{}", self.base_url, ip)
    }
}

#[async_trait]
impl IpInfoClient for IpInfoApiClient {
    async fn fetch(&self, ip: &str) -> Result<IpInfo, FetchError> {
        debug!("ipinfo lookup: {}", ip);

        let response = self
            .client
            .get(self.lookup_url(ip))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let info: IpInfo = response.json().await?;
        Ok(info)
    }
}
