use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid product url: {0}")]
    Url(String),

    #[error("invalid product code {0:?}")]
    InvalidCode(String),
}

/// Trim a product code and check it is a plain run of ASCII digits, the only
/// form the shop uses. Anything else could resolve outside the product path.
pub fn normalise_code(raw: &str) -> Result<&str, FetchError> {
    let code = raw.trim();
    if !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(code)
    } else {
        Err(FetchError::InvalidCode(raw.to_string()))
    }
}

/// Retrieves the raw product page for one product code.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, code: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    inner: reqwest::Client,
    base_url: Url,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base url {:?}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Base url {:?} cannot take a path", config.base_url);
        }

        Ok(Self {
            inner,
            base_url,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    /// Base url with the code appended as a single path segment.
    pub fn product_url(&self, code: &str) -> Result<Url, FetchError> {
        let code = normalise_code(code)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .push(code);
        Ok(url)
    }

    async fn get_once(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, code: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.product_url(code)?;
        let strategy = FixedInterval::from_millis(self.retry_delay_ms).take(self.max_retries);

        RetryIf::start(
            strategy,
            || self.get_once(&url),
            |e: &FetchError| {
                let retry = matches!(e, FetchError::Request(_));
                if retry {
                    warn!("{}: {}, retrying", url, e);
                }
                retry
            },
        )
        .await
    }
}
