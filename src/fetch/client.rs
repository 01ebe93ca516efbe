//! HTTP client abstraction
//!
//! The pipeline, robots gate and ingestors all fetch through the
//! `Fetcher` trait so tests can inject canned responses without a
//! network.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{CrawlError, Result};

/// A response as seen by the pipeline, before persistence
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub final_url: String,
    pub elapsed_ms: u64,
}

impl FetchedResponse {
    /// First header value matching `name` (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Retry-After` delay, if the header carries a delta-seconds value
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Body interpreted as UTF-8, lossily
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Capability to perform one HTTP GET
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`. Network-level failures map to `TransientNetwork`;
    /// HTTP error statuses are returned as responses, not errors, so the
    /// pipeline can apply its own status policy.
    async fn fetch(&self, url: &str) -> Result<FetchedResponse>;
}

/// Production fetcher over `reqwest`
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with crawl-appropriate defaults
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CrawlError::Internal(format!("build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResponse> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrawlError::TransientNetwork(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CrawlError::TransientNetwork(format!("{url}: body read: {e}")))?
            .to_vec();

        Ok(FetchedResponse {
            status,
            headers,
            body,
            final_url,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
