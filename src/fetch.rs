//! HTTP retrieval with bounded retries and linear backoff.
//!
//! # Architecture
//!
//! - [`Fetch`]: one raw GET, no retries
//! - [`HttpFetch`]: the reqwest-backed transport
//! - [`RetryFetch`]: decorator that retries any [`Fetch`] implementation and
//!   optionally decodes the body as JSON inside each attempt
//!
//! # Retry Strategy
//!
//! - Up to `max_retries` attempts (at least one)
//! - Transport errors, non-2xx statuses and JSON decode errors are all retryable
//! - The wait after attempt `n` is `backoff * n`
//! - Exhausting the attempts yields [`CrawlError::Fetch`] with the last error

use crate::error::{BoxError, CrawlError};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// A single GET request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        FetchRequest {
            url: url.into(),
            ..FetchRequest::default()
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn query(mut self, params: Vec<(String, String)>) -> Self {
        self.query = params;
        self
    }
}

/// Transport performing one attempt of a request.
pub trait Fetch {
    /// Fetch the response body as text. Non-success statuses are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<String, BoxError>;
}

/// reqwest transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetch {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Fetch for HttpFetch {
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: &FetchRequest) -> Result<String, BoxError> {
        let mut builder = self.client.get(&request.url);
        if !self.timeout.is_zero() {
            builder = builder.timeout(self.timeout);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await?.error_for_status()?;
        let body = response.text().await?;
        debug!(bytes = body.len(), "Fetched response body");
        Ok(body)
    }
}

/// Adds retry with linear backoff to any [`Fetch`] implementation.
pub struct RetryFetch<T> {
    inner: T,
    max_retries: u32,
    backoff: Duration,
}

impl<T: Fetch> RetryFetch<T> {
    /// `max_retries` below 1 still makes a single attempt.
    pub fn new(inner: T, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries: max_retries.max(1),
            backoff,
        }
    }

    /// Fetch the body as text.
    pub async fn text(&self, request: &FetchRequest) -> Result<String, CrawlError> {
        self.retrieve(request, Ok).await
    }

    /// Fetch the body and decode it as JSON; a decode error counts as a failed attempt.
    pub async fn json(&self, request: &FetchRequest) -> Result<Value, CrawlError> {
        self.retrieve(request, |body| {
            serde_json::from_str::<Value>(&body).map_err(BoxError::from)
        })
        .await
    }

    #[instrument(level = "info", skip_all, fields(url = %request.url))]
    async fn retrieve<O, F>(&self, request: &FetchRequest, decode: F) -> Result<O, CrawlError>
    where
        F: Fn(String) -> Result<O, BoxError>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.inner.fetch(request).await.and_then(&decode) {
                Ok(out) => return Ok(out),
                Err(e) => e,
            };

            if attempt >= self.max_retries {
                error!(
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %err,
                    "fetch exhausted retries"
                );
                return Err(CrawlError::Fetch {
                    url: request.url.clone(),
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.backoff.saturating_mul(attempt);
            warn!(
                attempt,
                max = self.max_retries,
                ?delay,
                error = %err,
                "fetch attempt failed; backing off"
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// The fetcher adapters share during a run.
pub type Fetcher = RetryFetch<HttpFetch>;

impl Fetcher {
    pub fn http(timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        RetryFetch::new(HttpFetch::new(timeout), max_retries, backoff)
    }
}
