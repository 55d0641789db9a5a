//! Rate-limited short HTTP requests
//!
//! Used for icon downloads and for the HEAD pre-flight probe. Archive bodies
//! go through the transport instead.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::header::{ACCEPT_RANGES, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::errors::{DownloadError, DownloadResult};

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// Result of a HEAD pre-flight check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Status of the HEAD response, `None` when the request failed
    pub status: Option<u16>,
    pub content_length: Option<u64>,
    pub accepts_ranges: bool,
}

impl ProbeReport {
    /// Only a 2xx answer counts
    pub fn is_available(&self) -> bool {
        matches!(self.status, Some(status) if (200..300).contains(&status))
    }

    pub fn is_resumable(&self) -> bool {
        self.is_available() && self.accepts_ranges
    }
}

/// HTTP operations handler with rate limiting
#[derive(Debug)]
pub struct HttpHandler {
    client: Client,
    rate_limiter: DirectRateLimiter,
}

impl HttpHandler {
    /// Creates a new HttpHandler with the given client and rate limit
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::ConfigurationError` if the rate is zero
    pub fn new(client: Client, rate_limit_rps: u32) -> DownloadResult<Self> {
        let rate_limiter = Self::build_rate_limiter(rate_limit_rps)?;
        Ok(Self {
            client,
            rate_limiter,
        })
    }

    fn build_rate_limiter(rate_limit_rps: u32) -> DownloadResult<DirectRateLimiter> {
        let rate = NonZeroU32::new(rate_limit_rps).ok_or_else(|| DownloadError::ConfigurationError {
            reason: "Rate limit must be non-zero".to_string(),
        })?;
        Ok(RateLimiter::direct(Quota::per_second(rate)))
    }

    async fn throttle(&self) {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;
    }

    /// GET a small resource and return its body with its content type
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::ServerError` for anything but `200 OK`
    pub async fn get_bytes(&self, url: &Url) -> DownloadResult<(Vec<u8>, Option<String>)> {
        self.throttle().await;

        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::ServerError {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok((bytes.to_vec(), content_type))
    }

    /// HEAD the URL; network errors produce an unavailable report
    pub async fn probe(&self, url: &Url) -> ProbeReport {
        self.throttle().await;

        match self.client.head(url.as_str()).send().await {
            Ok(response) => {
                let accepts_ranges = response
                    .headers()
                    .get(ACCEPT_RANGES)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.eq_ignore_ascii_case("bytes"))
                    .unwrap_or(false);
                ProbeReport {
                    status: Some(response.status().as_u16()),
                    content_length: response.content_length(),
                    accepts_ranges,
                }
            }
            Err(e) => {
                debug!("Probe of {} failed: {}", url, e);
                ProbeReport::default()
            }
        }
    }

    /// Get a reference to the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}
