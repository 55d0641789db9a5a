//! HTTP client configuration and building logic
//!
//! Two clients are built from one configuration: a short-request client with
//! an overall timeout for icons and probes, and a transfer client with only a
//! connect timeout, since archive bodies can stream for hours.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants::http;
use crate::errors::{DownloadError, DownloadResult};

/// Configuration for HTTP clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Enable HTTP/2 adaptive windows
    pub http2: bool,
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of idle connections per host
    pub pool_max_per_host: usize,
    /// Overall timeout for short requests
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Rate limit for short requests (requests per second)
    pub rate_limit_rps: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http2: false,
            tcp_keepalive: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            rate_limit_rps: http::DEFAULT_RATE_LIMIT_RPS,
        }
    }
}

impl ClientConfig {
    /// Client for icons and HEAD probes
    pub fn build_http_client(&self) -> DownloadResult<Client> {
        self.builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(DownloadError::Http)
    }

    /// Client for archive bodies, without an overall deadline
    pub fn build_transfer_client(&self) -> DownloadResult<Client> {
        self.builder().build().map_err(DownloadError::Http)
    }

    fn builder(&self) -> reqwest::ClientBuilder {
        let mut client_builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(http::MAX_REDIRECTS))
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if self.http2 {
            client_builder = client_builder.http2_adaptive_window(true);
        }

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder
    }
}
