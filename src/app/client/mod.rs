//! HTTP client construction and rate-limited short requests

pub mod config;
pub mod http;

pub use config::ClientConfig;
pub use http::{HttpHandler, ProbeReport};
