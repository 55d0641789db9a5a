//! ZIM Fetcher Library
//!
//! Resumable background downloads of large offline-content archives, with
//! durable per-item state, pause/resume/cancel at any point, and a batched
//! icon fetcher for catalog entries.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
