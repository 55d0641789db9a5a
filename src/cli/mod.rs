//! Command-line interface components
//!
//! This module contains CLI-specific code for the ZIM Fetcher application,
//! including argument parsing, service wiring, progress display, and the
//! command handlers.

pub mod args;
pub mod commands;
pub mod context;
pub mod progress;

pub use args::{
    CatalogAction, CatalogArgs, Cli, Commands, DownloadArgs, GlobalArgs, IconsArgs, ItemArgs,
    ProbeArgs, ResumeArgs, StatusArgs,
};
pub use commands::{
    handle_cancel, handle_catalog, handle_download, handle_icons, handle_probe, handle_resume,
    handle_status,
};
pub use context::AppContext;
pub use progress::{ProgressConfig, ProgressDisplay, describe_outcome};
