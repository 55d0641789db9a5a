//! Command-line argument parsing for ZIM Fetcher
//!
//! This module defines the CLI structure using clap derive macros: starting,
//! resuming and cancelling archive downloads, inspecting their state, and
//! maintaining the catalog and its icons.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// ZIM Fetcher - resumable downloads of offline content archives
#[derive(Parser, Debug)]
#[command(
    name = "zim_fetcher",
    version,
    about = "Download large offline-content archives with pause and resume",
    long_about = "Downloads multi-gigabyte archives over unreliable networks.
Transfers can be paused with Ctrl-C and resumed later without losing received bytes."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data directory (catalog, state, archives)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a fresh download of a catalog item
    Download(DownloadArgs),

    /// Continue a paused or interrupted download
    Resume(ResumeArgs),

    /// Stop a download and delete its partial data
    Cancel(ItemArgs),

    /// Show the state of tracked downloads
    Status(StatusArgs),

    /// Fetch missing catalog icons
    Icons(IconsArgs),

    /// Manage catalog entries
    Catalog(CatalogArgs),

    /// Check network reachability and an item's server
    Probe(ProbeArgs),
}

/// Arguments for the download command
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Catalog identifier
    pub identifier: String,

    /// Override the catalog URL
    #[arg(long)]
    pub url: Option<String>,

    /// Refuse transfers on metered connections
    #[arg(long)]
    pub no_metered: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the resume command
#[derive(Args, Debug, Clone)]
pub struct ResumeArgs {
    /// Catalog identifier
    pub identifier: String,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// A single catalog identifier
#[derive(Args, Debug, Clone)]
pub struct ItemArgs {
    /// Catalog identifier
    pub identifier: String,
}

/// Arguments for the status command
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Show only this item
    pub identifier: Option<String>,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the icons command
#[derive(Args, Debug, Clone)]
pub struct IconsArgs {
    /// Fetch at most this many icons
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for catalog management
#[derive(Args, Debug)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub action: CatalogAction,
}

/// Catalog management actions
#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// Add or replace an entry
    Add {
        /// Catalog identifier
        identifier: String,

        /// Archive or `.meta4` descriptor URL
        url: String,

        /// Expected size in bytes
        #[arg(long, default_value = "0")]
        size: u64,

        /// Human-readable title
        #[arg(long)]
        name: Option<String>,

        /// Icon URL
        #[arg(long)]
        icon_url: Option<String>,
    },

    /// List entries
    List,

    /// Remove an entry
    Remove {
        /// Catalog identifier
        identifier: String,
    },
}

/// Arguments for the probe command
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Also send a HEAD request to this item's URL
    pub identifier: Option<String>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level from the flags, else the configured level
    pub fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        if self.global.quiet {
            "error"
        } else if self.global.very_verbose {
            "debug"
        } else if self.global.verbose {
            "info"
        } else {
            configured
        }
    }
}

impl DownloadArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.identifier.trim().is_empty() {
            return Err("Identifier cannot be empty".to_string());
        }

        if let Some(url) = &self.url {
            url::Url::parse(url).map_err(|e| format!("Invalid URL {}: {}", url, e))?;
        }

        Ok(())
    }
}
