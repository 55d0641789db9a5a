//! ZIM Fetcher CLI application
//!
//! Command-line interface for resumable downloads of offline-content archives.
//! Transfers survive interruptions and process restarts and can be paused with
//! Ctrl-C.

use std::process;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use zim_fetcher::cli::{
    Cli, Commands, handle_cancel, handle_catalog, handle_download, handle_icons, handle_probe,
    handle_resume, handle_status,
};
use zim_fetcher::config::AppConfig;
use zim_fetcher::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    let first_run = AppConfig::initialize_first_run().await;
    let mut config = AppConfig::load(cli.global.config.clone()).await?;
    if let Some(data_dir) = &cli.global.data_dir {
        config.storage.data_dir = Some(data_dir.clone());
    }

    init_logging(&cli, &config.logging.level);

    if let Err(e) = first_run {
        warn!("Could not create default configuration: {}", e);
    }
    info!("ZIM Fetcher v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Download(args) => handle_download(config, args).await,
        Commands::Resume(args) => handle_resume(config, args).await,
        Commands::Cancel(args) => handle_cancel(config, args).await,
        Commands::Status(args) => handle_status(config, args).await,
        Commands::Icons(args) => handle_icons(config, args).await,
        Commands::Catalog(args) => handle_catalog(config, args).await,
        Commands::Probe(args) => handle_probe(config, args).await,
    }
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(cli: &Cli, configured: &str) {
    let log_level = cli.log_level(configured);

    let mut filter = EnvFilter::from_default_env();
    match format!("zim_fetcher={}", log_level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring log level {:?}: {}", log_level, e),
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .with_writer(std::io::stderr)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
