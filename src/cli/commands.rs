//! Command handlers for ZIM Fetcher CLI
//!
//! This module implements the command handlers that connect CLI arguments to
//! the download subsystem: a transfer runs in the foreground with a progress
//! display, and Ctrl-C pauses it so a later `resume` continues where it stopped.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use indicatif::HumanBytes;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::coordinator::signals::{SignalHandler, create_shutdown_channel};
use crate::app::{
    Catalog, CatalogEntry, ConnectivityProbe, HttpIconSource, IconFetcher, ItemStatus,
    TransferHandle, TransferOutcome, strip_metadata_suffix,
};
use crate::cli::args::{
    CatalogAction, CatalogArgs, DownloadArgs, IconsArgs, ItemArgs, ProbeArgs, ResumeArgs,
    StatusArgs,
};
use crate::cli::context::{AppContext, http_handler, open_catalog};
use crate::cli::progress::{ProgressConfig, ProgressDisplay};
use crate::config::AppConfig;
use crate::constants::coordinator::PAUSE_ACK_TIMEOUT;
use crate::errors::{AppError, DownloadError, Result};

/// Handle the download command
///
/// Starts a fresh transfer of a catalog item, discarding any paused progress,
/// and follows it until it finishes or the user interrupts it.
pub async fn handle_download(config: AppConfig, args: DownloadArgs) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    let mut ctx = AppContext::build(config).await?;
    let Some(entry) = ctx.catalog.entry(&args.identifier) else {
        ctx.shutdown().await;
        return Err(DownloadError::UnknownItem {
            identifier: args.identifier,
        }
        .into());
    };

    let url = match &args.url {
        Some(raw) => Url::parse(raw).map_err(|e| DownloadError::InvalidUrl {
            url: raw.clone(),
            error: e.to_string(),
        })?,
        None => entry.url()?,
    };

    preflight(&ctx, &entry, &url).await;
    ctx.start_monitoring();

    let handle = match ctx
        .coordinator
        .start(&entry.identifier, &url, !args.no_metered)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            ctx.shutdown().await;
            return Err(e.into());
        }
    };

    let mut display = ProgressDisplay::new(progress_config(args.no_progress), entry.title());
    display.start(entry.expected_size, 0)?;
    follow(ctx, handle, display).await
}

/// Handle the resume command
pub async fn handle_resume(config: AppConfig, args: ResumeArgs) -> Result<()> {
    let mut ctx = AppContext::build(config).await?;
    let record = ctx.store.get(&args.identifier).await;
    let title = ctx
        .catalog
        .entry(&args.identifier)
        .map(|entry| entry.title().to_string())
        .unwrap_or_else(|| args.identifier.clone());

    ctx.start_monitoring();
    let handle = match ctx.coordinator.resume(&args.identifier).await {
        Ok(handle) => handle,
        Err(e) => {
            if let Some(message) = record.as_ref().and_then(|r| r.last_error.as_deref()) {
                println!("Last attempt failed: {}", message);
                println!("Run `zim_fetcher download {}` to start over.", args.identifier);
            }
            ctx.shutdown().await;
            return Err(e.into());
        }
    };

    let (expected, downloaded) = record
        .map(|r| (r.bytes_expected, r.bytes_downloaded))
        .unwrap_or_default();
    let mut display = ProgressDisplay::new(progress_config(args.no_progress), title);
    display.start(expected, downloaded)?;
    follow(ctx, handle, display).await
}

/// Handle the cancel command
pub async fn handle_cancel(config: AppConfig, args: ItemArgs) -> Result<()> {
    let ctx = AppContext::build(config).await?;
    let known = ctx.store.get(&args.identifier).await.is_some();
    ctx.coordinator.cancel(&args.identifier).await;

    if known {
        println!("🗑  Cancelled {}", args.identifier);
    } else {
        println!("Nothing to cancel for {}", args.identifier);
    }
    ctx.shutdown().await;
    Ok(())
}

/// Handle the status command
pub async fn handle_status(config: AppConfig, args: StatusArgs) -> Result<()> {
    let ctx = AppContext::build(config).await?;
    let network = ctx.refresh_reachability().await;

    let statuses: Vec<ItemStatus> = ctx
        .coordinator
        .statuses()
        .await
        .into_iter()
        .filter(|status| {
            args.identifier
                .as_deref()
                .map_or(true, |id| status.identifier == id)
        })
        .collect();

    if args.json {
        let mut items = Vec::with_capacity(statuses.len());
        for status in &statuses {
            let last_error = ctx
                .store
                .get(&status.identifier)
                .await
                .and_then(|record| record.last_error);
            items.push(serde_json::json!({
                "identifier": status.identifier,
                "bytesDownloaded": status.bytes_downloaded,
                "bytesExpected": status.bytes_expected,
                "state": status.state.to_string(),
                "canResume": status.state.can_resume(),
                "lastError": last_error,
            }));
        }
        let document = serde_json::json!({
            "generatedAt": Utc::now().to_rfc3339(),
            "network": network.to_string(),
            "items": items,
        });
        let text = serde_json::to_string_pretty(&document).map_err(|e| {
            AppError::generic(format!("Failed to serialize status: {}", e))
        })?;
        println!("{}", text);
    } else if statuses.is_empty() {
        println!("No tracked downloads");
    } else {
        println!("Network: {}", network);
        for status in &statuses {
            println!("{}", format_status(status));
        }
    }

    ctx.shutdown().await;
    Ok(())
}

/// Handle the icons command
pub async fn handle_icons(config: AppConfig, args: IconsArgs) -> Result<()> {
    let runtime = config.to_runtime_config();
    let catalog = open_catalog(&runtime).await?;
    let handler = http_handler(&runtime)?;

    let mut entries = catalog.missing_icons();
    if let Some(limit) = args.limit {
        entries.truncate(limit);
    }
    if entries.is_empty() {
        println!("All catalog icons are present");
        return Ok(());
    }

    info!("Fetching {} icons", entries.len());
    let fetcher = IconFetcher::new(
        runtime.icons.clone(),
        Arc::new(HttpIconSource::new(handler)),
        catalog.clone(),
    );
    let requested = entries.len();
    let fetched = fetcher.fetch_missing(entries).await;

    println!("Fetched {} of {} icons", fetched, requested);
    if fetcher.pending() > 0 {
        warn!("{} icons could not be saved", fetcher.pending());
    }
    Ok(())
}

/// Handle catalog management
pub async fn handle_catalog(config: AppConfig, args: CatalogArgs) -> Result<()> {
    let runtime = config.to_runtime_config();
    let catalog = open_catalog(&runtime).await?;

    match args.action {
        CatalogAction::Add {
            identifier,
            url,
            size,
            name,
            icon_url,
        } => {
            Url::parse(&url).map_err(|e| DownloadError::InvalidUrl {
                url: url.clone(),
                error: e.to_string(),
            })?;

            let mut entry = CatalogEntry::new(&identifier, url, size);
            if let Some(name) = name {
                entry = entry.with_display_name(name);
            }
            if let Some(icon_url) = icon_url {
                entry = entry.with_icon_url(icon_url);
            }
            catalog.insert(entry);
            catalog.save().await?;
            println!("Added {}", identifier);
        }
        CatalogAction::List => {
            let entries = catalog.list();
            if entries.is_empty() {
                println!("Catalog is empty");
            }
            for entry in entries {
                let size = if entry.expected_size > 0 {
                    HumanBytes(entry.expected_size).to_string()
                } else {
                    "unknown size".to_string()
                };
                let icon = if entry.icon.is_some() { " [icon]" } else { "" };
                println!("{:<32} {:>12}  {}{}", entry.identifier, size, entry.title(), icon);
            }
        }
        CatalogAction::Remove { identifier } => {
            if catalog.remove(&identifier).is_none() {
                return Err(DownloadError::UnknownItem { identifier }.into());
            }
            catalog.save().await?;
            println!("Removed {}", identifier);
        }
    }
    Ok(())
}

/// Handle the probe command
pub async fn handle_probe(config: AppConfig, args: ProbeArgs) -> Result<()> {
    let reach = &config.reachability;
    if reach.probe().is_reachable().await {
        println!("🌐 Network reachable ({}:{})", reach.probe_host, reach.probe_port);
    } else {
        println!("📴 Network unreachable ({}:{})", reach.probe_host, reach.probe_port);
    }

    let Some(identifier) = args.identifier else {
        return Ok(());
    };

    let runtime = config.to_runtime_config();
    let catalog = open_catalog(&runtime).await?;
    let Some(entry) = catalog.entry(&identifier) else {
        return Err(DownloadError::UnknownItem { identifier }.into());
    };

    let url = strip_metadata_suffix(&entry.url()?);
    let report = http_handler(&runtime)?.probe(&url).await;
    match report.status {
        Some(status) => println!("{}: HTTP {}", url, status),
        None => println!("{}: no response", url),
    }
    if let Some(length) = report.content_length {
        println!("  Size: {}", HumanBytes(length));
    }
    println!(
        "  Resumable: {}",
        if report.is_resumable() { "yes" } else { "no" }
    );
    Ok(())
}

/// HEAD check before a fresh start; problems are only reported
async fn preflight(ctx: &AppContext, entry: &CatalogEntry, url: &Url) {
    let handler = match http_handler(&ctx.runtime) {
        Ok(handler) => handler,
        Err(e) => {
            debug!("Skipping pre-flight check: {}", e);
            return;
        }
    };

    let report = handler.probe(&strip_metadata_suffix(url)).await;
    if !report.is_available() {
        warn!("Pre-flight check of {} failed: {:?}", entry.identifier, report.status);
    } else if !report.is_resumable() {
        warn!(
            "Server for {} does not accept byte ranges; pausing will restart from zero",
            entry.identifier
        );
    }
    if let (Some(length), true) = (report.content_length, entry.expected_size > 0) {
        if length != entry.expected_size {
            debug!(
                "Catalog size of {} is {} but server reports {}",
                entry.identifier, entry.expected_size, length
            );
        }
    }
}

/// Follow a transfer in the foreground, then shut the services down
async fn follow(ctx: AppContext, handle: TransferHandle, mut display: ProgressDisplay) -> Result<()> {
    let identifier = handle.identifier().to_string();
    let outcome = run_transfer(&ctx, handle, &mut display).await;
    display.finish(&outcome);
    ctx.shutdown().await;

    match outcome {
        TransferOutcome::Failed { message } => Err(AppError::generic(format!(
            "Download of {} failed: {}",
            identifier, message
        ))),
        TransferOutcome::Detached => Err(AppError::generic(format!(
            "Lost track of {}; run `status` to inspect it",
            identifier
        ))),
        _ => Ok(()),
    }
}

/// Drive the progress display until the attempt ends
///
/// Ctrl-C asks the coordinator to pause and waits for the acknowledgement.
async fn run_transfer(
    ctx: &AppContext,
    handle: TransferHandle,
    display: &mut ProgressDisplay,
) -> TransferOutcome {
    let identifier = handle.identifier().to_string();
    let (mut progress, mut result) = handle.into_parts();

    let (interrupt_tx, mut interrupt_rx) = create_shutdown_channel();
    let signals = SignalHandler::new(interrupt_tx).setup();
    let mut progress_open = true;

    let outcome = loop {
        tokio::select! {
            outcome = &mut result => break outcome,
            update = progress.next(), if progress_open => match update {
                Some(update) => display.update(update),
                None => progress_open = false,
            },
            _ = interrupt_rx.recv() => {
                println!("\nPausing {}...", identifier);
                if !ctx.coordinator.pause(&identifier).await {
                    debug!("Pause of {} was not requested", identifier);
                }
                break match tokio::time::timeout(PAUSE_ACK_TIMEOUT, &mut result).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("Transport did not confirm the pause of {}", identifier);
                        TransferOutcome::Interrupted {
                            message: "Pause was not confirmed".to_string(),
                        }
                    }
                };
            }
        }
    };

    signals.abort();
    outcome
}

fn progress_config(no_progress: bool) -> ProgressConfig {
    ProgressConfig {
        enable_progress_bars: !no_progress,
        ..ProgressConfig::default()
    }
}

/// One status line for the listing
pub fn format_status(status: &ItemStatus) -> String {
    let amount = match status.percent() {
        Some(percent) => format!(
            "{} of {} ({:.1}%)",
            HumanBytes(status.bytes_downloaded),
            HumanBytes(status.bytes_expected),
            percent
        ),
        None => HumanBytes(status.bytes_downloaded).to_string(),
    };
    format!("{:<32} {}  [{}]", status.identifier, amount, status.state)
}
