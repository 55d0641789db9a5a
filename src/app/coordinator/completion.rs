//! Completion hooks
//!
//! On success the finished file is moved into the content directory and the
//! content store and notifier are told about it. Terminal failures only reach
//! the notifier.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::transport::DownloadedFile;
use crate::constants::transfer::FALLBACK_EXTENSION;
use crate::errors::{DownloadError, DownloadResult};

/// Receives finished archives
pub trait ContentStore: Send + Sync {
    fn content_ready(&self, identifier: &str, path: &Path);
}

/// User-visible notifications
pub trait Notifier: Send + Sync {
    /// Best effort; must not block
    fn request_permission(&self) {}

    fn download_completed(&self, identifier: &str, title: &str);

    /// Terminal failure the user may retry with a fresh start
    fn download_failed(&self, identifier: &str, description: &str);
}

/// Notifier that writes to the log
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn download_completed(&self, identifier: &str, title: &str) {
        info!("Download complete: {} is ready ({})", title, identifier);
    }

    fn download_failed(&self, identifier: &str, description: &str) {
        error!("Download of {} failed: {}", identifier, description);
    }
}

/// Content store that only logs where archives landed
#[derive(Debug, Default)]
pub struct LoggingContentStore;

impl ContentStore for LoggingContentStore {
    fn content_ready(&self, identifier: &str, path: &Path) {
        info!("{} available at {}", identifier, path.display());
    }
}

/// Relocation and notification on terminal events
pub struct CompletionHooks {
    content_dir: PathBuf,
    content_store: Arc<dyn ContentStore>,
    notifier: Arc<dyn Notifier>,
}

impl CompletionHooks {
    pub fn new(
        content_dir: impl Into<PathBuf>,
        content_store: Arc<dyn ContentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            content_dir: content_dir.into(),
            content_store,
            notifier,
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Move the file into place and announce it
    ///
    /// Relocation errors are logged and reported as `None`; the transfer still
    /// counts as successful.
    pub async fn succeeded(
        &self,
        identifier: &str,
        title: &str,
        file: Option<&DownloadedFile>,
    ) -> Option<PathBuf> {
        let path = match file {
            Some(file) => match self.relocate(identifier, file).await {
                Ok(path) => {
                    self.content_store.content_ready(identifier, &path);
                    Some(path)
                }
                Err(e) => {
                    error!("Could not move finished download {}: {}", identifier, e);
                    None
                }
            },
            None => {
                error!("Transfer of {} succeeded without a file", identifier);
                None
            }
        };
        self.notifier.download_completed(identifier, title);
        path
    }

    pub fn failed(&self, identifier: &str, description: &str) {
        self.notifier.download_failed(identifier, description);
    }

    /// Move `file` to its final name, replacing any stale copy
    pub async fn relocate(&self, identifier: &str, file: &DownloadedFile) -> DownloadResult<PathBuf> {
        let destination = self
            .content_dir
            .join(destination_name(identifier, file));
        let relocation_failed = |source: std::io::Error| DownloadError::RelocationFailed {
            from: file.path.clone(),
            to: destination.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.content_dir)
            .await
            .map_err(relocation_failed)?;

        match tokio::fs::remove_file(&destination).await {
            Ok(()) => debug!("Replacing existing {}", destination.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(relocation_failed(e)),
        }

        if let Err(e) = tokio::fs::rename(&file.path, &destination).await {
            // Across file systems rename fails; fall back to copy and delete
            debug!("Rename of {} failed ({}), copying", file.path.display(), e);
            tokio::fs::copy(&file.path, &destination)
                .await
                .map_err(relocation_failed)?;
            if let Err(e) = tokio::fs::remove_file(&file.path).await {
                warn!("Could not remove {}: {}", file.path.display(), e);
            }
        }

        info!("Moved {} to {}", identifier, destination.display());
        Ok(destination)
    }
}

/// Suggested name, else last URL segment, else `<identifier>.zim`
pub fn destination_name(identifier: &str, file: &DownloadedFile) -> String {
    file.suggested_filename
        .as_deref()
        .and_then(safe_file_name)
        .or_else(|| {
            file.url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(safe_file_name)
        })
        .or_else(|| safe_file_name(&format!("{}.{}", identifier, FALLBACK_EXTENSION)))
        .unwrap_or_else(|| format!("download.{}", FALLBACK_EXTENSION))
}

/// Strip any directory components; reject empty and dot names
fn safe_file_name(name: &str) -> Option<String> {
    let name = Path::new(name).file_name()?.to_str()?;
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
