//! Data models shared by the transfer engine
//!
//! Catalog entries are owned by the catalog collaborator and only read here.
//! Resume tokens are opaque to everything except the transport that made them.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::transfer::METADATA_SUFFIX;
use crate::errors::{CatalogError, CatalogResult};

/// An acquirable item described by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable key shared by the catalog, the state store and the transport
    pub identifier: String,
    /// Where the archive (or its metalink descriptor) lives
    pub source_url: String,
    /// Size announced by the catalog, used as a hint only
    #[serde(default)]
    pub expected_size: u64,
    /// Human readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Favicon location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Cached favicon bytes, written by the icon fetcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Vec<u8>>,
}

impl CatalogEntry {
    /// Create an entry with no display metadata
    pub fn new(
        identifier: impl Into<String>,
        source_url: impl Into<String>,
        expected_size: u64,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            source_url: source_url.into(),
            expected_size,
            display_name: None,
            icon_url: None,
            icon: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_icon_url(mut self, url: impl Into<String>) -> Self {
        self.icon_url = Some(url.into());
        self
    }

    /// Title used in notifications, falling back to the identifier
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.identifier)
    }

    /// Parse the source URL
    pub fn url(&self) -> CatalogResult<Url> {
        Url::parse(&self.source_url).map_err(|_| CatalogError::InvalidUrl {
            identifier: self.identifier.clone(),
            url: self.source_url.clone(),
        })
    }

    /// Whether the entry still needs its icon downloaded
    pub fn needs_icon(&self) -> bool {
        self.icon.is_none() && self.icon_url.is_some()
    }
}

/// Opaque bytes that let a stopped transfer continue where it left off
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({} bytes)", self.0.len())
    }
}

/// Everything the transport needs to begin a fresh transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub identifier: String,
    /// Payload URL, already stripped of any metalink suffix
    pub url: Url,
    /// Expected size hint; zero when unknown
    pub expected_bytes: u64,
    pub allow_metered: bool,
}

impl TransferRequest {
    /// Build a request, rewriting metalink descriptor URLs to their payload
    pub fn new(identifier: impl Into<String>, url: &Url, expected_bytes: u64) -> Self {
        Self {
            identifier: identifier.into(),
            url: strip_metadata_suffix(url),
            expected_bytes,
            allow_metered: true,
        }
    }

    pub fn with_allow_metered(mut self, allow: bool) -> Self {
        self.allow_metered = allow;
        self
    }
}

/// Rewrite `https://host/file.zim.meta4` to `https://host/file.zim`
///
/// URLs without the suffix are returned unchanged. Query and fragment are kept.
pub fn strip_metadata_suffix(url: &Url) -> Url {
    let mut rewritten = url.clone();
    if let Some(stripped) = url.path().strip_suffix(METADATA_SUFFIX) {
        if !stripped.is_empty() && !stripped.ends_with('/') {
            rewritten.set_path(stripped);
        }
    }
    rewritten
}
