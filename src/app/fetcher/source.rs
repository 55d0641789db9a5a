//! Where icon bytes come from

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::app::client::HttpHandler;
use crate::errors::{DownloadError, DownloadResult};

/// Fetches one icon payload
#[async_trait]
pub trait IconSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> DownloadResult<Vec<u8>>;
}

/// Icons over HTTP through the rate-limited handler
pub struct HttpIconSource {
    handler: Arc<HttpHandler>,
}

impl HttpIconSource {
    pub fn new(handler: Arc<HttpHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl IconSource for HttpIconSource {
    /// Only `200 OK` with an `image/*` body is accepted
    async fn fetch(&self, url: &Url) -> DownloadResult<Vec<u8>> {
        let (bytes, content_type) = self.handler.get_bytes(url).await?;
        if is_image(content_type.as_deref()) {
            Ok(bytes)
        } else {
            Err(DownloadError::UnexpectedContent {
                content_type: content_type.unwrap_or_else(|| "none".to_string()),
            })
        }
    }
}

fn is_image(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}
