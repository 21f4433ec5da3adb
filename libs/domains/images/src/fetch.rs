//! Source image fetching.

use crate::error::PipelineError;
use async_trait::async_trait;
use reqwest::Client;

/// Trait for fetching source image bytes.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Fetch the image at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError>;

    /// Get the backend name for logging.
    fn name(&self) -> &'static str;
}

/// HTTPS fetcher for source images.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchBackend for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let download_error = |e: reqwest::Error| PipelineError::Download {
            url: url.to_string(),
            details: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(download_error)?
            .error_for_status()
            .map_err(download_error)?;

        let bytes = response.bytes().await.map_err(download_error)?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "HttpFetcher"
    }
}
