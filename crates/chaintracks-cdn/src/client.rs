//! CDN origin client: manifest document and chunk payload downloads.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use chaintracks_bulk::{BulkError, ChunkSource};

use crate::error::CdnError;
use crate::types::{CdnConfig, ChunkManifest};

/// HTTP client for a CDN-style chunk origin.
#[derive(Debug, Clone)]
pub struct CdnClient {
    /// Client configuration.
    config: CdnConfig,
    /// Underlying HTTP client.
    client: reqwest::Client,
}

impl CdnClient {
    /// Create a new CDN client with the given configuration.
    pub fn new(config: CdnConfig) -> Self {
        let client = reqwest::Client::new();
        Self { config, client }
    }

    /// Download and parse the chunk manifest, with every file's
    /// `source_url` resolved against the origin.
    pub async fn fetch_manifest(&self) -> Result<ChunkManifest, CdnError> {
        let url = self.absolute(&self.config.manifest_path);
        let body = self.get_with_retry(&url).await?;
        let mut manifest: ChunkManifest = serde_json::from_slice(&body)?;
        manifest.files = manifest.resolved_files(&self.config.base_url);
        debug!(url = %url, files = manifest.files.len(), "fetched chunk manifest");
        Ok(manifest)
    }

    /// Download a chunk payload.
    pub async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, CdnError> {
        let url = self.absolute(url);
        self.get_with_retry(&url).await
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }

    /// GET a URL, retrying `connection reset`-class faults and server
    /// errors with linear backoff. Client errors (4xx) never retry.
    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, CdnError> {
        let attempts = self.config.retries.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() == 404 {
                        return Err(CdnError::NotFound(url.to_string()));
                    }
                    if status.is_server_error() && attempt < attempts {
                        warn!(url = %url, status = status.as_u16(), attempt, "server error, retrying");
                        self.backoff(attempt).await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(CdnError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    return Ok(resp.bytes().await?.to_vec());
                }
                Err(err) => {
                    let transient = err.is_connect() || err.is_timeout() || err.is_request();
                    if transient && attempt < attempts {
                        warn!(url = %url, attempt, error = %err, "transient fault, retrying");
                        self.backoff(attempt).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(Duration::from_millis(
            self.config.backoff_ms * attempt as u64,
        ))
        .await;
    }
}

#[async_trait]
impl ChunkSource for CdnClient {
    async fn fetch_chunk(&self, source_url: &str) -> Result<Vec<u8>, BulkError> {
        self.fetch_file(source_url)
            .await
            .map_err(|err| BulkError::Fetch(err.to_string()))
    }
}
