//! JSON header service client: present-height polling and recent
//! headers by height range.

use std::time::Duration;

use tracing::warn;

use chaintracks_core::{BlockHeader, ChainHeader, HeightRange};

use crate::error::CdnError;
use crate::types::{HeaderEnvelope, HeaderServiceConfig, HeightResponse};

/// HTTP client for a header service exposing `height` and `headers`
/// endpoints.
#[derive(Debug, Clone)]
pub struct HeaderServiceClient {
    /// Client configuration.
    config: HeaderServiceConfig,
    /// Underlying HTTP client.
    client: reqwest::Client,
}

impl HeaderServiceClient {
    /// Create a new header service client with the given configuration.
    pub fn new(config: HeaderServiceConfig) -> Self {
        let client = reqwest::Client::new();
        Self { config, client }
    }

    /// Best known chain height according to the service.
    pub async fn present_height(&self) -> Result<u32, CdnError> {
        let url = format!("{}/height", self.config.base_url.trim_end_matches('/'));
        let body = self.get_with_retry(&url).await?;
        let parsed: HeightResponse = serde_json::from_slice(&body)?;
        Ok(parsed.height)
    }

    /// Headers covering `range`, parsed and situated at their reported
    /// heights.
    ///
    /// The service may return multiple competing headers for a height;
    /// callers select a consistent sub-chain. Results are paged by the
    /// configured `page_size`; paging stops early when the service has
    /// nothing further.
    pub async fn fetch_headers(
        &self,
        range: HeightRange,
    ) -> Result<Vec<ChainHeader>, CdnError> {
        let mut out = Vec::new();
        if range.is_empty() {
            return Ok(out);
        }
        let mut next = range.min_height as u32;
        while next as i64 <= range.max_height {
            let remaining = (range.max_height - next as i64 + 1) as u32;
            let count = remaining.min(self.config.page_size);
            let url = format!(
                "{}/headers?height={}&count={}",
                self.config.base_url.trim_end_matches('/'),
                next,
                count
            );
            let body = self.get_with_retry(&url).await?;
            let envelopes: Vec<HeaderEnvelope> = serde_json::from_slice(&body)?;
            if envelopes.is_empty() {
                break;
            }
            let mut top = next;
            for envelope in envelopes {
                let bytes = hex::decode(&envelope.hex)?;
                let header = BlockHeader::deserialize(&bytes)?;
                top = top.max(envelope.height);
                out.push(ChainHeader::new(envelope.height, header));
            }
            next = top + 1;
        }
        Ok(out)
    }

    /// GET with the same bounded-retry policy as the CDN client.
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
                        tokio::time::sleep(Duration::from_millis(
                            self.config.backoff_ms * attempt as u64,
                        ))
                        .await;
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
                        tokio::time::sleep(Duration::from_millis(
                            self.config.backoff_ms * attempt as u64,
                        ))
                        .await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}
