//! Client configuration and wire document types.

use serde::{Deserialize, Serialize};

use chaintracks_bulk::ChunkInfo;

/// Configuration for a [`CdnClient`](crate::CdnClient).
#[derive(Debug, Clone)]
pub struct CdnConfig {
    /// Base URL of the CDN origin (e.g. `https://cdn.projectbabbage.com/blockheaders`).
    pub base_url: String,
    /// Path of the manifest document under the base URL.
    pub manifest_path: String,
    /// Attempts per request for transient faults.
    pub retries: u32,
    /// Linear backoff step between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for CdnConfig {
    fn default() -> Self {
        CdnConfig {
            base_url: String::new(),
            manifest_path: "blockHeaders.json".to_string(),
            retries: 3,
            backoff_ms: 250,
        }
    }
}

/// Configuration for a [`HeaderServiceClient`](crate::HeaderServiceClient).
#[derive(Debug, Clone)]
pub struct HeaderServiceConfig {
    /// Base URL of the header service.
    pub base_url: String,
    /// Attempts per request for transient faults.
    pub retries: u32,
    /// Linear backoff step between attempts, in milliseconds.
    pub backoff_ms: u64,
    /// Maximum headers requested per call.
    pub page_size: u32,
}

impl Default for HeaderServiceConfig {
    fn default() -> Self {
        HeaderServiceConfig {
            base_url: String::new(),
            retries: 3,
            backoff_ms: 250,
            page_size: 2000,
        }
    }
}

/// The chunk manifest a CDN origin publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    /// Folder the chunk files live under.
    pub root_folder: String,
    /// Name of this manifest document.
    pub json_filename: String,
    /// Headers per full chunk file.
    pub headers_per_file: u32,
    /// The chunk descriptors, ordered by first height.
    pub files: Vec<ChunkInfo>,
}

impl ChunkManifest {
    /// Fill in each file's `source_url` from the manifest's root folder
    /// when the entry does not carry one already.
    pub fn resolved_files(&self, base_url: &str) -> Vec<ChunkInfo> {
        let root = self.root_folder.trim_matches('/');
        self.files
            .iter()
            .cloned()
            .map(|mut chunk| {
                if chunk.source_url.is_none() {
                    let base = base_url.trim_end_matches('/');
                    chunk.source_url = Some(if root.is_empty() {
                        format!("{base}/{}", chunk.file_name)
                    } else {
                        format!("{base}/{root}/{}", chunk.file_name)
                    });
                }
                chunk
            })
            .collect()
    }
}

/// A header served by the JSON header service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderEnvelope {
    /// Height the service attributes to the header.
    pub height: u32,
    /// The 80 serialized header bytes, hex encoded.
    pub hex: String,
}

/// Response of the header service's height endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightResponse {
    /// Best known chain height.
    pub height: u32,
}
