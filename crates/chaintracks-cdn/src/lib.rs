#![deny(missing_docs)]

//! HTTP clients for the pluggable header feeds: a CDN-style origin
//! serving a chunk manifest plus chunk payload files, and a JSON header
//! service used for present-height polling and recent headers.

pub mod client;
pub mod error;
pub mod header_service;
pub mod types;

#[cfg(test)]
mod tests;

pub use client::CdnClient;
pub use error::CdnError;
pub use header_service::HeaderServiceClient;
pub use types::{CdnConfig, ChunkManifest, HeaderServiceConfig};
