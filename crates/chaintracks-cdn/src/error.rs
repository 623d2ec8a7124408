//! Error types for the HTTP clients.

/// Errors raised by the CDN and header-service clients.
#[derive(Debug, thiserror::Error)]
pub enum CdnError {
    /// Transport-level failure, after bounded retries when transient.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Unexpected HTTP status.
    #[error("server returned status {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },
    /// Response body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Header-primitive failure while decoding served headers.
    #[error(transparent)]
    Core(#[from] chaintracks_core::CoreError),
}

impl From<serde_json::Error> for CdnError {
    fn from(err: serde_json::Error) -> Self {
        CdnError::Malformed(err.to_string())
    }
}

impl From<hex::FromHexError> for CdnError {
    fn from(err: hex::FromHexError) -> Self {
        CdnError::Malformed(err.to_string())
    }
}
