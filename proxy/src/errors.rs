use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

/// Errors that can occur while serving or cloning a request
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The inbound body could not be captured; the caller cannot be answered
    /// and the connection is dropped without a status.
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to read response body from {0}: {1}")]
    ResponseBodyError(String, String),

    #[error("Failed to build clone request for {0}: {1}")]
    CloneBuildError(String, String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Report serialization error: {0}")]
    ReportSerializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
