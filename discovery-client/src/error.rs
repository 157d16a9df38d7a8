//! Error types for the discovery client

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors surfaced by the discovery client.
///
/// Network failures against robots are never errors: they are recorded on the
/// address they belong to.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The HTTP client used for health probes could not be built
    #[error("Failed to build health check HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The store thread is gone
    #[error("Discovery store is closed")]
    StoreClosed,
}
