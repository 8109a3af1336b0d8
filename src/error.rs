//! Error types for parframe
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// parframe error types
#[derive(Error, Debug)]
pub enum Error {
    /// Unrecognized engine, missing coordinator address, bad memory override
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Coordinator could not be reached (fatal, never retried)
    #[error("Cannot reach cluster coordinator at {address}: {reason}\nNo fallback engine is used; check the address or unset cluster mode.")]
    BootstrapConnectivity {
        /// Coordinator address as configured
        address: String,
        /// Underlying connection failure
        reason: String,
    },

    /// Another caller's bootstrap attempt failed; the process will not retry
    #[error("Cluster bootstrap already failed in this process: {0}")]
    BootstrapFailed(String),

    /// System memory or cluster CPU count could not be read
    #[error("Resource probe failed: {0}")]
    ResourceProbe(String),

    /// Value refused by the registered transfer strategy
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend-internal failure (worker pool construction, etc.)
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
