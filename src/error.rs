//! Error types for the APIToolkit middleware
//!
//! Only [`ToolkitError::Unauthorized`] ever reaches the host application (it
//! aborts client construction). Everything else is caught internally: the
//! handshake degrades, redaction passes bodies through, and publishing logs.

use thiserror::Error;

use crate::selector::SelectorError;

/// Main error type for APIToolkit operations
#[derive(Error, Debug)]
pub enum ToolkitError {
    /// Required configuration (the API key) was not provided
    #[error("Missing configuration: APIToolkit API key not provided")]
    MissingConfig,

    /// The metadata endpoint rejected the API key
    #[error("APIToolkit rejected the API key (HTTP 401)")]
    Unauthorized,

    /// The metadata endpoint answered with a non-success status other than 401
    #[error("Client metadata handshake failed: HTTP {0}")]
    HandshakeFailed(reqwest::StatusCode),

    /// Network-related errors (connection, DNS, TLS, timeouts)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A redaction selector could not be parsed
    #[error("Invalid redaction selector: {0}")]
    InvalidSelector(#[from] SelectorError),

    /// The service-account credential is unusable
    #[error("Invalid publisher credentials: {0}")]
    Credentials(String),

    /// Signing the access-token assertion failed
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// The client is degraded and has no transport
    #[error("Publishing is disabled: {0}")]
    PublishingDisabled(String),

    /// The publish endpoint answered with a non-success status
    #[error("Failed to publish message: HTTP {0}")]
    PublishFailed(reqwest::StatusCode),
}

impl ToolkitError {
    /// Whether this error must abort client construction instead of degrading
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolkitError::Unauthorized | ToolkitError::MissingConfig | ToolkitError::InvalidSelector(_))
    }
}
