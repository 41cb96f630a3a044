//! Error types for factroll-platform

use thiserror::Error;

/// Errors returned by platform collaborators.
///
/// The rollout core never inspects these beyond their message; it wraps them
/// into its own taxonomy depending on which step failed.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The referenced object does not exist on the service
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with a non-success status
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    /// The service answered, but not with something we understand
    #[error("unexpected response from {service}: {detail}")]
    Protocol { service: String, detail: String },

    /// The service accepted the request but reported that it failed
    #[error("{0}")]
    Rejected(String),

    /// A polled operation did not reach a terminal state in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// A local command (e.g. `git`) failed
    #[error("command failed: {0}")]
    Command(String),

    /// Required adapter configuration is missing or malformed
    #[error("adapter misconfigured: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Timeout(err.to_string())
        } else {
            PlatformError::Http(err.to_string())
        }
    }
}
