//! Error types for cloud-service operations.

use thiserror::Error;

/// Errors surfaced by `CloudClient` operations.
///
/// The taxonomy matters more than the message: `Timeout` and `Connect`
/// are transient and eligible for per-call retry, `SessionNotFound` is
/// the server's expired-session signal, and everything else is treated
/// as persistent by the caller.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// The request exceeded its per-call deadline.
    #[error("request timed out")]
    Timeout,

    /// Transport-level failure: connection refused/reset or name
    /// resolution failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server no longer knows the upload session (expired or never
    /// existed).
    #[error("upload session not found")]
    SessionNotFound,

    /// A non-success HTTP status that is not a session lookup failure.
    #[error("cloud service error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be interpreted.
    #[error("malformed cloud response: {0}")]
    Protocol(String),
}

impl CloudError {
    /// Whether the per-call retry policy should re-attempt this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Timeout | CloudError::Connect(_))
    }
}
