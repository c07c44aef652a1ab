//! Fetch Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upstream answered 404 (or 410); the document does not exist there.
    #[display("not found upstream: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Upstream answered with another non-success status.
    #[display("upstream returned HTTP {status} for {url}")]
    Status {
        status: u16,
        url: String,
    },
    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[display("transport error fetching {_0}")]
    Transport(#[error(not(source))] String),
    /// The HTTP client could not be built from configuration.
    #[display("invalid HTTP client configuration")]
    Client,
    /// The response body was not the document we expected.
    #[display("invalid upstream document")]
    Protocol,
    /// Cancellation was requested before the batch finished.
    #[display("fetch cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
