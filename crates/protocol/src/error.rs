//! Protocol Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A protocol error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes could not be decompressed.
    #[display("could not decode document body")]
    Decode,
    /// The body is not a JSON document.
    #[display("malformed JSON document")]
    MalformedJson,
    /// The document parsed but does not have the expected shape.
    #[display("invalid document: {_0}")]
    InvalidData(#[error(not(source))] String),
    /// A URL template or relative reference could not be resolved.
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Upstream may have served a truncated body; a second fetch can differ.
        matches!(self, Self::Decode | Self::MalformedJson)
    }
}
