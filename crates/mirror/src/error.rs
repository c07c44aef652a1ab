//! Mirror Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Errors from the crates below keep their own frames as
//! children of the kind raised here.

use derive_more::{Display, Error};
use pkgmirror_fetch::error::{Error as FetchError, ErrorKind as FetchErrorKind};

/// A mirror error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Absent locally and not fetchable, or a genuine upstream 404.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Upstream failed for a reason other than absence.
    #[display("upstream transport failure")]
    Transport,
    /// The caller is not entitled to see this package.
    #[display("package requires approval: {_0}")]
    ApprovalRestricted(#[error(not(source))] String),
    /// Cancellation was requested while work was outstanding.
    #[display("operation cancelled")]
    Cancelled,
    /// The storage backend failed.
    #[display("storage failure")]
    Storage,
    /// The shared key-value store failed.
    #[display("key-value store failure")]
    Store,
    /// A document was malformed.
    #[display("invalid repository document")]
    Protocol,
    #[display("invalid mirror configuration")]
    Config,
}

impl ErrorKind {
    /// Wrap a fetch error, keeping its frame as a child and carrying over
    /// absence and cancellation.
    #[track_caller]
    pub fn fetch(err: FetchError) -> Error {
        let kind = match &*err {
            FetchErrorKind::NotFound(url) => Self::NotFound(url.clone()),
            FetchErrorKind::Cancelled => Self::Cancelled,
            FetchErrorKind::Protocol => Self::Protocol,
            _ => Self::Transport,
        };
        err.raise(kind)
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport | Self::Storage | Self::Store)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
