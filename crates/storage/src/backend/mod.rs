//! Storage backend trait and implementations.
//!
//! The mirror treats storage as a flat key-value filesystem: documents are
//! written whole, read whole, listed by prefix and removed by prefix when a
//! mirror is reset.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Atomicity
/// [`write`](Self::write) must replace the destination atomically: a reader
/// sees either the previous content or the new content, never a partial file.
/// The metadata store relies on this for crash safety instead of locking.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use pkgmirror_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_root(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = Path::new("packagist/packages.json");
///     if backend.exists(path).await? {
///         Ok(backend.read(path).await?.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream)
    /// into a [`Vec`].
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Prefix matching is component-based: `mirror/package/acme` matches
    /// `mirror/package/acme/foo.json.gz` but not `mirror/package/acme-corp/x`.
    /// A prefix that does not exist yields an empty stream, not an error.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Atomically create or replace a file, creating parent directories as
    /// needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Delete everything below a prefix, returning how many files were
    /// removed. A missing prefix removes nothing and is not an error.
    async fn delete_prefix(&self, prefix: &Path) -> Result<u64>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Bump a file's modification time to now without changing its content.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn touch(&self, path: &Path) -> Result<()>;
}
