//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`]. Every write is
/// counted, which lets tests assert that an operation performed no writes at
/// all.
///
/// # Examples
///
/// ```
/// use pkgmirror_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("packagist/packages.json", br#"{"packages":{}}"#),
/// ]);
/// assert!(backend.exists(Path::new("packagist/packages.json")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (UtcDateTime, Vec<u8>)>>,
    writes: AtomicU64,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            writes: AtomicU64::new(0),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of successful [`write`](StorageBackend::write) calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Force a file's modification time, for tests that depend on ordering.
    ///
    /// Panics if the file does not exist.
    pub async fn set_modified(&self, path: impl AsRef<Path>, modified: UtcDateTime) {
        let path = validate_path(path.as_ref()).expect("valid path");
        let mut guard = self.storage.write().await;
        let entry = guard.get_mut(&path).expect("MockBackend::set_modified: file exists");
        entry.0 = modified;
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (modified, data))| FileInfo::new(path.clone(), data.len() as u64, *modified))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_modified, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.insert(path, (UtcDateTime::now(), data.to_vec()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn delete_prefix(&self, prefix: &Path) -> Result<u64> {
        let prefix = validate_path(prefix)?;
        let mut guard = self.storage.write().await;
        let before = guard.len();
        guard.retain(|path, _| !path.starts_with(&prefix));
        Ok((before - guard.len()) as u64)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (modified, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *modified))
    }

    async fn touch(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        let entry = guard.get_mut(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        entry.0 = UtcDateTime::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read_counts_writes() {
        let backend = MockBackend::default();
        assert_eq!(backend.write_count(), 0);
        backend.write(Path::new("m/packages.json"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("m/packages.json")).await.unwrap(), b"hello");
        assert_eq!(backend.write_count(), 1);
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.json")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([
            ("m/package/acme/foo.json.gz", Vec::from(*b"a")),
            ("m/package/acme/bar.json.gz", Vec::from(*b"b")),
            ("m/package/acme-corp/baz.json.gz", Vec::from(*b"c")),
        ]);
        let files = backend.list(Some(Path::new("m/package/acme"))).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let backend = MockBackend::with_files([
            ("one/packages.json", Vec::from(*b"a")),
            ("one/p/x.json.gz", Vec::from(*b"b")),
            ("two/packages.json", Vec::from(*b"c")),
        ]);
        assert_eq!(backend.delete_prefix(Path::new("one")).await.unwrap(), 2);
        assert_eq!(backend.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_touch_and_set_modified() {
        let backend = MockBackend::with_files([("packages.json", Vec::from(*b"{}"))]);
        let past = UtcDateTime::from_unix_timestamp(1_000).unwrap();
        backend.set_modified("packages.json", past).await;
        assert_eq!(backend.stat(Path::new("packages.json")).await.unwrap().modified, past);
        backend.touch(Path::new("packages.json")).await.unwrap();
        assert!(backend.stat(Path::new("packages.json")).await.unwrap().modified > past);
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
