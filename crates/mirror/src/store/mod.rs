//! Filesystem-backed cache of root, provider and package documents.
//!
//! Paths come from [`naming`]; package and provider bodies are stored
//! gzip-compressed and decoded transparently on read. Absence is reported as
//! `None`, never as an error: the caller decides whether that means "not yet
//! synced" or "does not exist".

pub mod naming;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgmirror_compress::Compression;
use pkgmirror_protocol::{MetadataRecord, RootDocument};
use pkgmirror_storage::BackendHandle;
use pkgmirror_storage::error::Result as StorageResult;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, instrument, warn};

pub struct MetadataStore {
    backend: BackendHandle,
    mirror: String,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("backend", &self.backend.name())
            .field("mirror", &self.mirror)
            .finish()
    }
}

/// Treat "file not found" as `None`.
fn optional<T>(result: StorageResult<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.raise(ErrorKind::Storage)),
    }
}

impl MetadataStore {
    pub fn new(backend: BackendHandle, mirror: impl Into<String>) -> Self {
        Self {
            backend,
            mirror: mirror.into(),
        }
    }

    pub fn mirror(&self) -> &str {
        &self.mirror
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    async fn read_record(&self, path: &Path) -> Result<Option<MetadataRecord>> {
        let Some(content) = optional(self.backend.read(path).await)? else {
            return Ok(None);
        };
        let captured_at = match optional(self.backend.stat(path).await)? {
            Some(info) => info.modified.unix_timestamp(),
            None => return Ok(None),
        };
        Ok(Some(MetadataRecord::new(content, captured_at)))
    }

    async fn write_compressed(&self, path: &Path, content: &[u8]) -> Result<()> {
        let plain = pkgmirror_compress::decode(content).or_raise(|| ErrorKind::Protocol)?;
        let compressed = Compression::Gzip.compress(&plain).or_raise(|| ErrorKind::Protocol)?;
        self.backend.write(path, &compressed).await.or_raise(|| ErrorKind::Storage)
    }

    // =========================================================================
    // Root
    // =========================================================================

    pub async fn root_metadata(&self) -> Result<Option<MetadataRecord>> {
        self.read_record(&naming::root_path(&self.mirror)).await
    }

    /// The stored root, parsed. A stored root that no longer parses is logged
    /// and treated as missing.
    pub async fn root_document(&self) -> Result<Option<RootDocument>> {
        let Some(record) = self.root_metadata().await? else {
            return Ok(None);
        };
        match record.decode().ok().map(|bytes| RootDocument::parse(&bytes)) {
            Some(Ok(root)) => Ok(Some(root)),
            _ => {
                warn!(mirror = %self.mirror, "stored root document is unreadable");
                Ok(None)
            },
        }
    }

    /// Persist the root document (uncompressed, it is served as-is).
    #[instrument(level = "debug", skip_all, fields(mirror = %self.mirror))]
    pub async fn dump_root_meta(&self, root: &RootDocument) -> Result<()> {
        let bytes = root.to_bytes().or_raise(|| ErrorKind::Protocol)?;
        self.backend
            .write(&naming::root_path(&self.mirror), &bytes)
            .await
            .or_raise(|| ErrorKind::Storage)
    }

    /// Mark the stored root as checked now without rewriting it.
    pub async fn touch_root(&self) -> Result<()> {
        optional(self.backend.touch(&naming::root_path(&self.mirror)).await)?;
        Ok(())
    }

    /// Whether the stored root has the same content as `root`.
    pub async fn is_root_fresh(&self, root: &RootDocument) -> Result<bool> {
        let Some(stored) = self.root_metadata().await? else {
            return Ok(false);
        };
        let stored = stored.content_hash().or_raise(|| ErrorKind::Protocol)?;
        let incoming = root.content_hash().or_raise(|| ErrorKind::Protocol)?;
        Ok(stored == incoming)
    }

    // =========================================================================
    // Providers and includes
    // =========================================================================

    pub async fn find_provider_metadata(&self, key: &str) -> Result<Option<MetadataRecord>> {
        self.read_record(&naming::provider_path(&self.mirror, key)).await
    }

    pub async fn dump_provider(&self, key: &str, content: &[u8]) -> Result<()> {
        self.write_compressed(&naming::provider_path(&self.mirror, key), content).await
    }

    pub async fn has_provider(&self, key: &str) -> Result<bool> {
        self.backend
            .exists(&naming::provider_path(&self.mirror, key))
            .await
            .or_raise(|| ErrorKind::Storage)
    }

    // =========================================================================
    // Packages
    // =========================================================================

    /// Find a package document.
    ///
    /// Packages inlined in the stored root win. Otherwise the file for
    /// `hash` is read, or without a hash the most recently modified file for
    /// the package.
    pub async fn find_package_metadata(&self, name: &str, hash: Option<&str>) -> Result<Option<MetadataRecord>> {
        if let Some(record) = self.find_inline_package(name).await? {
            return Ok(Some(record));
        }
        if let Some(hash) = hash {
            let record = self.read_record(&naming::package_path(&self.mirror, name, Some(hash))).await?;
            return Ok(record.map(|record| record.with_hash(hash)));
        }
        let Some(path) = self.latest_package_file(name).await? else {
            return Ok(None);
        };
        let hash = path
            .file_name()
            .and_then(|file| file.to_str())
            .and_then(|file| file.split_once(naming::HASH_SEPARATOR))
            .map(|(_, rest)| rest.trim_end_matches(".json.gz").to_string());
        let record = self.read_record(&path).await?;
        Ok(match (record, hash) {
            (Some(record), Some(hash)) => Some(record.with_hash(hash)),
            (record, None) => record,
            (None, Some(_)) => None,
        })
    }

    async fn find_inline_package(&self, name: &str) -> Result<Option<MetadataRecord>> {
        let Some(root) = self.root_document().await? else {
            return Ok(None);
        };
        let Some(versions) = root.packages().and_then(|packages| packages.get(name)) else {
            return Ok(None);
        };
        let mut packages = Map::new();
        packages.insert(name.to_string(), versions.clone());
        let mut doc = Map::new();
        doc.insert("packages".to_string(), Value::Object(packages));
        let record = MetadataRecord::from_json(&Value::Object(doc)).or_raise(|| ErrorKind::Protocol)?;
        Ok(Some(record.with_option("source", "inline")))
    }

    async fn latest_package_file(&self, name: &str) -> Result<Option<std::path::PathBuf>> {
        let dir = naming::package_dir(&self.mirror, name);
        let files = self.backend.list(Some(&dir)).await.or_raise(|| ErrorKind::Storage)?;
        Ok(files
            .into_iter()
            .filter(|info| info.path.parent() == Some(dir.as_path()))
            .filter(|info| info.file_name().is_some_and(|file| naming::is_package_file(file, name)))
            .max_by_key(|info| info.modified)
            .map(|info| info.path))
    }

    /// Persist a package document, gzip-compressed. Older revisions of the
    /// same package are removed once the new one is in place.
    #[instrument(level = "debug", skip(self, content), fields(mirror = %self.mirror))]
    pub async fn dump_package(&self, name: &str, content: &[u8], hash: Option<&str>) -> Result<()> {
        let path = naming::package_path(&self.mirror, name, hash);
        self.write_compressed(&path, content).await?;
        self.prune_package(name, &path).await;
        Ok(())
    }

    async fn prune_package(&self, name: &str, keep: &Path) {
        let dir = naming::package_dir(&self.mirror, name);
        let files = match self.backend.list(Some(&dir)).await {
            Ok(files) => files,
            Err(err) => {
                warn!(package = name, error = ?err, "could not list package revisions");
                return;
            },
        };
        for info in files {
            let stale = info.path != keep
                && info.path.parent() == Some(dir.as_path())
                && info.file_name().is_some_and(|file| naming::is_package_file(file, name));
            if stale {
                debug!(path = %info.path.display(), "removing stale package revision");
                if let Err(err) = self.backend.delete(&info.path).await
                    && !err.is_not_found()
                {
                    warn!(path = %info.path.display(), error = ?err, "could not remove stale revision");
                }
            }
        }
    }

    pub async fn has_package(&self, name: &str, hash: Option<&str>) -> Result<bool> {
        match hash {
            Some(_) => self
                .backend
                .exists(&naming::package_path(&self.mirror, name, hash))
                .await
                .or_raise(|| ErrorKind::Storage),
            None => Ok(self.latest_package_file(name).await?.is_some()),
        }
    }

    /// Remove every stored revision of a package.
    pub async fn remove_package(&self, name: &str) -> Result<u64> {
        let dir = naming::package_dir(&self.mirror, name);
        let files = self.backend.list(Some(&dir)).await.or_raise(|| ErrorKind::Storage)?;
        let mut removed = 0;
        for info in files {
            let matches = info.path.parent() == Some(dir.as_path())
                && info.file_name().is_some_and(|file| naming::is_package_file(file, name));
            if matches && optional(self.backend.delete(&info.path).await)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete everything stored for this mirror.
    #[instrument(skip(self), fields(mirror = %self.mirror))]
    pub async fn clear(&self) -> Result<u64> {
        self.backend
            .delete_prefix(Path::new(&self.mirror))
            .await
            .or_raise(|| ErrorKind::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmirror_storage::StorageBackend;
    use pkgmirror_storage::backend::{LocalBackend, MockBackend};
    use serde_json::json;
    use std::sync::Arc;
    use time::{Duration, UtcDateTime};

    fn store() -> (Arc<MockBackend>, MetadataStore) {
        let backend = Arc::new(MockBackend::default());
        let store = MetadataStore::new(backend.clone(), "packagist");
        (backend, store)
    }

    fn root(value: Value) -> RootDocument {
        let Value::Object(map) = value else { unreachable!() };
        RootDocument::from_map(map).unwrap()
    }

    #[tokio::test]
    async fn test_missing_documents_are_none() {
        let (_, store) = store();
        assert!(store.root_metadata().await.unwrap().is_none());
        assert!(store.find_provider_metadata("p/a$abc.json").await.unwrap().is_none());
        assert!(store.find_package_metadata("acme/foo", None).await.unwrap().is_none());
        assert!(store.find_package_metadata("acme/foo", Some("abc")).await.unwrap().is_none());
        assert!(!store.has_package("acme/foo", None).await.unwrap());
        store.touch_root().await.unwrap();
    }

    #[tokio::test]
    async fn test_dump_package_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::new("local", dir.path()).unwrap());
        let store = MetadataStore::new(backend.clone(), "packagist");
        let body = br#"{"packages":{"acme/foo":{"1.0.0":{"version":"1.0.0"}}}}"#;
        let path = naming::package_path("packagist", "acme/foo", Some("f00"));

        store.dump_package("acme/foo", body, Some("f00")).await.unwrap();
        let first = std::fs::read(backend.absolute_path(&path).unwrap()).unwrap();
        store.dump_package("acme/foo", body, Some("f00")).await.unwrap();
        let second = std::fs::read(backend.absolute_path(&path).unwrap()).unwrap();
        assert_eq!(first, second);

        let record = store.find_package_metadata("acme/foo", Some("f00")).await.unwrap().unwrap();
        assert!(record.is_compressed());
        assert_eq!(record.decode().unwrap(), body);
        assert_eq!(record.hash(), Some("f00"));
    }

    #[tokio::test]
    async fn test_root_freshness() {
        let (_, store) = store();
        let doc = root(json!({"packages": {}, "providers-url": "/p/%package%$%hash%.json"}));
        assert!(!store.is_root_fresh(&doc).await.unwrap());
        store.dump_root_meta(&doc).await.unwrap();
        store.dump_root_meta(&doc).await.unwrap();
        assert!(store.is_root_fresh(&doc).await.unwrap());

        let changed = root(json!({"packages": {}, "providers-url": "/p/%package%.json"}));
        assert!(!store.is_root_fresh(&changed).await.unwrap());
    }

    #[tokio::test]
    async fn test_inline_packages_win() {
        let (_, store) = store();
        let doc = root(json!({"packages": {"acme/inline": {"1.0.0": {"version": "1.0.0"}}}}));
        store.dump_root_meta(&doc).await.unwrap();
        let record = store.find_package_metadata("acme/inline", None).await.unwrap().unwrap();
        assert_eq!(record.option("source"), Some("inline"));
        assert!(record.json().unwrap()["packages"]["acme/inline"].is_object());
    }

    #[tokio::test]
    async fn test_latest_revision_without_hash() {
        let (backend, store) = store();
        let old = naming::package_path("packagist", "acme/foo", Some("old"));
        let new = naming::package_path("packagist", "acme/foo", Some("new"));
        let other = naming::package_path("packagist", "acme/foobar", None);
        let gz = |s: &str| Compression::Gzip.compress(s.as_bytes()).unwrap();
        backend.write(&old, &gz(r#"{"v":"old"}"#)).await.unwrap();
        backend.write(&new, &gz(r#"{"v":"new"}"#)).await.unwrap();
        backend.write(&other, &gz(r#"{"v":"other"}"#)).await.unwrap();
        let now = UtcDateTime::now();
        backend.set_modified(&old, now - Duration::hours(1)).await;
        backend.set_modified(&new, now).await;
        backend.set_modified(&other, now + Duration::hours(1)).await;

        let record = store.find_package_metadata("acme/foo", None).await.unwrap().unwrap();
        assert_eq!(record.hash(), Some("new"));
        assert_eq!(record.json().unwrap()["v"], "new");
    }

    #[tokio::test]
    async fn test_dump_prunes_older_revisions() {
        let (backend, store) = store();
        store.dump_package("acme/foo", b"{}", Some("one")).await.unwrap();
        store.dump_package("acme/foo", b"{}", Some("two")).await.unwrap();
        store.dump_package("acme/foobar", b"{}", None).await.unwrap();
        assert!(!backend.exists(&naming::package_path("packagist", "acme/foo", Some("one"))).await.unwrap());
        assert!(store.has_package("acme/foo", Some("two")).await.unwrap());
        assert!(store.has_package("acme/foobar", None).await.unwrap());
        assert_eq!(store.remove_package("acme/foo").await.unwrap(), 1);
        assert!(!store.has_package("acme/foo", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_provider_roundtrip_and_clear() {
        let (_, store) = store();
        store.dump_provider("p/a$abc.json", br#"{"providers":{}}"#).await.unwrap();
        assert!(store.has_provider("p/a$abc.json").await.unwrap());
        let record = store.find_provider_metadata("p/a$abc.json").await.unwrap().unwrap();
        assert!(record.json().unwrap().contains_key("providers"));
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(!store.has_provider("p/a$abc.json").await.unwrap());
    }
}
