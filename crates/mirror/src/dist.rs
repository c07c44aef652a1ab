use crate::error::{ErrorKind, Result};
use crate::facade::SourceHandle;
use crate::store::naming;
use exn::{OptionExt, ResultExt};
use pkgmirror_fetch::ClientHandle;
use pkgmirror_protocol::RepositoryOptions;
use pkgmirror_protocol::minify::versions_of;
use pkgmirror_storage::BackendHandle;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use url::Url;

const DEFAULT_ARCHIVE_TYPE: &str = "zip";

/// Deterministic cache key of one archive.
pub fn dist_hash(package: &str, version: &str, reference: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [package, version, reference] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

fn field<'a>(entry: &'a Value, pointer: &str) -> Option<&'a str> {
    entry.pointer(pointer).and_then(Value::as_str)
}

/// Pick the version entry a request refers to.
///
/// Preference order: `dist.reference`, `source.reference`,
/// `version_normalized`, then `version`. Each criterion is tried across
/// every entry before falling back to the next one.
pub fn match_version<'a>(versions: &'a [Value], version: &str, reference: &str) -> Option<&'a Value> {
    let criteria: [(&str, &str); 4] = [
        ("/dist/reference", reference),
        ("/source/reference", reference),
        ("/version_normalized", version),
        ("/version", version),
    ];
    criteria.iter().find_map(|(pointer, wanted)| {
        versions
            .iter()
            .find(|entry| !wanted.is_empty() && field(entry, pointer) == Some(*wanted))
    })
}

/// Resolves (package, version, reference) to a locally cached archive,
/// downloading it on first request.
///
/// Archives are stored under a name derived from [`dist_hash`], so
/// concurrent resolutions of the same archive write identical bytes to the
/// same path and need no locking.
pub struct DistResolver {
    source: SourceHandle,
    backend: BackendHandle,
    client: ClientHandle,
    options: RepositoryOptions,
}

impl DistResolver {
    pub fn new(source: SourceHandle, backend: BackendHandle, client: ClientHandle, options: RepositoryOptions) -> Self {
        Self {
            source,
            backend,
            client,
            options,
        }
    }

    async fn cached(&self, package: &str, hash: &str) -> Result<Option<PathBuf>> {
        let dir = naming::dist_dir(self.options.name(), package);
        let files = self.backend.list(Some(&dir)).await.or_raise(|| ErrorKind::Storage)?;
        Ok(files
            .into_iter()
            .find(|info| {
                info.path.parent() == Some(dir.as_path())
                    && info
                        .file_name()
                        .and_then(|file| file.split_once('.'))
                        .is_some_and(|(stem, _)| stem == hash)
            })
            .map(|info| info.path))
    }

    fn candidates(&self, package: &str, entry: &Value, version: &str, reference: &str, kind: &str) -> Vec<Url> {
        let version = field(entry, "/version_normalized").or(field(entry, "/version")).unwrap_or(version);
        let reference = field(entry, "/dist/reference").unwrap_or(reference);
        let mut urls = self.options.dist_mirror_urls(package, version, reference, kind);
        if let Some(url) = field(entry, "/dist/url").and_then(|url| self.options.resolve(url).ok()) {
            urls.push(url);
        }
        urls
    }

    /// Storage-relative path of the archive, downloading it if needed.
    #[instrument(skip(self), fields(mirror = self.options.name()))]
    pub async fn dist_path(&self, package: &str, version: &str, reference: &str) -> Result<PathBuf> {
        if !self.options.is_dist_mirror() {
            exn::bail!(ErrorKind::NotFound(format!(
                "dist mirroring is disabled for {}",
                self.options.name()
            )));
        }
        let hash = dist_hash(package, version, reference);
        if let Some(path) = self.cached(package, &hash).await? {
            debug!(path = %path.display(), "dist cache hit");
            return Ok(path);
        }

        let record = self.source.find_package_metadata(package, None).await?;
        let doc = record.json().or_raise(|| ErrorKind::Protocol)?;
        let versions = versions_of(&doc, package);
        let entry = match_version(&versions, version, reference)
            .ok_or_raise(|| ErrorKind::NotFound(format!("{package} {version} ({reference})")))?;
        let kind = field(entry, "/dist/type").unwrap_or(DEFAULT_ARCHIVE_TYPE);
        let path = naming::dist_path(self.options.name(), package, &hash, kind);

        for url in self.candidates(package, entry, version, reference, kind) {
            match self.client.get(&url).await {
                Ok(body) if !body.is_empty() => {
                    self.backend.write(&path, &body).await.or_raise(|| ErrorKind::Storage)?;
                    info!(%url, size = body.len(), "archive mirrored");
                    return Ok(path);
                },
                Ok(_) => warn!(%url, "empty archive"),
                Err(err) => warn!(%url, error = ?err, "archive download failed"),
            }
        }
        // Falling back to the VCS source is not supported.
        exn::bail!(ErrorKind::NotFound(format!("no archive available for {package} {version}")))
    }
}
