use crate::error::{ErrorKind, Result};
use crate::root::{Protocol, RootDocument};
use exn::{OptionExt, ResultExt};
use pkgmirror_config::MirrorConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

const ROOT_FILE: &str = "packages.json";

/// Outcome of the most recent sync of a mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Unix timestamp of the last completed sync.
    pub last_sync: Option<i64>,
    pub pkg_total: u64,
    pub pkg_updated: u64,
    /// Sample of the available-package catalog.
    pub available_packages: Vec<String>,
    /// `timestamp` of the last changes-feed response, the cursor for delta syncs.
    pub metadata_timestamp: Option<i64>,
}

/// Everything known about one mirror at a point in time: its static
/// configuration, the last root document and the last sync statistics.
///
/// Every derived value (protocol, URLs, capability flags) is computed from
/// those three; [`with_root`](Self::with_root) and
/// [`with_stats`](Self::with_stats) return a fresh value instead of mutating.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    name: String,
    config: Arc<MirrorConfig>,
    root: Option<Arc<RootDocument>>,
    stats: SyncStats,
    protocol: Protocol,
}

impl RepositoryOptions {
    pub fn new(name: impl Into<String>, config: Arc<MirrorConfig>) -> Self {
        Self {
            name: name.into(),
            config,
            root: None,
            stats: SyncStats::default(),
            protocol: Protocol::LegacyInline,
        }
    }

    pub fn with_root(&self, root: RootDocument) -> Self {
        let protocol = Protocol::detect(&root, self.config.lazy, self.config.disable_v1, self.config.disable_v2);
        Self {
            root: Some(Arc::new(root)),
            protocol,
            ..self.clone()
        }
    }

    pub fn with_stats(&self, stats: SyncStats) -> Self {
        Self { stats, ..self.clone() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn root(&self) -> Option<&RootDocument> {
        self.root.as_deref()
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn is_lazy(&self) -> bool {
        self.protocol.is_lazy()
    }

    pub fn is_strict(&self) -> bool {
        self.config.strict
    }

    pub fn is_dist_mirror(&self) -> bool {
        self.config.dist_mirror
    }

    pub fn has_v2(&self) -> bool {
        matches!(self.protocol, Protocol::V2Metadata | Protocol::V2Lazy)
    }

    /// Whether v1 provider URLs are usable, even when v2 drives the mirror.
    pub fn has_v1(&self) -> bool {
        !self.config.disable_v1
            && self
                .root()
                .is_some_and(|root| root.providers_url().is_some() || root.providers_lazy_url().is_some())
    }

    pub fn has_changes_feed(&self) -> bool {
        self.has_v2() && self.root().is_some_and(|root| root.metadata_changes_url().is_some())
    }

    /// Absolute URL of the upstream root document.
    pub fn root_url(&self) -> Result<Url> {
        let base = &self.config.url;
        if base.path().ends_with(".json") {
            return Ok(base.clone());
        }
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(ROOT_FILE).or_raise(|| ErrorKind::InvalidUrl(base.to_string()))
    }

    /// Resolve a (possibly relative) reference from the root document.
    pub fn resolve(&self, reference: &str) -> Result<Url> {
        self.root_url()?
            .join(reference)
            .or_raise(|| ErrorKind::InvalidUrl(reference.to_string()))
    }

    fn root_or_missing(&self) -> Result<&RootDocument> {
        self.root()
            .ok_or_raise(|| ErrorKind::InvalidData("root document not loaded".to_string()))
    }

    /// v2 metadata URL for the stable or `~dev` listing of a package.
    pub fn metadata_url(&self, package: &str, dev: bool) -> Result<Option<Url>> {
        let Some(template) = self.root_or_missing()?.metadata_url() else {
            return Ok(None);
        };
        let name = if dev { format!("{package}~dev") } else { package.to_string() };
        self.resolve(&template.replace("%package%", &name)).map(Some)
    }

    /// v1 package URL, hash-qualified when the provider listing pinned one.
    pub fn provider_url(&self, package: &str, hash: Option<&str>) -> Result<Option<Url>> {
        let root = self.root_or_missing()?;
        let template = match (hash, root.providers_url(), root.providers_lazy_url()) {
            (Some(hash), Some(template), _) => template.replace("%hash%", hash),
            (None, _, Some(lazy)) => lazy.to_string(),
            (None, Some(template), None) => template.replace("$%hash%", "").replace("%hash%", ""),
            (Some(_), None, Some(lazy)) => lazy.to_string(),
            (_, None, None) => return Ok(None),
        };
        self.resolve(&template.replace("%package%", package)).map(Some)
    }

    /// Changes feed URL asking for everything after `since`.
    pub fn metadata_changes_url(&self, since: i64) -> Result<Option<Url>> {
        let Some(template) = self.root_or_missing()?.metadata_changes_url() else {
            return Ok(None);
        };
        let mut url = self.resolve(template)?;
        url.query_pairs_mut().append_pair("since", &since.to_string());
        Ok(Some(url))
    }

    /// Candidate archive URLs from the root's dist mirrors, preferred first.
    pub fn dist_mirror_urls(&self, package: &str, version: &str, reference: &str, kind: &str) -> Vec<Url> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        root.dist_mirrors()
            .into_iter()
            .filter_map(|mirror| {
                let url = mirror
                    .dist_url
                    .replace("%package%", package)
                    .replace("%version%", version)
                    .replace("%reference%", reference)
                    .replace("%type%", kind);
                self.resolve(&url).ok()
            })
            .collect()
    }
}
