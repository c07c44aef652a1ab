//! Bulk synchronization of one mirror from its upstream.
//!
//! A run fetches the upstream root, works out the [`Protocol`] and then takes
//! one of two paths:
//!
//! - **lazy v2**: refresh only the packages consumers already asked for
//!   (the "enabled" set), using the changes feed to skip unchanged ones, and
//!   stop;
//! - **everything else**: optionally refresh the enabled set over v2, skip
//!   the rest when the root is unchanged, load includes and provider
//!   listings, compute the package catalog and, for eager v1 mirrors,
//!   fetch every package whose pinned hash is not stored yet.
//!
//! Failures of individual packages are logged and skipped; only a root
//! failure (or cancellation) aborts the run.

use crate::approval::ApprovalStore;
use crate::error::{ErrorKind, Result};
use crate::facade::Visibility;
use crate::stats::StatsStore;
use crate::store::MetadataStore;
use exn::ResultExt;
use pkgmirror_fetch::strategy::v1::{ProviderEntry, parse_providers};
use pkgmirror_fetch::strategy::{changes, fetch_root, v1, v2};
use pkgmirror_fetch::{ClientHandle, FetchLoop};
use pkgmirror_protocol::{Include, Protocol, ProviderInclude, RepositoryOptions, RootDocument, SyncStats};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncFlags {
    /// Delete everything stored for the mirror (documents, approvals,
    /// statistics) before syncing.
    pub full_reset: bool,
    /// A human asked for this sync; never short-circuit on an unchanged root.
    pub ui_triggered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Updated,
    Skipped,
}

pub struct SyncOrchestrator {
    store: Arc<MetadataStore>,
    approvals: ApprovalStore,
    stats: StatsStore,
    client: ClientHandle,
    base: RepositoryOptions,
    visibility: Visibility,
    fetch: FetchLoop,
}

fn to_bytes(doc: &Map<String, Value>) -> Result<Vec<u8>> {
    serde_json::to_vec(doc).or_raise(|| ErrorKind::Protocol)
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<MetadataStore>,
        approvals: ApprovalStore,
        stats: StatsStore,
        client: ClientHandle,
        base: RepositoryOptions,
        visibility: Visibility,
        fetch: FetchLoop,
    ) -> Self {
        Self {
            store,
            approvals,
            stats,
            client,
            base,
            visibility,
            fetch,
        }
    }

    /// Checked before every write: a response that lands after cancellation
    /// is dropped rather than stored.
    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.fetch.cancel_token().is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(mirror = self.base.name()))]
    pub async fn run(&self, flags: SyncFlags) -> Result<SyncStats> {
        self.ensure_not_cancelled()?;
        if flags.full_reset {
            self.reset().await?;
        }
        let previous = self.stats.load().await?;

        let root = fetch_root(self.client.as_ref(), &self.base).await.map_err(ErrorKind::fetch)?;
        let options = self.base.with_root(root.clone()).with_stats(previous.clone());
        info!(protocol = ?options.protocol(), "fetched root document");
        let mut stats = SyncStats {
            pkg_updated: 0,
            ..previous.clone()
        };

        match options.protocol() {
            Protocol::V2Lazy => {
                let (updated, cursor, enabled) = self.sync_enabled_v2(&options, &previous).await?;
                stats.pkg_updated = updated;
                stats.pkg_total = enabled;
                stats.metadata_timestamp = cursor;
                self.persist_root(&root).await?;
                return self.finish(stats).await;
            },
            Protocol::V2Metadata => {
                let (updated, cursor, _) = self.sync_enabled_v2(&options, &previous).await?;
                stats.pkg_updated += updated;
                stats.metadata_timestamp = cursor;
            },
            Protocol::V1Provider { .. } | Protocol::LegacyInline => {},
        }

        if !flags.ui_triggered && self.store.is_root_fresh(&root).await? {
            info!("root document unchanged");
            self.store.touch_root().await?;
            return self.finish(stats).await;
        }

        let providers = self.load_provider_includes(&options).await?;
        let (included, include_updates) = self.load_includes(&options).await?;
        stats.pkg_updated += include_updates;

        let mut seen = HashSet::new();
        let catalog: Vec<String> = root
            .packages()
            .map(|packages| packages.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .chain(included)
            .chain(providers.iter().map(|entry| entry.name.clone()))
            .filter(|name| seen.insert(name.clone()))
            .collect();
        stats.pkg_total = catalog.len() as u64;
        stats.available_packages = self
            .visibility
            .catalog(catalog.iter(), options.config().available_packages_limit);
        debug!(total = stats.pkg_total, "computed package catalog");

        let eager_v1 = options.has_v1() && root.providers_url().is_some() && !options.is_lazy();
        if eager_v1 {
            stats.pkg_updated += self.sync_providers_v1(&options, providers).await?;
        } else if options.protocol() == (Protocol::V1Provider { lazy: true }) {
            // Persist the root first so on-demand requests work during the refresh.
            self.store.dump_root_meta(&root).await?;
            stats.pkg_updated += self.sync_enabled_v1(&options).await?;
            return self.finish(stats).await;
        }

        self.store.dump_root_meta(&root).await?;
        self.finish(stats).await
    }

    /// Delete every document, approval and statistic of the mirror.
    pub async fn reset(&self) -> Result<()> {
        let removed = self.store.clear().await?;
        self.approvals.clear().await?;
        self.stats.clear().await?;
        info!(removed, "mirror reset");
        Ok(())
    }

    async fn finish(&self, mut stats: SyncStats) -> Result<SyncStats> {
        stats.last_sync = Some(UtcDateTime::now().unix_timestamp());
        self.stats.save(&stats).await?;
        info!(total = stats.pkg_total, updated = stats.pkg_updated, "sync complete");
        Ok(stats)
    }

    /// Write the root only when it changed; otherwise bump its timestamp.
    async fn persist_root(&self, root: &RootDocument) -> Result<()> {
        if self.store.is_root_fresh(root).await? {
            self.store.touch_root().await
        } else {
            self.store.dump_root_meta(root).await
        }
    }

    fn tally(&self, results: Vec<(String, Result<Outcome>)>) -> u64 {
        let mut updated = 0;
        for (package, result) in results {
            match result {
                Ok(Outcome::Updated) => updated += 1,
                Ok(Outcome::Skipped) => debug!(package = %package, "skipped"),
                Err(err) if err.is_not_found() => debug!(package = %package, "not found upstream"),
                Err(err) => warn!(package = %package, error = ?err, "could not sync package"),
            }
        }
        updated
    }

    // =========================================================================
    // v2
    // =========================================================================

    /// Refresh the enabled set over v2. Returns the number of packages
    /// written, the new changes-feed cursor and the size of the set.
    async fn sync_enabled_v2(
        &self,
        options: &RepositoryOptions,
        previous: &SyncStats,
    ) -> Result<(u64, Option<i64>, u64)> {
        let enabled = self.approvals.enabled().await?;
        let (targets, cursor) = self.v2_targets(options, previous, &enabled).await?;
        info!(enabled = enabled.len(), targets = targets.len(), "syncing enabled packages over v2");

        let results = self
            .fetch
            .run(targets.into_iter().map(|name| (name, ())), |name, ()| self.sync_v2_package(options, name))
            .await
            .map_err(ErrorKind::fetch)?;
        Ok((self.tally(results), cursor, enabled.len() as u64))
    }

    async fn sync_v2_package(&self, options: &RepositoryOptions, name: String) -> Result<Outcome> {
        let doc = v2::fetch_package(self.client.as_ref(), options, &name)
            .await
            .map_err(ErrorKind::fetch)?;
        self.ensure_not_cancelled()?;
        self.store.dump_package(&name, &to_bytes(&doc)?, None).await?;
        Ok(Outcome::Updated)
    }

    /// Which enabled packages need fetching, and the cursor to store.
    ///
    /// Without a changes feed, or without a previous cursor, or when the feed
    /// asks for a resync, every enabled package is fetched. Otherwise only
    /// updated packages and packages never stored are; packages deleted
    /// upstream are removed from the store and not fetched.
    async fn v2_targets(
        &self,
        options: &RepositoryOptions,
        previous: &SyncStats,
        enabled: &BTreeSet<String>,
    ) -> Result<(BTreeSet<String>, Option<i64>)> {
        if !options.has_changes_feed() {
            return Ok((enabled.clone(), None));
        }
        let Some(since) = previous.metadata_timestamp else {
            // Take the cursor before fetching so nothing published meanwhile is missed.
            let cursor = match changes::fetch_cursor(self.client.as_ref(), options).await {
                Ok(timestamp) => Some(timestamp),
                Err(err) => {
                    warn!(error = ?err, "could not read changes feed cursor");
                    None
                },
            };
            return Ok((enabled.clone(), cursor));
        };

        let feed = match changes::fetch_changes(self.client.as_ref(), options, since).await {
            Ok(feed) => feed,
            Err(err) => {
                warn!(error = ?err, "changes feed unavailable, refreshing every enabled package");
                return Ok((enabled.clone(), Some(since)));
            },
        };
        if feed.requires_resync() {
            info!(since, "changes feed requested a resync");
            return Ok((enabled.clone(), Some(feed.timestamp)));
        }

        let deleted = feed.deleted();
        for package in deleted.intersection(enabled) {
            let removed = self.store.remove_package(package).await?;
            debug!(package = %package, removed, "removed package deleted upstream");
        }
        let updated = feed.updated();
        let mut targets = BTreeSet::new();
        for package in enabled.difference(&deleted) {
            if updated.contains(package) || !self.store.has_package(package, None).await? {
                targets.insert(package.clone());
            }
        }
        Ok((targets, Some(feed.timestamp)))
    }

    // =========================================================================
    // v1 and includes
    // =========================================================================

    /// Load every provider include, from the store when its pinned hash is
    /// already there, and return the packages they list.
    async fn load_provider_includes(&self, options: &RepositoryOptions) -> Result<Vec<ProviderEntry>> {
        let Some(root) = options.root() else {
            return Ok(Vec::new());
        };
        let includes = root.provider_includes();
        let results = self
            .fetch
            .run(includes.into_iter().map(|include| (include.key(), include)), |key, include| {
                self.load_provider_include(options, key, include)
            })
            .await
            .map_err(ErrorKind::fetch)?;

        let mut entries = Vec::new();
        for (key, result) in results {
            match result {
                Ok(doc) => entries.extend(parse_providers(&doc)),
                Err(err) => warn!(include = %key, error = ?err, "could not load provider include"),
            }
        }
        Ok(entries)
    }

    async fn load_provider_include(
        &self,
        options: &RepositoryOptions,
        key: String,
        include: ProviderInclude,
    ) -> Result<Map<String, Value>> {
        if include.sha256.is_some()
            && let Some(record) = self.store.find_provider_metadata(&key).await?
        {
            return record.json().or_raise(|| ErrorKind::Protocol);
        }
        let doc = v1::fetch_provider_include(self.client.as_ref(), options, &include)
            .await
            .map_err(ErrorKind::fetch)?;
        self.ensure_not_cancelled()?;
        self.store.dump_provider(&key, &to_bytes(&doc)?).await?;
        Ok(doc)
    }

    /// Follow flat includes recursively (each path once), storing the
    /// packages of freshly fetched ones. Returns the package names seen and
    /// how many package documents were written.
    async fn load_includes(&self, options: &RepositoryOptions) -> Result<(Vec<String>, u64)> {
        let mut queue: VecDeque<Include> = options.root().map(RootDocument::includes).unwrap_or_default().into();
        let mut visited = HashSet::new();
        let mut names = Vec::new();
        let mut written = 0;
        while let Some(include) = queue.pop_front() {
            if !visited.insert(include.path.clone()) {
                continue;
            }
            self.ensure_not_cancelled()?;
            let (doc, fresh) = match self.load_include(options, &include).await {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(include = %include.path, error = ?err, "could not load include");
                    continue;
                },
            };
            let Ok(nested) = RootDocument::from_map(doc) else {
                continue;
            };
            queue.extend(nested.includes());
            let Some(packages) = nested.packages() else {
                continue;
            };
            for (name, versions) in packages {
                names.push(name.clone());
                if fresh && self.visibility.is_visible(name) {
                    let mut listing = Map::new();
                    listing.insert(name.clone(), versions.clone());
                    let mut document = Map::new();
                    document.insert("packages".to_string(), Value::Object(listing));
                    self.ensure_not_cancelled()?;
                    self.store.dump_package(name, &to_bytes(&document)?, None).await?;
                    written += 1;
                }
            }
        }
        Ok((names, written))
    }

    /// An include, and whether it was fetched (rather than read from the store).
    async fn load_include(&self, options: &RepositoryOptions, include: &Include) -> Result<(Map<String, Value>, bool)> {
        if include.sha1.is_some()
            && let Some(record) = self.store.find_provider_metadata(&include.path).await?
        {
            return Ok((record.json().or_raise(|| ErrorKind::Protocol)?, false));
        }
        let doc = v1::fetch_include(self.client.as_ref(), options, include)
            .await
            .map_err(ErrorKind::fetch)?;
        self.ensure_not_cancelled()?;
        self.store.dump_provider(&include.path, &to_bytes(&doc)?).await?;
        Ok((doc, true))
    }

    /// Eager v1: fetch every visible listed package whose pinned revision is
    /// not stored yet. Unpinned packages are always fetched.
    async fn sync_providers_v1(&self, options: &RepositoryOptions, entries: Vec<ProviderEntry>) -> Result<u64> {
        let mut todo = Vec::new();
        for entry in entries {
            if !self.visibility.is_visible(&entry.name) {
                continue;
            }
            if let Some(hash) = &entry.sha256
                && self.store.has_package(&entry.name, Some(hash)).await?
            {
                continue;
            }
            todo.push((entry.name, entry.sha256));
        }
        info!(packages = todo.len(), "syncing v1 providers");
        let results = self
            .fetch
            .run(todo, |name, hash| self.sync_v1_package(options, name, hash))
            .await
            .map_err(ErrorKind::fetch)?;
        Ok(self.tally(results))
    }

    /// Fetch and store one v1 package; a 404 is not an error here.
    async fn sync_v1_package(&self, options: &RepositoryOptions, name: String, hash: Option<String>) -> Result<Outcome> {
        let Some(doc) = v1::fetch_package(self.client.as_ref(), options, &name, hash.as_deref())
            .await
            .map_err(ErrorKind::fetch)?
        else {
            return Ok(Outcome::Skipped);
        };
        self.ensure_not_cancelled()?;
        self.store.dump_package(&name, &to_bytes(&doc)?, hash.as_deref()).await?;
        Ok(Outcome::Updated)
    }

    /// Lazy v1: refresh the enabled set through the lazy provider URL.
    async fn sync_enabled_v1(&self, options: &RepositoryOptions) -> Result<u64> {
        let enabled = self.approvals.enabled().await?;
        info!(enabled = enabled.len(), "syncing enabled packages over v1");
        let results = self
            .fetch
            .run(enabled.into_iter().map(|name| (name, None)), |name, hash| {
                self.sync_v1_package(options, name, hash)
            })
            .await
            .map_err(ErrorKind::fetch)?;
        Ok(self.tally(results))
    }
}
