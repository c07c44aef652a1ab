use super::{MetadataSource, SourceHandle};
use crate::approval::ApprovalStore;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use pkgmirror_config::MirrorConfig;
use pkgmirror_protocol::{MetadataRecord, RepositoryOptions, RootDocument};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallerScope {
    #[default]
    Full,
    /// May only see packages that are already enabled on the mirror.
    Restricted,
}

/// Static allow-list from configuration: exact names plus `*` globs.
/// An empty filter allows everything.
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

fn glob_to_regex(glob: &str) -> Result<Regex> {
    let pattern = glob.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    Regex::new(&format!("(?i)^{pattern}$")).or_raise(|| ErrorKind::Config)
}

impl PackageFilter {
    pub fn new<N, P>(names: N, patterns: P) -> Result<Self>
    where
        N: IntoIterator<Item = String>,
        P: IntoIterator<Item = String>,
    {
        Ok(Self {
            names: names.into_iter().map(|name| name.to_lowercase()).collect(),
            patterns: patterns.into_iter().map(|glob| glob_to_regex(&glob)).collect::<Result<_>>()?,
        })
    }

    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        Self::new(config.available_packages.clone(), config.available_package_patterns.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.patterns.is_empty()
    }

    pub fn allows(&self, name: &str) -> bool {
        self.is_empty()
            || self.names.contains(&name.to_lowercase())
            || self.patterns.iter().any(|pattern| pattern.is_match(name))
    }
}

/// Everything besides approvals that hides an upstream package: first-party
/// name collisions and the static filter.
#[derive(Debug, Clone, Default)]
pub struct Visibility {
    local_packages: Arc<HashSet<String>>,
    filter: Arc<PackageFilter>,
}

impl Visibility {
    pub fn new(local_packages: impl IntoIterator<Item = String>, filter: PackageFilter) -> Self {
        Self {
            local_packages: Arc::new(local_packages.into_iter().map(|name| name.to_lowercase()).collect()),
            filter: Arc::new(filter),
        }
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.local_packages.contains(&name.to_lowercase())
    }

    pub fn is_visible(&self, name: &str) -> bool {
        !self.is_local(name) && self.filter.allows(name)
    }

    /// Visible names in input order, at most `limit` of them. Filtering
    /// happens before truncation.
    pub fn catalog<'a>(&self, names: impl IntoIterator<Item = &'a String>, limit: usize) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| self.is_visible(name))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Entitlement checks in front of a [`MetadataSource`].
///
/// Checks run in order and the first failure wins:
/// 1. restricted callers only see enabled packages,
/// 2. strict mirrors only serve approved packages,
/// 3. upstream packages named like a first-party package are hidden,
/// 4. the static allow-list applies.
///
/// The first two are [`ApprovalRestricted`](ErrorKind::ApprovalRestricted),
/// the last two [`NotFound`](ErrorKind::NotFound).
pub struct AclFacade {
    inner: SourceHandle,
    approvals: ApprovalStore,
    options: RepositoryOptions,
    visibility: Visibility,
    scope: CallerScope,
}

impl AclFacade {
    pub fn new(
        inner: SourceHandle,
        approvals: ApprovalStore,
        options: RepositoryOptions,
        visibility: Visibility,
        scope: CallerScope,
    ) -> Self {
        Self {
            inner,
            approvals,
            options,
            visibility,
            scope,
        }
    }

    async fn check(&self, name: &str) -> Result<()> {
        if self.scope == CallerScope::Restricted && !self.approvals.is_enabled(name).await? {
            exn::bail!(ErrorKind::ApprovalRestricted(name.to_string()));
        }
        if self.options.is_strict() && !self.approvals.is_approved(name).await? {
            exn::bail!(ErrorKind::ApprovalRestricted(name.to_string()));
        }
        if self.visibility.is_local(name) {
            debug!(package = name, "hiding upstream package shadowing a local package");
            exn::bail!(ErrorKind::NotFound(name.to_string()));
        }
        if !self.visibility.is_visible(name) {
            exn::bail!(ErrorKind::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Root for strict mode: lazy providers only, no inline packages, and an
    /// `available-packages` hint listing the approved subset.
    fn strict_root(&self, upstream: &RootDocument, approved: &BTreeSet<String>) -> Map<String, Value> {
        let options = self.options.with_root(upstream.clone());
        let prefix = options.config().public_prefix(options.name());
        let limit = options.config().available_packages_limit;
        let mut root = Map::new();
        root.insert("packages".to_string(), json!({}));
        if options.has_v2() {
            root.insert("metadata-url".to_string(), json!(format!("{prefix}/p2/%package%.json")));
        }
        if options.has_v1() || !options.has_v2() {
            root.insert("providers-lazy-url".to_string(), json!(format!("{prefix}/p/%package%.json")));
        }
        root.insert(
            "available-packages".to_string(),
            json!(self.visibility.catalog(approved.iter(), limit)),
        );
        root
    }
}

#[async_trait]
impl MetadataSource for AclFacade {
    async fn root_metadata(&self) -> Result<MetadataRecord> {
        let record = self.inner.root_metadata().await?;
        if !self.options.is_strict() {
            return Ok(record);
        }
        let upstream = RootDocument::parse(record.content()).or_raise(|| ErrorKind::Protocol)?;
        let approved = self.approvals.approved().await?;
        let rewritten = self.strict_root(&upstream, &approved);
        let content = serde_json::to_vec(&Value::Object(rewritten)).or_raise(|| ErrorKind::Protocol)?;
        Ok(MetadataRecord::new(content, record.captured_at()))
    }

    async fn find_package_metadata(&self, name: &str, hash: Option<&str>) -> Result<MetadataRecord> {
        // Composer package names are case-insensitive.
        let name = &name.to_lowercase();
        self.check(name).await?;
        self.inner.find_package_metadata(name, hash).await
    }

    async fn find_provider_metadata(&self, key: &str) -> Result<MetadataRecord> {
        // Strict roots only advertise lazy providers, so listings stay hidden.
        if self.options.is_strict() {
            exn::bail!(ErrorKind::NotFound(key.to_string()));
        }
        self.inner.find_provider_metadata(key).await
    }
}
