use crate::HttpConfig;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_AVAILABLE_PACKAGES_LIMIT: usize = 10_000;
pub const DEFAULT_PARALLEL_REQUESTS: usize = 10;

/// One upstream registry re-published under a local name.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Base URL of the upstream repository; `packages.json` is resolved against it.
    pub url: Url,
    /// Fetch packages on first request instead of mirroring the whole catalog.
    #[serde(default)]
    pub lazy: bool,
    /// Only approved packages are visible to consumers.
    #[serde(default)]
    pub strict: bool,
    /// Cache dist archives locally.
    #[serde(default)]
    pub dist_mirror: bool,
    #[serde(default)]
    pub disable_v1: bool,
    #[serde(default)]
    pub disable_v2: bool,
    /// Static allow-list of package names. Empty allows everything.
    #[serde(default)]
    pub available_packages: Vec<String>,
    /// Glob patterns (`*` wildcard) of allowed package names. Empty allows everything.
    #[serde(default)]
    pub available_package_patterns: Vec<String>,
    #[serde(default = "default_available_packages_limit")]
    pub available_packages_limit: usize,
    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,
    #[serde(default)]
    pub http: HttpConfig,
    /// Path prefix under which this mirror is served, used when rewriting the
    /// root document for strict mode. Defaults to `/<name>`.
    #[serde(default)]
    pub public_prefix: Option<String>,
}

fn default_available_packages_limit() -> usize {
    DEFAULT_AVAILABLE_PACKAGES_LIMIT
}

fn default_parallel_requests() -> usize {
    DEFAULT_PARALLEL_REQUESTS
}

impl MirrorConfig {
    /// Configuration with every optional field at its default.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            lazy: false,
            strict: false,
            dist_mirror: false,
            disable_v1: false,
            disable_v2: false,
            available_packages: Vec::new(),
            available_package_patterns: Vec::new(),
            available_packages_limit: DEFAULT_AVAILABLE_PACKAGES_LIMIT,
            parallel_requests: DEFAULT_PARALLEL_REQUESTS,
            http: HttpConfig::default(),
            public_prefix: None,
        }
    }

    pub fn public_prefix(&self, name: &str) -> String {
        match &self.public_prefix {
            Some(prefix) => prefix.trim_end_matches('/').to_string(),
            None => format!("/{name}"),
        }
    }

    /// Whether any static filter (names or patterns) is configured.
    pub fn has_static_filter(&self) -> bool {
        !self.available_packages.is_empty() || !self.available_package_patterns.is_empty()
    }
}
