use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde_json::{Map, Value};

/// Keys of which a root document must carry at least one.
const REQUIRED_KEYS: [&str; 4] = ["packages", "includes", "providers-url", "metadata-url"];

/// `provider-includes` entry: a provider listing, optionally pinned by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInclude {
    /// Path template, usually containing `%hash%`.
    pub template: String,
    pub sha256: Option<String>,
}
impl ProviderInclude {
    /// Storage key: the template with the pinned hash substituted, so an
    /// upstream change produces a new key.
    pub fn key(&self) -> String {
        match &self.sha256 {
            Some(hash) => self.template.replace("%hash%", hash),
            None => self.template.replace("$%hash%", "").replace("%hash%", ""),
        }
    }
}

/// Flat `includes` entry: a packages document, optionally pinned by SHA-1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub path: String,
    pub sha1: Option<String>,
}

/// Dist mirror advertised in the root's `mirrors` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistMirror {
    /// Template with `%package%`, `%version%`, `%reference%` and `%type%`.
    pub dist_url: String,
    pub preferred: bool,
}

/// Top-level repository descriptor (`packages.json`).
#[derive(Debug, Clone, PartialEq)]
pub struct RootDocument {
    doc: Map<String, Value>,
}

impl RootDocument {
    /// Parse and validate a root document from (possibly gzip) bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = pkgmirror_compress::decode(bytes).or_raise(|| ErrorKind::Decode)?;
        let value: Value = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::MalformedJson)?;
        match value {
            Value::Object(doc) => Self::from_map(doc),
            _ => exn::bail!(ErrorKind::InvalidData("root document is not a JSON object".to_string())),
        }
    }

    pub fn from_map(doc: Map<String, Value>) -> Result<Self> {
        if !REQUIRED_KEYS.iter().any(|key| doc.contains_key(*key)) {
            exn::bail!(ErrorKind::InvalidData(format!(
                "root document must contain one of {}",
                REQUIRED_KEYS.join(", ")
            )));
        }
        Ok(Self { doc })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.doc).or_raise(|| ErrorKind::MalformedJson)
    }

    /// BLAKE3 hash of the canonical serialization.
    pub fn content_hash(&self) -> Result<String> {
        Ok(blake3::hash(&self.to_bytes()?).to_hex().to_string())
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.doc.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Inline `packages` map. An empty map is reported as `None`.
    pub fn packages(&self) -> Option<&Map<String, Value>> {
        self.doc.get("packages").and_then(Value::as_object).filter(|map| !map.is_empty())
    }

    pub fn providers_url(&self) -> Option<&str> {
        self.str_field("providers-url")
    }

    pub fn providers_lazy_url(&self) -> Option<&str> {
        self.str_field("providers-lazy-url")
    }

    pub fn metadata_url(&self) -> Option<&str> {
        self.str_field("metadata-url")
    }

    pub fn metadata_changes_url(&self) -> Option<&str> {
        self.str_field("metadata-changes-url")
    }

    pub fn provider_includes(&self) -> Vec<ProviderInclude> {
        let Some(map) = self.doc.get("provider-includes").and_then(Value::as_object) else {
            return Vec::new();
        };
        map.iter()
            .map(|(template, pin)| ProviderInclude {
                template: template.clone(),
                sha256: pin.get("sha256").and_then(Value::as_str).map(str::to_string),
            })
            .collect()
    }

    pub fn includes(&self) -> Vec<Include> {
        let Some(map) = self.doc.get("includes").and_then(Value::as_object) else {
            return Vec::new();
        };
        map.iter()
            .map(|(path, pin)| Include {
                path: path.clone(),
                sha1: pin.get("sha1").and_then(Value::as_str).map(str::to_string),
            })
            .collect()
    }

    /// Dist mirrors, preferred ones first, otherwise in document order.
    pub fn dist_mirrors(&self) -> Vec<DistMirror> {
        let Some(list) = self.doc.get("mirrors").and_then(Value::as_array) else {
            return Vec::new();
        };
        let mut mirrors: Vec<_> = list
            .iter()
            .filter_map(|entry| {
                Some(DistMirror {
                    dist_url: entry.get("dist-url")?.as_str()?.to_string(),
                    preferred: entry.get("preferred").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect();
        // Stable sort keeps document order within each group.
        mirrors.sort_by_key(|mirror| !mirror.preferred);
        mirrors
    }
}

/// How a repository is mirrored, computed once from its root and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Everything is inline in the root (or its flat includes).
    LegacyInline,
    /// Composer 1 providers. `lazy` repositories are only fetched on demand.
    V1Provider { lazy: bool },
    /// Composer 2 `metadata-url`, mirrored eagerly.
    V2Metadata,
    /// Composer 2 `metadata-url`, fetched on demand.
    V2Lazy,
}
impl Protocol {
    /// Pick the protocol to drive a mirror.
    ///
    /// v2 wins when both are offered. A v1 root with only a
    /// `providers-lazy-url` cannot be enumerated, so it is always lazy.
    pub fn detect(root: &RootDocument, lazy: bool, disable_v1: bool, disable_v2: bool) -> Self {
        if !disable_v2 && root.metadata_url().is_some() {
            return if lazy { Self::V2Lazy } else { Self::V2Metadata };
        }
        if !disable_v1 && (root.providers_url().is_some() || root.providers_lazy_url().is_some()) {
            let enumerable = root.providers_url().is_some() && !root.provider_includes().is_empty();
            return Self::V1Provider { lazy: lazy || !enumerable };
        }
        Self::LegacyInline
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Self::V2Lazy | Self::V1Provider { lazy: true })
    }
}
