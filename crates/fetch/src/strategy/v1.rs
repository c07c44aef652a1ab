//! Composer 1 providers.

use super::{fetch_json, fetch_json_optional};
use crate::client::HttpClient;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgmirror_protocol::{Include, ProviderInclude, RepositoryOptions};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// One package listed by a provider include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub name: String,
    pub sha256: Option<String>,
}

/// Entries of a `{"providers": {name: {"sha256": hash}}}` document.
pub fn parse_providers(doc: &Map<String, Value>) -> Vec<ProviderEntry> {
    let Some(providers) = doc.get("providers").and_then(Value::as_object) else {
        return Vec::new();
    };
    providers
        .iter()
        .map(|(name, pin)| ProviderEntry {
            name: name.clone(),
            sha256: pin.get("sha256").and_then(Value::as_str).map(str::to_string),
        })
        .collect()
}

/// Fetch a provider include listed in the root.
#[instrument(level = "debug", skip(client, options), fields(mirror = options.name(), include = %include.key()))]
pub async fn fetch_provider_include(
    client: &dyn HttpClient,
    options: &RepositoryOptions,
    include: &ProviderInclude,
) -> Result<Map<String, Value>> {
    let url = options.resolve(&include.key()).or_raise(|| ErrorKind::Protocol)?;
    fetch_json(client, &url).await
}

/// Fetch a flat include (a `packages` document).
#[instrument(level = "debug", skip(client, options), fields(mirror = options.name(), include = %include.path))]
pub async fn fetch_include(
    client: &dyn HttpClient,
    options: &RepositoryOptions,
    include: &Include,
) -> Result<Map<String, Value>> {
    let url = options.resolve(&include.path).or_raise(|| ErrorKind::Protocol)?;
    fetch_json(client, &url).await
}

/// Fetch one package document, hash-qualified when pinned.
///
/// A 404 means the package is not served by this chunk and yields `None`.
#[instrument(level = "debug", skip(client, options), fields(mirror = options.name()))]
pub async fn fetch_package(
    client: &dyn HttpClient,
    options: &RepositoryOptions,
    package: &str,
    hash: Option<&str>,
) -> Result<Option<Map<String, Value>>> {
    let Some(url) = options.provider_url(package, hash).or_raise(|| ErrorKind::Protocol)? else {
        return Ok(None);
    };
    let doc = fetch_json_optional(client, &url).await?;
    if doc.is_none() {
        debug!(%url, "package not in this chunk");
    }
    Ok(doc)
}
