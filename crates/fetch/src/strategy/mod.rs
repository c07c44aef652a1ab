//! Protocol-specific fetches built on [`HttpClient`].

pub mod changes;
pub mod v1;
pub mod v2;

use crate::client::HttpClient;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgmirror_protocol::{MetadataRecord, RepositoryOptions, RootDocument};
use serde_json::{Map, Value};
use tracing::instrument;
use url::Url;

/// Fetch and validate the upstream root document.
#[instrument(skip_all, fields(mirror = options.name()))]
pub async fn fetch_root(client: &dyn HttpClient, options: &RepositoryOptions) -> Result<RootDocument> {
    let url = options.root_url().or_raise(|| ErrorKind::Protocol)?;
    let body = client.get(&url).await?;
    RootDocument::parse(&body).or_raise(|| ErrorKind::Protocol)
}

/// Fetch a document that must be a JSON object.
pub async fn fetch_json(client: &dyn HttpClient, url: &Url) -> Result<Map<String, Value>> {
    let body = client.get(url).await?;
    MetadataRecord::now(body).json().or_raise(|| ErrorKind::Protocol)
}

/// Like [`fetch_json`], but a 404 is `None`.
pub async fn fetch_json_optional(client: &dyn HttpClient, url: &Url) -> Result<Option<Map<String, Value>>> {
    match fetch_json(client, url).await {
        Ok(doc) => Ok(Some(doc)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
