//! Composer 2 per-package metadata.

use super::fetch_json_optional;
use crate::client::HttpClient;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use pkgmirror_protocol::RepositoryOptions;
use pkgmirror_protocol::minify::merge_stable_and_dev;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

/// Fetch the stable and `~dev` listings of one package and merge them into a
/// single minified document.
///
/// Both requests are in flight together. A missing half is tolerated; when
/// both are missing the package is [`NotFound`](ErrorKind::NotFound).
#[instrument(level = "debug", skip(client, options), fields(mirror = options.name()))]
pub async fn fetch_package(
    client: &dyn HttpClient,
    options: &RepositoryOptions,
    package: &str,
) -> Result<Map<String, Value>> {
    let stable_url = options
        .metadata_url(package, false)
        .or_raise(|| ErrorKind::Protocol)?
        .ok_or_raise(|| ErrorKind::Protocol)?;
    let dev_url = options
        .metadata_url(package, true)
        .or_raise(|| ErrorKind::Protocol)?
        .ok_or_raise(|| ErrorKind::Protocol)?;

    let (stable, dev) = futures::join!(
        fetch_json_optional(client, &stable_url),
        fetch_json_optional(client, &dev_url),
    );
    let (stable, dev) = (stable?, dev?);
    debug!(stable = stable.is_some(), dev = dev.is_some(), "fetched v2 pair");
    merge_stable_and_dev(package, stable.as_ref(), dev.as_ref())
        .ok_or_raise(|| ErrorKind::NotFound(stable_url.to_string()))
}
