//! Request-time access to mirrored metadata.
//!
//! [`OnDemandFacade`] serves from the [`MetadataStore`](crate::store::MetadataStore)
//! and, for lazy repositories, fetches and stores missing packages on the
//! spot. [`AclFacade`] wraps any [`MetadataSource`] with entitlement checks.

mod acl;
mod ondemand;

pub use self::acl::{AclFacade, CallerScope, PackageFilter, Visibility};
pub use self::ondemand::OnDemandFacade;

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use pkgmirror_protocol::MetadataRecord;
use pkgmirror_protocol::minify::{expand_document, is_minified};
use serde_json::Value;
use std::sync::Arc;

pub type SourceHandle = Arc<dyn MetadataSource + Send + Sync>;

/// Read side of a mirror. Absence is an error here
/// ([`NotFound`](crate::error::ErrorKind::NotFound)): a request either gets a
/// document or a reason.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn root_metadata(&self) -> Result<MetadataRecord>;

    /// Package document with every version list fully expanded.
    async fn find_package_metadata(&self, name: &str, hash: Option<&str>) -> Result<MetadataRecord>;

    async fn find_provider_metadata(&self, key: &str) -> Result<MetadataRecord>;
}

/// Re-encode a record so that no minified version list leaks to consumers.
pub(crate) fn expand_record(record: MetadataRecord) -> Result<MetadataRecord> {
    let doc = record.json().or_raise(|| ErrorKind::Protocol)?;
    if !is_minified(&doc) {
        return Ok(record);
    }
    let content = serde_json::to_vec(&Value::Object(expand_document(doc))).or_raise(|| ErrorKind::Protocol)?;
    let mut expanded = MetadataRecord::new(content, record.captured_at());
    if let Some(hash) = record.hash() {
        expanded = expanded.with_hash(hash);
    }
    for (key, value) in record.options() {
        expanded = expanded.with_option(key, value);
    }
    Ok(expanded)
}
