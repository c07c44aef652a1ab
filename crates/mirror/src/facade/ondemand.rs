use super::{MetadataSource, expand_record};
use crate::approval::ApprovalStore;
use crate::error::{ErrorKind, Result};
use crate::store::MetadataStore;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use pkgmirror_fetch::ClientHandle;
use pkgmirror_fetch::strategy::{fetch_root, v1, v2};
use pkgmirror_protocol::{MetadataRecord, Protocol, RepositoryOptions};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

/// Serves from the metadata store, fetching missing packages on demand when
/// the repository is lazy.
///
/// Eager repositories never fetch at request time: a miss is
/// [`NotFound`](ErrorKind::NotFound) until the next sync.
pub struct OnDemandFacade {
    store: Arc<MetadataStore>,
    approvals: ApprovalStore,
    client: ClientHandle,
    base: RepositoryOptions,
    options: OnceCell<RepositoryOptions>,
}

impl OnDemandFacade {
    /// `options` may already carry the stored root; otherwise it is loaded on
    /// first use.
    pub fn new(
        store: Arc<MetadataStore>,
        approvals: ApprovalStore,
        client: ClientHandle,
        options: RepositoryOptions,
    ) -> Self {
        let loaded = options.root().is_some().then(|| options.clone());
        Self {
            store,
            approvals,
            client,
            base: options,
            options: OnceCell::new_with(loaded),
        }
    }

    /// Options with a root document: the stored one, or for a lazy mirror
    /// that was never synced, the upstream one (which is then stored).
    pub async fn options(&self) -> Result<&RepositoryOptions> {
        self.options.get_or_try_init(|| self.load_options()).await
    }

    async fn load_options(&self) -> Result<RepositoryOptions> {
        if let Some(root) = self.store.root_document().await? {
            return Ok(self.base.with_root(root));
        }
        if !self.base.config().lazy {
            exn::bail!(ErrorKind::NotFound(format!(
                "mirror {} has not been synced yet",
                self.base.name()
            )));
        }
        info!(mirror = self.base.name(), "fetching root document on first request");
        let root = fetch_root(self.client.as_ref(), &self.base).await.map_err(ErrorKind::fetch)?;
        self.store.dump_root_meta(&root).await?;
        Ok(self.base.with_root(root))
    }

    async fn mark_enabled(&self, name: &str) {
        if let Err(err) = self.approvals.mark_enabled([name]).await {
            warn!(package = name, error = ?err, "could not mark package as enabled");
        }
    }

    async fn fetch_package(
        &self,
        options: &RepositoryOptions,
        name: &str,
        hash: Option<&str>,
    ) -> Result<(Map<String, Value>, Option<String>)> {
        match options.protocol() {
            Protocol::V2Lazy => {
                let doc = v2::fetch_package(self.client.as_ref(), options, name)
                    .await
                    .map_err(ErrorKind::fetch)?;
                Ok((doc, None))
            },
            Protocol::V1Provider { lazy: true } => {
                let doc = v1::fetch_package(self.client.as_ref(), options, name, hash)
                    .await
                    .map_err(ErrorKind::fetch)?
                    .ok_or_raise(|| ErrorKind::NotFound(name.to_string()))?;
                Ok((doc, hash.map(str::to_string)))
            },
            Protocol::V2Metadata | Protocol::V1Provider { lazy: false } | Protocol::LegacyInline => {
                exn::bail!(ErrorKind::NotFound(format!(
                    "{name} is not mirrored; eager repositories only serve packages fetched by a sync"
                )))
            },
        }
    }
}

#[async_trait]
impl MetadataSource for OnDemandFacade {
    async fn root_metadata(&self) -> Result<MetadataRecord> {
        let options = self.options().await?;
        self.store
            .root_metadata()
            .await?
            .ok_or_raise(|| ErrorKind::NotFound(format!("root document of {}", options.name())))
    }

    #[instrument(level = "debug", skip(self), fields(mirror = self.base.name()))]
    async fn find_package_metadata(&self, name: &str, hash: Option<&str>) -> Result<MetadataRecord> {
        let name = &name.to_lowercase();
        if let Some(record) = self.store.find_package_metadata(name, hash).await? {
            self.mark_enabled(name).await;
            return expand_record(record);
        }
        let options = self.options().await?;
        let (doc, hash) = self.fetch_package(options, name, hash).await?;
        let content = serde_json::to_vec(&Value::Object(doc)).or_raise(|| ErrorKind::Protocol)?;
        self.store.dump_package(name, &content, hash.as_deref()).await?;
        self.mark_enabled(name).await;
        info!(package = name, "fetched package on demand");
        let record = MetadataRecord::now(content);
        expand_record(match hash {
            Some(hash) => record.with_hash(hash),
            None => record,
        })
    }

    async fn find_provider_metadata(&self, key: &str) -> Result<MetadataRecord> {
        if let Some(record) = self.store.find_provider_metadata(key).await? {
            return Ok(record);
        }
        let options = self.options().await?;
        let include = options
            .is_lazy()
            .then(|| options.root().map(|root| root.provider_includes()))
            .flatten()
            .and_then(|includes| includes.into_iter().find(|include| include.key() == key))
            .ok_or_raise(|| ErrorKind::NotFound(key.to_string()))?;
        let doc = v1::fetch_provider_include(self.client.as_ref(), options, &include)
            .await
            .map_err(ErrorKind::fetch)?;
        let content = serde_json::to_vec(&Value::Object(doc)).or_raise(|| ErrorKind::Protocol)?;
        self.store.dump_provider(key, &content).await?;
        Ok(MetadataRecord::now(content))
    }
}
