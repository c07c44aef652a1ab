use crate::approval::ApprovalStore;
use crate::dist::DistResolver;
use crate::error::{ErrorKind, Result};
use crate::facade::{AclFacade, CallerScope, OnDemandFacade, PackageFilter, SourceHandle, Visibility};
use crate::stats::StatsStore;
use crate::store::MetadataStore;
use crate::sync::SyncOrchestrator;
use exn::ResultExt;
use pkgmirror_config::{Config, MirrorConfig};
use pkgmirror_fetch::{CancellationToken, ClientHandle, FetchLoop, Progress, ReqwestClient};
use pkgmirror_kv::KeyValue;
use pkgmirror_protocol::RepositoryOptions;
use pkgmirror_storage::BackendHandle;
use std::sync::Arc;
use tracing::debug;

/// Everything one configured mirror needs, wired together.
///
/// Cheap to clone; components built from it share the same store, key-value
/// connection and HTTP client.
#[derive(Clone)]
pub struct Mirror {
    options: RepositoryOptions,
    store: Arc<MetadataStore>,
    backend: BackendHandle,
    approvals: ApprovalStore,
    stats: StatsStore,
    client: ClientHandle,
    visibility: Visibility,
}

impl Mirror {
    pub fn new(
        name: &str,
        config: Arc<MirrorConfig>,
        local_packages: impl IntoIterator<Item = String>,
        backend: BackendHandle,
        kv: KeyValue,
        client: ClientHandle,
    ) -> Result<Self> {
        let filter = PackageFilter::from_config(&config)?;
        Ok(Self {
            options: RepositoryOptions::new(name, config),
            store: Arc::new(MetadataStore::new(backend.clone(), name)),
            backend,
            approvals: ApprovalStore::new(kv.clone(), name),
            stats: StatsStore::new(kv, name),
            client,
            visibility: Visibility::new(local_packages, filter),
        })
    }

    /// Build the named mirror from application configuration, with a real
    /// HTTP client.
    pub fn from_config(config: &Config, name: &str, backend: BackendHandle, kv: KeyValue) -> Result<Self> {
        let mirror = config.mirror(name).or_raise(|| ErrorKind::Config)?;
        let client = ReqwestClient::new(&mirror.http).or_raise(|| ErrorKind::Config)?;
        debug!(mirror = name, url = %mirror.url, "configured mirror");
        Self::new(
            name,
            Arc::new(mirror.clone()),
            config.local_packages.iter().cloned(),
            backend,
            kv,
            Arc::new(client),
        )
    }

    pub fn name(&self) -> &str {
        self.options.name()
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn approvals(&self) -> &ApprovalStore {
        &self.approvals
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn ondemand(&self) -> OnDemandFacade {
        OnDemandFacade::new(
            self.store.clone(),
            self.approvals.clone(),
            self.client.clone(),
            self.options.clone(),
        )
    }

    /// Request-time view for a caller: access checks over on-demand fetching.
    pub fn facade(&self, scope: CallerScope) -> AclFacade {
        AclFacade::new(
            Arc::new(self.ondemand()),
            self.approvals.clone(),
            self.options.clone(),
            self.visibility.clone(),
            scope,
        )
    }

    pub fn sync(&self, cancel: CancellationToken) -> SyncOrchestrator {
        self.sync_with_progress(cancel, |_| {})
    }

    pub fn sync_with_progress(
        &self,
        cancel: CancellationToken,
        progress: impl Fn(Progress) + Send + Sync + 'static,
    ) -> SyncOrchestrator {
        let fetch = FetchLoop::new(self.options.config().parallel_requests, cancel).with_progress(progress);
        SyncOrchestrator::new(
            self.store.clone(),
            self.approvals.clone(),
            self.stats.clone(),
            self.client.clone(),
            self.options.clone(),
            self.visibility.clone(),
            fetch,
        )
    }

    /// Archive resolver; needs the root document for its dist mirrors, so a
    /// lazy mirror that was never synced fetches it here.
    pub async fn dist(&self) -> Result<DistResolver> {
        let ondemand = self.ondemand();
        let options = ondemand.options().await?.clone();
        let source: SourceHandle = Arc::new(AclFacade::new(
            Arc::new(ondemand),
            self.approvals.clone(),
            options.clone(),
            self.visibility.clone(),
            CallerScope::Full,
        ));
        Ok(DistResolver::new(source, self.backend.clone(), self.client.clone(), options))
    }
}
