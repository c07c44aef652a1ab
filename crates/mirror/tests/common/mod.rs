#![allow(dead_code)]

use pkgmirror_config::MirrorConfig;
use pkgmirror_fetch::mock::MockClient;
use pkgmirror_kv::{Database, KeyValue};
use pkgmirror_mirror::Mirror;
use pkgmirror_storage::backend::MockBackend;
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

pub const UPSTREAM: &str = "https://repo.example.org/";
pub const ROOT_URL: &str = "https://repo.example.org/packages.json";

pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub client: Arc<MockClient>,
    pub mirror: Mirror,
    // Keeps the in-memory database alive for the duration of the test.
    _db: Database,
}

pub fn config(edit: impl FnOnce(&mut MirrorConfig)) -> MirrorConfig {
    let mut config = MirrorConfig::new(Url::parse(UPSTREAM).unwrap());
    edit(&mut config);
    config
}

pub async fn harness(config: MirrorConfig, client: MockClient) -> Harness {
    harness_with_local(config, client, Vec::new()).await
}

pub async fn harness_with_local(config: MirrorConfig, client: MockClient, local: Vec<String>) -> Harness {
    let db = Database::connect_in_memory().await.unwrap();
    let backend = Arc::new(MockBackend::default());
    let client = Arc::new(client);
    let mirror = Mirror::new(
        "upstream",
        Arc::new(config),
        local,
        backend.clone(),
        KeyValue::from(&db),
        client.clone(),
    )
    .unwrap();
    Harness {
        backend,
        client,
        mirror,
        _db: db,
    }
}

/// A v2 listing as upstream serves it: minified, one package.
pub fn v2_listing(package: &str, versions: &[&str]) -> Value {
    let versions: Vec<Value> = versions
        .iter()
        .map(|version| json!({"name": package, "version": version, "version_normalized": format!("{version}.0")}))
        .collect();
    json!({
        "minified": "composer/2.0",
        "packages": {package: pkgmirror_protocol::minify::minify(&versions)},
    })
}
