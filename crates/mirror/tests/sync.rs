mod common;

use common::{ROOT_URL, config, harness, v2_listing};
use pkgmirror_fetch::CancellationToken;
use pkgmirror_fetch::mock::MockClient;
use pkgmirror_mirror::SyncFlags;
use pkgmirror_mirror::error::ErrorKind;
use pkgmirror_protocol::SyncStats;
use pkgmirror_storage::StorageBackend;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

const FOO_STABLE: &str = "https://repo.example.org/p2/acme/foo.json";
const FOO_DEV: &str = "https://repo.example.org/p2/acme/foo~dev.json";
const BAR_STABLE: &str = "https://repo.example.org/p2/acme/bar.json";
const BAR_DEV: &str = "https://repo.example.org/p2/acme/bar~dev.json";

fn pinned_v1_client() -> MockClient {
    MockClient::new()
        .with_json(
            ROOT_URL,
            json!({
                "packages": {},
                "providers-url": "/p/%package%$%hash%.json",
                "provider-includes": {"p/a$%hash%.json": {"sha256": "abc"}}
            }),
        )
        .with_json("https://repo.example.org/p/a$abc.json", json!({"providers": {"acme/foo": {"sha256": "f00"}}}))
        .with_json(
            "https://repo.example.org/p/acme/foo$f00.json",
            json!({"packages": {"acme/foo": {"1.0.0": {"name": "acme/foo", "version": "1.0.0"}}}}),
        )
}

fn changes_client(feed_since: i64, feed: serde_json::Value) -> MockClient {
    MockClient::new()
        .with_json(
            ROOT_URL,
            json!({
                "packages": {},
                "metadata-url": "/p2/%package%.json",
                "metadata-changes-url": "/metadata/changes.json"
            }),
        )
        .with_json(&format!("https://repo.example.org/metadata/changes.json?since={feed_since}"), feed)
        .with_json(FOO_STABLE, v2_listing("acme/foo", &["1.1.0"]))
        .with_json(BAR_STABLE, v2_listing("acme/bar", &["3.0.0"]))
}

#[tokio::test]
async fn test_pre_cancelled_sync_does_nothing() {
    let h = harness(config(|_| {}), pinned_v1_client()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.mirror.sync(cancel).run(SyncFlags::default()).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Cancelled);
    assert_eq!(h.backend.write_count(), 0);
    assert_eq!(h.client.request_count(), 0);
}

#[tokio::test]
async fn test_pinned_v1_sync_stores_hash_qualified_documents() {
    let h = harness(config(|_| {}), pinned_v1_client()).await;
    let stats = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap();

    assert_eq!(
        h.client.requests(),
        vec![
            ROOT_URL.to_string(),
            "https://repo.example.org/p/a$abc.json".to_string(),
            "https://repo.example.org/p/acme/foo$f00.json".to_string(),
        ]
    );
    assert!(h.backend.exists(Path::new("upstream/package/acme/foo__f00.json.gz")).await.unwrap());
    assert!(h.backend.exists(Path::new("upstream/packages.json")).await.unwrap());
    assert_eq!(stats.pkg_total, 1);
    assert_eq!(stats.pkg_updated, 1);
    assert_eq!(stats.available_packages, vec!["acme/foo".to_string()]);
    assert!(stats.last_sync.is_some());

    let record = h.mirror.store().find_package_metadata("acme/foo", None).await.unwrap().unwrap();
    assert_eq!(record.hash(), Some("f00"));
}

#[tokio::test]
async fn test_unchanged_root_short_circuits_second_sync() {
    let h = harness(config(|_| {}), pinned_v1_client()).await;
    let sync = h.mirror.sync(CancellationToken::new());
    sync.run(SyncFlags::default()).await.unwrap();
    let writes = h.backend.write_count();
    h.client.clear_requests();

    let stats = sync.run(SyncFlags::default()).await.unwrap();
    assert_eq!(h.client.requests(), vec![ROOT_URL.to_string()]);
    assert_eq!(h.backend.write_count(), writes);
    assert_eq!(stats.pkg_updated, 0);
    assert_eq!(stats.pkg_total, 1);
}

#[tokio::test]
async fn test_ui_triggered_sync_skips_stored_pins() {
    let h = harness(config(|_| {}), pinned_v1_client()).await;
    let sync = h.mirror.sync(CancellationToken::new());
    sync.run(SyncFlags::default()).await.unwrap();
    h.client.clear_requests();

    let flags = SyncFlags {
        ui_triggered: true,
        ..SyncFlags::default()
    };
    let stats = sync.run(flags).await.unwrap();
    // The pinned include and package are already stored.
    assert_eq!(h.client.requests(), vec![ROOT_URL.to_string()]);
    assert_eq!(stats.pkg_updated, 0);
}

#[tokio::test]
async fn test_full_reset_clears_approvals_and_documents() {
    let h = harness(config(|_| {}), pinned_v1_client()).await;
    h.mirror.approvals().mark_approve(["acme/foo"]).await.unwrap();
    h.backend.write(Path::new("upstream/package/stale.json.gz"), b"x").await.unwrap();

    let flags = SyncFlags {
        full_reset: true,
        ..SyncFlags::default()
    };
    h.mirror.sync(CancellationToken::new()).run(flags).await.unwrap();
    assert!(h.mirror.approvals().approved().await.unwrap().is_empty());
    assert!(!h.backend.exists(Path::new("upstream/package/stale.json.gz")).await.unwrap());
    assert!(h.backend.exists(Path::new("upstream/package/acme/foo__f00.json.gz")).await.unwrap());
}

#[tokio::test]
async fn test_changes_feed_resync_refetches_enabled_set() {
    let h = harness(
        config(|c| c.lazy = true),
        changes_client(100, json!({"timestamp": 500, "actions": [{"type": "resync"}]})),
    )
    .await;
    h.mirror.approvals().mark_enabled(["acme/foo", "acme/bar"]).await.unwrap();
    h.mirror
        .stats()
        .save(&SyncStats {
            metadata_timestamp: Some(100),
            ..SyncStats::default()
        })
        .await
        .unwrap();

    let stats = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap();

    let requests = h.client.requests();
    assert_eq!(requests[0], ROOT_URL);
    assert_eq!(requests[1], "https://repo.example.org/metadata/changes.json?since=100");
    for url in [FOO_STABLE, FOO_DEV, BAR_STABLE, BAR_DEV] {
        assert!(requests.iter().any(|request| request == url), "missing request to {url}");
    }
    assert_eq!(requests.len(), 6);
    assert_eq!(stats.metadata_timestamp, Some(500));
    assert_eq!(stats.pkg_updated, 2);
    assert_eq!(stats.pkg_total, 2);
    assert_eq!(h.mirror.stats().load().await.unwrap().metadata_timestamp, Some(500));
}

#[tokio::test]
async fn test_changes_feed_applies_updates_and_deletions() {
    let h = harness(
        config(|c| c.lazy = true),
        changes_client(
            100,
            json!({"timestamp": 600, "actions": [
                {"type": "update", "package": "acme/foo~dev", "time": 550},
                {"type": "delete", "package": "acme/bar", "time": 560},
                {"type": "update", "package": "not/enabled", "time": 570}
            ]}),
        ),
    )
    .await;
    let store = h.mirror.store();
    store.dump_package("acme/foo", br#"{"packages":{}}"#, None).await.unwrap();
    store.dump_package("acme/bar", br#"{"packages":{}}"#, None).await.unwrap();
    h.mirror.approvals().mark_enabled(["acme/foo", "acme/bar"]).await.unwrap();
    h.mirror
        .stats()
        .save(&SyncStats {
            metadata_timestamp: Some(100),
            ..SyncStats::default()
        })
        .await
        .unwrap();

    let stats = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap();

    let requests = h.client.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests.iter().any(|request| request == FOO_STABLE));
    assert!(!requests.iter().any(|request| request == BAR_STABLE));
    assert!(!store.has_package("acme/bar", None).await.unwrap());
    assert!(store.has_package("acme/foo", None).await.unwrap());
    assert_eq!(stats.metadata_timestamp, Some(600));
    assert_eq!(stats.pkg_updated, 1);
}

#[tokio::test]
async fn test_first_v2_sync_takes_cursor_and_fetches_everything_enabled() {
    let h = harness(
        config(|c| c.lazy = true),
        MockClient::new()
            .with_json(
                ROOT_URL,
                json!({
                    "packages": {},
                    "metadata-url": "/p2/%package%.json",
                    "metadata-changes-url": "/metadata/changes.json"
                }),
            )
            .with_json("https://repo.example.org/metadata/changes.json", json!({"timestamp": 42, "actions": []}))
            .with_json(FOO_STABLE, v2_listing("acme/foo", &["1.0.0"])),
    )
    .await;
    h.mirror.approvals().mark_enabled(["acme/foo"]).await.unwrap();

    let stats = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap();
    assert_eq!(stats.metadata_timestamp, Some(42));
    assert_eq!(stats.pkg_updated, 1);
    assert!(h.mirror.store().has_package("acme/foo", None).await.unwrap());
}

#[tokio::test]
async fn test_unavailable_root_fails_without_writes() {
    let h = harness(config(|_| {}), MockClient::new().with_status(ROOT_URL, 503)).await;
    let err = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Transport);
    assert!(err.is_retryable());
    assert_eq!(h.backend.write_count(), 0);
}

#[tokio::test]
async fn test_responses_landing_after_cancellation_are_not_stored() {
    let packages: Vec<String> = (0..10).map(|i| format!("acme/pkg{i}")).collect();
    let mut client =
        MockClient::new().with_json(ROOT_URL, json!({"packages": {}, "metadata-url": "/p2/%package%.json"}));
    for package in &packages {
        client = client.with_json(
            &format!("https://repo.example.org/p2/{package}.json"),
            v2_listing(package, &["1.0.0"]),
        );
    }
    let h = harness(config(|c| c.lazy = true), client.with_delay(Duration::from_millis(200))).await;
    h.mirror.approvals().mark_enabled(&packages).await.unwrap();

    // Every pair is in flight by 200ms and none has landed before 400ms.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = h.mirror.sync(cancel).run(SyncFlags::default()).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Cancelled);
    assert_eq!(h.client.request_count(), 21);
    assert_eq!(h.backend.write_count(), 0);
    assert!(!h.mirror.store().has_package("acme/pkg0", None).await.unwrap());
}

#[tokio::test]
async fn test_first_v2_cursor_read_from_bad_request_body() {
    let h = harness(
        config(|c| c.lazy = true),
        MockClient::new()
            .with_json(
                ROOT_URL,
                json!({
                    "packages": {},
                    "metadata-url": "/p2/%package%.json",
                    "metadata-changes-url": "/metadata/changes.json"
                }),
            )
            .with_status_json(
                "https://repo.example.org/metadata/changes.json",
                400,
                json!({"error": "Invalid or missing \"since\" query parameter", "timestamp": 42}),
            )
            .with_json(
                "https://repo.example.org/metadata/changes.json?since=42",
                json!({"timestamp": 50, "actions": []}),
            )
            .with_json(FOO_STABLE, v2_listing("acme/foo", &["1.0.0"])),
    )
    .await;
    h.mirror.approvals().mark_enabled(["acme/foo"]).await.unwrap();
    let sync = h.mirror.sync(CancellationToken::new());

    let stats = sync.run(SyncFlags::default()).await.unwrap();
    assert_eq!(stats.metadata_timestamp, Some(42));
    assert_eq!(stats.pkg_updated, 1);

    h.client.clear_requests();
    let stats = sync.run(SyncFlags::default()).await.unwrap();
    assert_eq!(
        h.client.requests(),
        vec![
            ROOT_URL.to_string(),
            "https://repo.example.org/metadata/changes.json?since=42".to_string(),
        ]
    );
    assert_eq!(stats.metadata_timestamp, Some(50));
    assert_eq!(stats.pkg_updated, 0);
}

#[tokio::test]
async fn test_lazy_v1_sync_persists_root_and_refreshes_enabled_set() {
    let h = harness(
        config(|_| {}),
        MockClient::new()
            .with_json(ROOT_URL, json!({"packages": {}, "providers-lazy-url": "/p/%package%.json"}))
            .with_json(
                "https://repo.example.org/p/acme/foo.json",
                json!({"packages": {"acme/foo": {"1.0.0": {"name": "acme/foo", "version": "1.0.0"}}}}),
            ),
    )
    .await;
    h.mirror.approvals().mark_enabled(["acme/foo", "acme/gone"]).await.unwrap();

    let stats = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap();
    let requests = h.client.requests();
    assert_eq!(requests[0], ROOT_URL);
    assert!(requests.contains(&"https://repo.example.org/p/acme/foo.json".to_string()));
    assert!(requests.contains(&"https://repo.example.org/p/acme/gone.json".to_string()));
    assert_eq!(requests.len(), 3);

    assert!(h.backend.exists(Path::new("upstream/packages.json")).await.unwrap());
    assert!(h.backend.exists(Path::new("upstream/package/acme/foo.json.gz")).await.unwrap());
    assert!(!h.mirror.store().has_package("acme/gone", None).await.unwrap());
    assert_eq!(stats.pkg_updated, 1);
    assert_eq!(stats.pkg_total, 0);
}

#[tokio::test]
async fn test_includes_are_followed_recursively_once_each() {
    let h = harness(
        config(|_| {}),
        MockClient::new()
            .with_json(ROOT_URL, json!({"packages": {}, "includes": {"include/a.json": {"sha1": "aa"}}}))
            .with_json(
                "https://repo.example.org/include/a.json",
                json!({
                    "packages": {"acme/foo": {"1.0.0": {"name": "acme/foo", "version": "1.0.0"}}},
                    "includes": {"include/b.json": {"sha1": "bb"}}
                }),
            )
            .with_json(
                "https://repo.example.org/include/b.json",
                json!({
                    "packages": {"acme/bar": {"2.0.0": {"name": "acme/bar", "version": "2.0.0"}}},
                    "includes": {"include/a.json": {"sha1": "aa"}}
                }),
            ),
    )
    .await;

    let stats = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap();
    assert_eq!(
        h.client.requests(),
        vec![
            ROOT_URL.to_string(),
            "https://repo.example.org/include/a.json".to_string(),
            "https://repo.example.org/include/b.json".to_string(),
        ]
    );
    let store = h.mirror.store();
    assert!(store.has_package("acme/foo", None).await.unwrap());
    assert!(store.has_package("acme/bar", None).await.unwrap());
    assert_eq!(stats.pkg_total, 2);
    assert_eq!(stats.pkg_updated, 2);
    assert_eq!(stats.available_packages, vec!["acme/foo".to_string(), "acme/bar".to_string()]);
}

#[tokio::test]
async fn test_eager_v2_syncs_enabled_set_then_continues() {
    let h = harness(
        config(|_| {}),
        MockClient::new()
            .with_json(ROOT_URL, json!({"packages": {}, "metadata-url": "/p2/%package%.json"}))
            .with_json(FOO_STABLE, v2_listing("acme/foo", &["1.0.0"]))
            .with_json(FOO_DEV, v2_listing("acme/foo", &["dev-main"])),
    )
    .await;
    h.mirror.approvals().mark_enabled(["acme/foo"]).await.unwrap();
    let sync = h.mirror.sync(CancellationToken::new());

    let stats = sync.run(SyncFlags::default()).await.unwrap();
    let requests = h.client.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.contains(&FOO_STABLE.to_string()));
    assert!(requests.contains(&FOO_DEV.to_string()));
    assert!(h.backend.exists(Path::new("upstream/packages.json")).await.unwrap());
    assert!(h.mirror.store().has_package("acme/foo", None).await.unwrap());
    assert_eq!(stats.pkg_updated, 1);

    // The enabled set is refreshed even when the root is unchanged.
    h.client.clear_requests();
    let stats = sync.run(SyncFlags::default()).await.unwrap();
    assert_eq!(h.client.request_count(), 3);
    assert_eq!(stats.pkg_updated, 1);
}

#[tokio::test]
async fn test_failing_package_is_skipped_and_batch_continues() {
    let h = harness(
        config(|c| c.lazy = true),
        MockClient::new()
            .with_json(ROOT_URL, json!({"packages": {}, "metadata-url": "/p2/%package%.json"}))
            .with_json(FOO_STABLE, v2_listing("acme/foo", &["1.0.0"]))
            .with_status(BAR_STABLE, 503),
    )
    .await;
    h.mirror.approvals().mark_enabled(["acme/foo", "acme/bar"]).await.unwrap();

    let stats = h.mirror.sync(CancellationToken::new()).run(SyncFlags::default()).await.unwrap();
    assert_eq!(h.client.request_count(), 5);
    let store = h.mirror.store();
    assert!(store.has_package("acme/foo", None).await.unwrap());
    assert!(!store.has_package("acme/bar", None).await.unwrap());
    assert_eq!(stats.pkg_updated, 1);
    assert_eq!(stats.pkg_total, 2);
    assert!(h.backend.exists(Path::new("upstream/packages.json")).await.unwrap());
}
