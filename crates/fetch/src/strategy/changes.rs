//! Composer 2 `metadata-changes-url` feed.

use super::fetch_json;
use crate::client::HttpClient;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use pkgmirror_protocol::RepositoryOptions;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeAction {
    Update {
        package: String,
        #[serde(default)]
        time: Option<i64>,
    },
    Delete {
        package: String,
        #[serde(default)]
        time: Option<i64>,
    },
    /// The cursor is too old; every cached package must be re-fetched.
    Resync {
        #[serde(default)]
        package: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangesFeed {
    /// Cursor to pass as `since` next time.
    pub timestamp: i64,
    #[serde(default)]
    pub actions: Vec<ChangeAction>,
}

impl ChangesFeed {
    pub fn requires_resync(&self) -> bool {
        self.actions.iter().any(|action| matches!(action, ChangeAction::Resync { .. }))
    }

    /// Packages updated since the cursor. A `~dev` suffix maps to its base name.
    pub fn updated(&self) -> BTreeSet<String> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                ChangeAction::Update { package, .. } => Some(base_name(package).to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> BTreeSet<String> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                ChangeAction::Delete { package, .. } => Some(base_name(package).to_string()),
                _ => None,
            })
            .collect()
    }
}

fn base_name(package: &str) -> &str {
    package.strip_suffix("~dev").unwrap_or(package)
}

/// Fetch every change after the `since` cursor.
#[instrument(level = "debug", skip(client, options), fields(mirror = options.name()))]
pub async fn fetch_changes(client: &dyn HttpClient, options: &RepositoryOptions, since: i64) -> Result<ChangesFeed> {
    let url = options
        .metadata_changes_url(since)
        .or_raise(|| ErrorKind::Protocol)?
        .ok_or_raise(|| ErrorKind::Protocol)?;
    let doc = fetch_json(client, &url).await?;
    serde_json::from_value(Value::Object(doc)).or_raise(|| ErrorKind::Protocol)
}

#[derive(Deserialize)]
struct Cursor {
    timestamp: i64,
}

/// Ask the changes feed for its current cursor.
///
/// Without `since` Packagist answers 400 with `{"error", "timestamp"}`, so a
/// client error that still carries a timestamp is accepted.
#[instrument(level = "debug", skip(client, options), fields(mirror = options.name()))]
pub async fn fetch_cursor(client: &dyn HttpClient, options: &RepositoryOptions) -> Result<i64> {
    let template = options
        .root()
        .and_then(|root| root.metadata_changes_url())
        .ok_or_raise(|| ErrorKind::Protocol)?;
    let url = options.resolve(template).or_raise(|| ErrorKind::Protocol)?;
    let response = client.send(&url).await?;
    if response.status < 500
        && let Ok(cursor) = serde_json::from_slice::<Cursor>(&response.body)
    {
        return Ok(cursor.timestamp);
    }
    response.into_body(&url)?;
    exn::bail!(ErrorKind::Protocol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClient;
    use pkgmirror_config::MirrorConfig;
    use rstest::rstest;
    use pkgmirror_protocol::RootDocument;
    use serde_json::json;
    use std::sync::Arc;
    use url::Url;

    const CHANGES_URL: &str = "https://example.org/metadata/changes.json";

    fn options() -> RepositoryOptions {
        let config = MirrorConfig::new(Url::parse("https://example.org/").unwrap());
        let Value::Object(root) = json!({
            "metadata-url": "/p2/%package%.json",
            "metadata-changes-url": "/metadata/changes.json"
        }) else {
            unreachable!()
        };
        RepositoryOptions::new("upstream", Arc::new(config)).with_root(RootDocument::from_map(root).unwrap())
    }

    #[test]
    fn test_parse_actions() {
        let feed: ChangesFeed = serde_json::from_value(json!({
            "timestamp": 700,
            "actions": [
                {"type": "update", "package": "acme/foo", "time": 650},
                {"type": "update", "package": "acme/foo~dev", "time": 651},
                {"type": "delete", "package": "acme/old", "time": 660},
                {"type": "something-new", "package": "acme/x"}
            ]
        }))
        .unwrap();
        assert!(!feed.requires_resync());
        assert_eq!(feed.updated().into_iter().collect::<Vec<_>>(), vec!["acme/foo".to_string()]);
        assert_eq!(feed.deleted().len(), 1);
        assert_eq!(feed.actions[3], ChangeAction::Unknown);
    }

    #[tokio::test]
    async fn test_fetch_resync() {
        let client = MockClient::new().with_json(
            "https://example.org/metadata/changes.json?since=500",
            json!({"timestamp": 500, "actions": [{"type": "resync"}]}),
        );
        let feed = fetch_changes(&client, &options(), 500).await.unwrap();
        assert!(feed.requires_resync());
        assert_eq!(feed.timestamp, 500);
    }

    #[rstest]
    #[case::ok(200, json!({"timestamp": 900, "actions": []}))]
    #[case::bad_request(400, json!({"error": "Invalid or missing \"since\" query parameter", "timestamp": 900}))]
    #[tokio::test]
    async fn test_fetch_cursor(#[case] status: u16, #[case] body: Value) {
        let client = MockClient::new().with_status_json(CHANGES_URL, status, body);
        assert_eq!(fetch_cursor(&client, &options()).await.unwrap(), 900);
    }

    #[rstest]
    #[case::no_timestamp(400, json!({"error": "nope"}), ErrorKind::Status { status: 400, url: CHANGES_URL.to_string() })]
    #[case::unavailable(503, json!({"timestamp": 900}), ErrorKind::Status { status: 503, url: CHANGES_URL.to_string() })]
    #[case::missing(404, json!({}), ErrorKind::NotFound(CHANGES_URL.to_string()))]
    #[case::garbage(200, json!({"actions": []}), ErrorKind::Protocol)]
    #[tokio::test]
    async fn test_fetch_cursor_failures(#[case] status: u16, #[case] body: Value, #[case] expected: ErrorKind) {
        let client = MockClient::new().with_status_json(CHANGES_URL, status, body);
        let err = fetch_cursor(&client, &options()).await.unwrap_err();
        assert_eq!(*err, expected);
    }
}
