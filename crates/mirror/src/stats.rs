use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgmirror_kv::KeyValue;
use pkgmirror_protocol::SyncStats;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

/// Persists [`SyncStats`] in the `mirror:<name>:meta` hash.
#[derive(Debug, Clone)]
pub struct StatsStore {
    kv: KeyValue,
    key: String,
}

fn parse<T: FromStr>(fields: &BTreeMap<String, String>, field: &str) -> Option<T> {
    let raw = fields.get(field)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(field, value = %raw, "ignoring unparseable sync statistic");
            None
        },
    }
}

impl StatsStore {
    pub fn new(kv: KeyValue, mirror: &str) -> Self {
        Self {
            kv,
            key: format!("mirror:{mirror}:meta"),
        }
    }

    /// Load the stored statistics; missing or garbled fields take defaults.
    pub async fn load(&self) -> Result<SyncStats> {
        let fields = self.kv.hash_get_all(&self.key).await.or_raise(|| ErrorKind::Store)?;
        let available_packages = fields
            .get("available_packages")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        Ok(SyncStats {
            last_sync: parse(&fields, "last_sync"),
            pkg_total: parse(&fields, "pkg_total").unwrap_or_default(),
            pkg_updated: parse(&fields, "pkg_updated").unwrap_or_default(),
            available_packages,
            metadata_timestamp: parse(&fields, "metadata_timestamp"),
        })
    }

    pub async fn save(&self, stats: &SyncStats) -> Result<()> {
        let available = serde_json::to_string(&stats.available_packages).or_raise(|| ErrorKind::Protocol)?;
        let mut fields = vec![
            ("pkg_total", stats.pkg_total.to_string()),
            ("pkg_updated", stats.pkg_updated.to_string()),
            ("available_packages", available),
        ];
        if let Some(last_sync) = stats.last_sync {
            fields.push(("last_sync", last_sync.to_string()));
        }
        if let Some(timestamp) = stats.metadata_timestamp {
            fields.push(("metadata_timestamp", timestamp.to_string()));
        } else {
            self.kv.hash_delete(&self.key, "metadata_timestamp").await.or_raise(|| ErrorKind::Store)?;
        }
        self.kv.hash_set(&self.key, fields).await.or_raise(|| ErrorKind::Store)
    }

    pub async fn clear(&self) -> Result<()> {
        self.kv.hash_clear(&self.key).await.or_raise(|| ErrorKind::Store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmirror_kv::Database;

    #[tokio::test]
    async fn test_save_and_load() {
        let db = Database::connect_in_memory().await.unwrap();
        let stats = StatsStore::new(KeyValue::from(&db), "packagist");
        assert_eq!(stats.load().await.unwrap(), SyncStats::default());

        let saved = SyncStats {
            last_sync: Some(1_700_000_000),
            pkg_total: 12,
            pkg_updated: 3,
            available_packages: vec!["acme/foo".to_string()],
            metadata_timestamp: Some(500),
        };
        stats.save(&saved).await.unwrap();
        assert_eq!(stats.load().await.unwrap(), saved);

        let without_cursor = SyncStats {
            metadata_timestamp: None,
            ..saved
        };
        stats.save(&without_cursor).await.unwrap();
        assert_eq!(stats.load().await.unwrap().metadata_timestamp, None);

        stats.clear().await.unwrap();
        assert_eq!(stats.load().await.unwrap(), SyncStats::default());
    }
}
