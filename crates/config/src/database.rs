use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DATABASE_FILE_NAME: &str = "pkgmirror.sqlite";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite file holding approval sets and sync statistics.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Pool size. Request handlers check approvals while syncs write them.
    pub max_connections: u32,
    /// How long a connection waits for the write lock before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::at(crate::data_dir().join(DATABASE_FILE_NAME))
    }
}

impl DatabaseConfig {
    /// Default pool settings for the database at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
