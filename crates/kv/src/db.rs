//! Connection pool for the key-value database.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgmirror_config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Pool shared by every mirror, sync job and request handler of a process.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database file described by `config`, creating it when
    /// missing, and bring its schema up to date.
    #[instrument(skip_all, fields(path = %config.path.display()))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            // Readers keep going while a sync holds the write lock.
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());
        Self::open(options, config.max_connections).await
    }

    /// Private in-memory database, for tests in this and other crates.
    ///
    /// Every connection to `:memory:` sees its own database, so the pool
    /// holds exactly one.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::open(SqliteConnectOptions::new().filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
        debug!(max_connections, "key-value database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for checked-out connections to come back, then close them all.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
