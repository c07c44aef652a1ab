//! Set and hash operations over the key-value tables.

use crate::Database;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::instrument;

/// Redis-flavoured access to the shared key-value database.
///
/// Keys are free-form strings; by convention callers namespace them as
/// `<owner>:<name>:<purpose>` (for example `mirror:packagist:enabled`).
/// A key may hold a set, a hash, or both; they live in separate tables.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pool: SqlitePool,
}
impl From<&Database> for KeyValue {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl KeyValue {
    // =========================================================================
    // Sets
    // =========================================================================

    /// Add members to a set, returning how many were not already present.
    #[instrument(level = "debug", skip(self, members), fields(key = key))]
    pub async fn set_add<I, S>(&self, key: &str, members: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut added = 0;
        for member in members {
            added += sqlx::query(include_str!("../queries/set_add.sql"))
                .bind(key)
                .bind(member.as_ref())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(added)
    }

    /// Remove members from a set, returning how many were present.
    #[instrument(level = "debug", skip(self, members), fields(key = key))]
    pub async fn set_remove<I, S>(&self, key: &str, members: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut removed = 0;
        for member in members {
            removed += sqlx::query(include_str!("../queries/set_remove.sql"))
                .bind(key)
                .bind(member.as_ref())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(removed)
    }

    /// All members of a set, sorted. A missing key is an empty set.
    pub async fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        let members: Vec<String> = sqlx::query_scalar(include_str!("../queries/set_members.sql"))
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(members.into_iter().collect())
    }

    pub async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(include_str!("../queries/set_contains.sql"))
            .bind(key)
            .bind(member)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(exists)
    }

    pub async fn set_count(&self, key: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/set_count.sql"))
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("set count"))
    }

    /// Remove a set entirely.
    pub async fn set_clear(&self, key: &str) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/set_clear.sql"))
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Hashes
    // =========================================================================

    /// Set (insert or replace) several fields of a hash at once.
    #[instrument(level = "debug", skip(self, fields), fields(key = key))]
    pub async fn hash_set<I, F, V>(&self, key: &str, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<str>,
        V: AsRef<str>,
    {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for (field, value) in fields {
            sqlx::query(include_str!("../queries/hash_set.sql"))
                .bind(key)
                .bind(field.as_ref())
                .bind(value.as_ref())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        sqlx::query_scalar(include_str!("../queries/hash_get.sql"))
            .bind(key)
            .bind(field)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(include_str!("../queries/hash_get_all.sql"))
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().collect())
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/hash_delete.sql"))
            .bind(key)
            .bind(field)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a hash entirely.
    pub async fn hash_clear(&self, key: &str) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/hash_clear.sql"))
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }
}
