use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgmirror_kv::KeyValue;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// Per-mirror registry of "enabled" (ever requested) and "approved"
/// (allow-listed by an administrator) packages.
///
/// Approving a package also enables it; removing an approval clears both.
/// Enabling alone never approves. Names are case-insensitive and kept
/// lowercase.
#[derive(Debug, Clone)]
pub struct ApprovalStore {
    kv: KeyValue,
    enabled_key: String,
    approved_key: String,
}

fn normalize<I, S>(packages: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    packages.into_iter().map(|package| package.as_ref().to_lowercase()).collect()
}

impl ApprovalStore {
    pub fn new(kv: KeyValue, mirror: &str) -> Self {
        Self {
            kv,
            enabled_key: format!("mirror:{mirror}:enabled"),
            approved_key: format!("mirror:{mirror}:approve"),
        }
    }

    pub async fn mark_enabled<I, S>(&self, packages: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.kv
            .set_add(&self.enabled_key, normalize(packages))
            .await
            .or_raise(|| ErrorKind::Store)
    }

    #[instrument(level = "debug", skip(self, packages))]
    pub async fn mark_approve<I, S>(&self, packages: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages = normalize(packages);
        let approved = self.kv.set_add(&self.approved_key, &packages).await.or_raise(|| ErrorKind::Store)?;
        self.mark_enabled(&packages).await?;
        debug!(approved, "packages approved");
        Ok(())
    }

    #[instrument(level = "debug", skip(self, packages))]
    pub async fn remove_approve<I, S>(&self, packages: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages = normalize(packages);
        self.kv.set_remove(&self.approved_key, &packages).await.or_raise(|| ErrorKind::Store)?;
        self.kv.set_remove(&self.enabled_key, &packages).await.or_raise(|| ErrorKind::Store)?;
        Ok(())
    }

    pub async fn is_enabled(&self, package: &str) -> Result<bool> {
        self.kv
            .set_contains(&self.enabled_key, &package.to_lowercase())
            .await.or_raise(|| ErrorKind::Store)
    }

    pub async fn is_approved(&self, package: &str) -> Result<bool> {
        self.kv
            .set_contains(&self.approved_key, &package.to_lowercase())
            .await.or_raise(|| ErrorKind::Store)
    }

    pub async fn enabled(&self) -> Result<BTreeSet<String>> {
        self.kv.set_members(&self.enabled_key).await.or_raise(|| ErrorKind::Store)
    }

    pub async fn approved(&self) -> Result<BTreeSet<String>> {
        self.kv.set_members(&self.approved_key).await.or_raise(|| ErrorKind::Store)
    }

    /// Forget every enabled and approved package of this mirror.
    pub async fn clear(&self) -> Result<()> {
        self.kv.set_clear(&self.approved_key).await.or_raise(|| ErrorKind::Store)?;
        self.kv.set_clear(&self.enabled_key).await.or_raise(|| ErrorKind::Store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmirror_kv::Database;

    async fn approvals() -> ApprovalStore {
        let db = Database::connect_in_memory().await.unwrap();
        ApprovalStore::new(KeyValue::from(&db), "packagist")
    }

    #[tokio::test]
    async fn test_approve_enables() {
        let approvals = approvals().await;
        approvals.mark_approve(["acme/foo"]).await.unwrap();
        assert!(approvals.is_enabled("acme/foo").await.unwrap());
        assert!(approvals.is_approved("acme/foo").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_clears_both() {
        let approvals = approvals().await;
        approvals.mark_approve(["acme/foo", "acme/bar"]).await.unwrap();
        approvals.remove_approve(["acme/foo"]).await.unwrap();
        assert!(!approvals.is_enabled("acme/foo").await.unwrap());
        assert!(!approvals.is_approved("acme/foo").await.unwrap());
        assert!(approvals.is_approved("acme/bar").await.unwrap());
    }

    #[tokio::test]
    async fn test_enable_does_not_approve() {
        let approvals = approvals().await;
        assert_eq!(approvals.mark_enabled(["acme/foo"]).await.unwrap(), 1);
        assert_eq!(approvals.mark_enabled(["acme/foo"]).await.unwrap(), 0);
        assert!(!approvals.is_approved("acme/foo").await.unwrap());
        assert_eq!(approvals.enabled().await.unwrap().len(), 1);
        assert!(approvals.approved().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_names_are_case_insensitive() {
        let approvals = approvals().await;
        approvals.mark_approve(["Acme/Foo"]).await.unwrap();
        assert_eq!(approvals.mark_enabled(["ACME/FOO"]).await.unwrap(), 0);
        assert!(approvals.is_enabled("acme/foo").await.unwrap());
        assert!(approvals.is_approved("ACME/foo").await.unwrap());
        assert_eq!(approvals.enabled().await.unwrap().into_iter().collect::<Vec<_>>(), vec!["acme/foo".to_string()]);

        approvals.remove_approve(["ACME/Foo"]).await.unwrap();
        assert!(approvals.approved().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mirrors_are_isolated_and_clearable() {
        let db = Database::connect_in_memory().await.unwrap();
        let a = ApprovalStore::new(KeyValue::from(&db), "a");
        let b = ApprovalStore::new(KeyValue::from(&db), "b");
        a.mark_approve(["acme/foo"]).await.unwrap();
        b.mark_approve(["acme/foo"]).await.unwrap();
        a.clear().await.unwrap();
        assert!(a.enabled().await.unwrap().is_empty());
        assert!(b.is_approved("acme/foo").await.unwrap());
    }
}
