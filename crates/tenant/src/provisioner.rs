//! Schema Provisioner
//!
//! Creates a tenant record and its namespace. The landlord's slug
//! uniqueness constraint decides concurrent creations; DDL only ever runs
//! for the caller whose insert (or compare-and-set resume) succeeded.

use crate::directory::TenantDirectory;
use crate::error::{Result, TenantError};
use async_trait::async_trait;
use bistro_database::{SchemaManager, BASELINE_MIGRATIONS};
use bistro_models::{namespace_for_slug, normalize_slug, NewTenant, Tenant, TenantStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Namespace DDL on the tenant cluster
#[async_trait]
pub trait NamespaceAdmin: Send + Sync {
    /// Create the namespace if it does not exist
    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Apply pending baseline migrations; returns the versions applied
    async fn apply_baseline(&self, namespace: &str) -> Result<Vec<i32>>;
}

#[async_trait]
impl NamespaceAdmin for SchemaManager {
    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        Ok(self.create_schema(namespace).await?)
    }

    async fn apply_baseline(&self, namespace: &str) -> Result<Vec<i32>> {
        Ok(self.apply_migrations(namespace, BASELINE_MIGRATIONS).await?)
    }
}

/// Outcome of [`SchemaProvisioner::migrate_all`]
#[derive(Debug, Default, Serialize)]
pub struct MigrationReport {
    pub migrated: Vec<NamespaceMigration>,
    pub failed: Vec<NamespaceFailure>,
}

#[derive(Debug, Serialize)]
pub struct NamespaceMigration {
    pub namespace: String,
    pub applied: Vec<i32>,
}

#[derive(Debug, Serialize)]
pub struct NamespaceFailure {
    pub namespace: String,
    pub error: String,
}

#[derive(Clone)]
pub struct SchemaProvisioner {
    directory: Arc<TenantDirectory>,
    admin: Arc<dyn NamespaceAdmin>,
    lease: Duration,
}

impl SchemaProvisioner {
    /// `lease` is how long a `provisioning` record stays owned by the
    /// provisioner that wrote it.
    pub fn new(directory: Arc<TenantDirectory>, admin: Arc<dyn NamespaceAdmin>, lease: Duration) -> Self {
        Self {
            directory,
            admin,
            lease,
        }
    }

    /// Create a tenant, or resume one whose provisioning failed or was abandoned.
    pub async fn create_tenant(&self, name: &str, slug: &str) -> Result<Tenant> {
        let slug = normalize_slug(slug).map_err(|e| TenantError::InvalidSlug(e.to_string()))?;
        let new = NewTenant {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            namespace: namespace_for_slug(&slug),
            slug,
        };

        let store = self.directory.store();
        match store.insert(&new).await {
            Ok(tenant) => {
                tracing::info!(
                    tenant_id = %tenant.id,
                    slug = %tenant.slug,
                    namespace = %tenant.namespace,
                    "Registered tenant, provisioning namespace"
                );
                self.provision(tenant).await
            }
            Err(TenantError::Conflict(message)) => match store.find_by_slug(&new.slug).await? {
                Some(existing) if self.is_resumable(&existing)? => {
                    tracing::info!(
                        tenant_id = %existing.id,
                        slug = %existing.slug,
                        status = %existing.status,
                        "Resuming tenant provisioning"
                    );
                    self.resume(existing).await
                }
                _ => Err(TenantError::Conflict(message)),
            },
            Err(e) => Err(e),
        }
    }

    /// Resume a tenant left in `provisioning_failed`, or stuck in
    /// `provisioning` past its lease
    pub async fn retry_provisioning(&self, id: Uuid) -> Result<Tenant> {
        let tenant = self.directory.get(id).await?;
        if !self.is_resumable(&tenant)? {
            return Err(TenantError::Conflict(format!(
                "tenant '{}' is {} and cannot be resumed",
                tenant.slug, tenant.status
            )));
        }
        self.resume(tenant).await
    }

    fn stale_before(&self) -> Result<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| TenantError::InvalidConfig(format!("provisioning_lease: {}", e)))?;
        Ok(Utc::now() - lease)
    }

    fn is_resumable(&self, tenant: &Tenant) -> Result<bool> {
        Ok(match tenant.status {
            TenantStatus::ProvisioningFailed => true,
            TenantStatus::Provisioning => tenant.updated_at < self.stale_before()?,
            TenantStatus::Active | TenantStatus::Deactivated => false,
        })
    }

    async fn resume(&self, tenant: Tenant) -> Result<Tenant> {
        let claimed = self
            .directory
            .store()
            .claim_provisioning(tenant.id, self.stale_before()?)
            .await?
            .ok_or_else(|| {
                TenantError::Conflict(format!(
                    "tenant '{}' is already being provisioned",
                    tenant.slug
                ))
            })?;
        self.provision(claimed).await
    }

    /// Runs on its own task: a caller that goes away mid-DDL does not leave
    /// the record half-built.
    async fn provision(&self, tenant: Tenant) -> Result<Tenant> {
        let provisioner = self.clone();
        let slug = tenant.slug.clone();
        tokio::spawn(async move { provisioner.run_provisioning(tenant).await })
            .await
            .map_err(|e| TenantError::ProvisioningFailure {
                slug,
                message: format!("provisioning task failed: {}", e),
            })?
    }

    async fn run_provisioning(&self, tenant: Tenant) -> Result<Tenant> {
        let store = self.directory.store();
        let outcome = match self.build_namespace(&tenant.namespace).await {
            Ok(_) => store
                .transition_status(tenant.id, &[TenantStatus::Provisioning], TenantStatus::Active)
                .await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(active)) => {
                self.directory.invalidate(&active).await;
                tracing::info!(
                    tenant_id = %active.id,
                    slug = %active.slug,
                    namespace = %active.namespace,
                    "Tenant provisioned"
                );
                Ok(active)
            }
            Ok(None) => Err(TenantError::Conflict(format!(
                "tenant '{}' changed status during provisioning",
                tenant.slug
            ))),
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant.id,
                    slug = %tenant.slug,
                    namespace = %tenant.namespace,
                    error = %e,
                    "Tenant provisioning failed"
                );
                self.mark_failed(&tenant).await;
                Err(TenantError::ProvisioningFailure {
                    slug: tenant.slug,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Record `provisioning_failed`. If even that write fails the record
    /// stays `provisioning` and becomes claimable once its lease runs out.
    async fn mark_failed(&self, tenant: &Tenant) {
        match self
            .directory
            .store()
            .transition_status(
                tenant.id,
                &[TenantStatus::Provisioning],
                TenantStatus::ProvisioningFailed,
            )
            .await
        {
            Ok(Some(failed)) => self.directory.invalidate(&failed).await,
            Ok(None) => {}
            Err(mark_err) => tracing::error!(
                tenant_id = %tenant.id,
                error = %mark_err,
                "Failed to record provisioning failure"
            ),
        }
    }

    async fn build_namespace(&self, namespace: &str) -> Result<Vec<i32>> {
        self.admin.create_namespace(namespace).await?;
        let applied = self.admin.apply_baseline(namespace).await?;
        tracing::debug!(namespace, applied = ?applied, "Baseline migrations applied");
        Ok(applied)
    }

    /// Re-apply baseline migrations to every active namespace.
    ///
    /// A failing namespace does not stop the others.
    pub async fn migrate_all(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for tenant in self.directory.list(false).await? {
            match self.admin.apply_baseline(&tenant.namespace).await {
                Ok(applied) => report.migrated.push(NamespaceMigration {
                    namespace: tenant.namespace,
                    applied,
                }),
                Err(e) => {
                    tracing::warn!(namespace = %tenant.namespace, error = %e, "Namespace migration failed");
                    report.failed.push(NamespaceFailure {
                        namespace: tenant.namespace,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryNamespaceAdmin, MemoryTenantStore};
    use crate::store::TenantStore;

    fn provisioner() -> (SchemaProvisioner, Arc<MemoryTenantStore>, Arc<MemoryNamespaceAdmin>) {
        let store = Arc::new(MemoryTenantStore::new());
        let admin = Arc::new(MemoryNamespaceAdmin::new());
        let directory = Arc::new(TenantDirectory::new(
            store.clone(),
            100,
            Duration::from_secs(60),
        ));
        (
            SchemaProvisioner::new(directory, admin.clone(), Duration::from_secs(600)),
            store,
            admin,
        )
    }

    #[tokio::test]
    async fn test_create_tenant_derives_namespace() {
        let (provisioner, _, admin) = provisioner();

        let tenant = provisioner.create_tenant("Joe's Café", "joes-cafe").await.unwrap();
        assert_eq!(tenant.namespace, "tenant_joes_cafe");
        assert_eq!(tenant.name, "Joe's Café");
        assert_eq!(tenant.status, TenantStatus::Active);
        assert!(admin.namespace_exists("tenant_joes_cafe"));
        assert_eq!(admin.applied_versions("tenant_joes_cafe"), vec![1, 2, 3]);
        assert_eq!(namespace_for_slug(&tenant.slug), tenant.namespace);
    }

    #[tokio::test]
    async fn test_invalid_slug_never_touches_store() {
        let (provisioner, store, admin) = provisioner();

        assert!(matches!(
            provisioner.create_tenant("Acme", "-acme").await,
            Err(TenantError::InvalidSlug(_))
        ));
        assert!(matches!(
            provisioner.create_tenant("Acme", "ab").await,
            Err(TenantError::InvalidSlug(_))
        ));
        assert!(store.is_empty());
        assert_eq!(admin.creates(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_create_has_one_winner() {
        let (provisioner, store, admin) = provisioner();
        admin.set_ddl_latency(Duration::from_millis(20));

        let (first, second) = tokio::join!(
            provisioner.create_tenant("Acme Corp", "acme"),
            provisioner.create_tenant("Acme Corp", "acme"),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(TenantError::Conflict(_))))
                .count(),
            1
        );
        assert_eq!(store.len(), 1);
        assert_eq!(admin.creates(), 1);
    }

    #[tokio::test]
    async fn test_failed_provisioning_resumes_on_retry() {
        let (provisioner, store, admin) = provisioner();
        admin.fail_baseline(true);

        match provisioner.create_tenant("Acme Corp", "acme").await {
            Err(TenantError::ProvisioningFailure { slug, .. }) => assert_eq!(slug, "acme"),
            other => panic!("expected ProvisioningFailure, got {:?}", other),
        }
        let failed = store.find_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(failed.status, TenantStatus::ProvisioningFailed);

        admin.fail_baseline(false);
        let tenant = provisioner.create_tenant("Acme Corp", "acme").await.unwrap();
        assert_eq!(tenant.id, failed.id);
        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(admin.creates(), 1);
        assert_eq!(admin.applied_versions("tenant_acme"), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_concurrent_resume_has_one_winner() {
        let (provisioner, _, admin) = provisioner();
        admin.fail_create(true);
        let failed = provisioner.create_tenant("Acme Corp", "acme").await;
        assert!(matches!(failed, Err(TenantError::ProvisioningFailure { .. })));
        assert!(!admin.namespace_exists("tenant_acme"));

        admin.fail_create(false);
        admin.set_ddl_latency(Duration::from_millis(20));
        let (first, second) = tokio::join!(
            provisioner.create_tenant("Acme Corp", "acme"),
            provisioner.create_tenant("Acme Corp", "acme"),
        );

        assert!(first.is_ok() ^ second.is_ok());
        assert!(matches!(first, Err(TenantError::Conflict(_))) || matches!(second, Err(TenantError::Conflict(_))));
        assert_eq!(admin.creates(), 1);
    }

    #[tokio::test]
    async fn test_retry_provisioning_requires_failed_status() {
        let (provisioner, _, admin) = provisioner();
        let active = provisioner.create_tenant("Acme Corp", "acme").await.unwrap();
        assert!(matches!(
            provisioner.retry_provisioning(active.id).await,
            Err(TenantError::Conflict(_))
        ));

        admin.fail_baseline(true);
        let failed = provisioner.create_tenant("Beta", "beta").await;
        assert!(failed.is_err());
        admin.fail_baseline(false);

        let list = provisioner.directory.list(true).await.unwrap();
        let beta = list.iter().find(|t| t.slug == "beta").unwrap();
        let resumed = provisioner.retry_provisioning(beta.id).await.unwrap();
        assert_eq!(resumed.status, TenantStatus::Active);
    }

    #[tokio::test]
    async fn test_migrate_all_is_idempotent() {
        let (provisioner, _, _) = provisioner();
        provisioner.create_tenant("Acme Corp", "acme").await.unwrap();
        provisioner.create_tenant("Beta Bistro", "beta").await.unwrap();

        let report = provisioner.migrate_all().await.unwrap();
        assert_eq!(report.migrated.len(), 2);
        assert!(report.migrated.iter().all(|m| m.applied.is_empty()));
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_strand_provisioning() {
        let (provisioner, store, admin) = provisioner();
        admin.set_ddl_latency(Duration::from_millis(200));

        let caller = {
            let provisioner = provisioner.clone();
            tokio::spawn(async move { provisioner.create_tenant("Acme Corp", "acme").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let tenant = store.find_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(admin.applied_versions("tenant_acme"), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_abandoned_provisioning_is_reclaimed_after_lease() {
        let (provisioner, store, admin) = provisioner();
        // A provisioner that registered the tenant and then died
        let orphan = store
            .insert(&NewTenant {
                id: Uuid::new_v4(),
                name: "Acme Corp".to_string(),
                slug: "acme".to_string(),
                namespace: namespace_for_slug("acme"),
            })
            .await
            .unwrap();

        assert!(matches!(
            provisioner.create_tenant("Acme Corp", "acme").await,
            Err(TenantError::Conflict(_))
        ));
        assert!(matches!(
            provisioner.retry_provisioning(orphan.id).await,
            Err(TenantError::Conflict(_))
        ));
        assert_eq!(admin.creates(), 0);

        store.backdate(orphan.id, Duration::from_secs(601));
        let tenant = provisioner.create_tenant("Acme Corp", "acme").await.unwrap();
        assert_eq!(tenant.id, orphan.id);
        assert_eq!(tenant.status, TenantStatus::Active);
        assert!(admin.namespace_exists("tenant_acme"));
    }

    #[tokio::test]
    async fn test_stale_provisioning_resumes_via_retry() {
        let (provisioner, store, _) = provisioner();
        let orphan = store
            .insert(&NewTenant {
                id: Uuid::new_v4(),
                name: "Beta".to_string(),
                slug: "beta".to_string(),
                namespace: namespace_for_slug("beta"),
            })
            .await
            .unwrap();
        store.backdate(orphan.id, Duration::from_secs(3600));

        let resumed = provisioner.retry_provisioning(orphan.id).await.unwrap();
        assert_eq!(resumed.status, TenantStatus::Active);
    }

    #[tokio::test]
    async fn test_failed_activation_write_marks_failed() {
        let (provisioner, store, _) = provisioner();
        store.fail_activation(true);

        assert!(matches!(
            provisioner.create_tenant("Acme Corp", "acme").await,
            Err(TenantError::ProvisioningFailure { .. })
        ));
        let failed = store.find_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(failed.status, TenantStatus::ProvisioningFailed);

        store.fail_activation(false);
        let tenant = provisioner.retry_provisioning(failed.id).await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);
    }
}
