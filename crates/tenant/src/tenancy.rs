//! Root object wiring directory, provisioner, registry and isolation manager

use crate::config::TenancyConfig;
use crate::context::{RequestScope, RequestTenantContext};
use crate::directory::TenantDirectory;
use crate::error::Result;
use crate::isolation::ConnectionIsolationManager;
use crate::pool::{PgPoolFactory, PoolFactory};
use crate::provisioner::{MigrationReport, NamespaceAdmin, SchemaProvisioner};
use crate::registry::{RegistryStats, TenantPoolRegistry};
use crate::store::TenantStore;
use bistro_database::{Database, SchemaManager, TenantClusterConfig, TenantRepository};
use bistro_models::{Tenant, UpdateTenant};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Tenancy<F: PoolFactory> {
    config: TenancyConfig,
    directory: Arc<TenantDirectory>,
    provisioner: SchemaProvisioner,
    registry: TenantPoolRegistry<F>,
    isolation: ConnectionIsolationManager<F>,
    sweeper_cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Tenancy<PgPoolFactory> {
    /// Production wiring: landlord registry on `landlord`, tenant pools and
    /// DDL on the tenant cluster.
    pub async fn connect(
        config: TenancyConfig,
        landlord: &Database,
        cluster: &TenantClusterConfig,
    ) -> Result<Self> {
        let store = Arc::new(TenantRepository::new(landlord.pool().clone()));
        let admin = Arc::new(SchemaManager::new(cluster.connect_admin_pool().await?));
        let factory = Arc::new(PgPoolFactory::new(cluster, &config)?);
        Self::new(config, store, admin, factory)
    }
}

impl<F: PoolFactory> Tenancy<F> {
    pub fn new(
        config: TenancyConfig,
        store: Arc<dyn TenantStore>,
        admin: Arc<dyn NamespaceAdmin>,
        factory: Arc<F>,
    ) -> Result<Self> {
        config.validate()?;

        let directory = Arc::new(TenantDirectory::new(
            store,
            config.directory_cache_capacity,
            config.directory_cache_ttl,
        ));
        let registry = TenantPoolRegistry::new(factory, config.clone());

        Ok(Self {
            provisioner: SchemaProvisioner::new(directory.clone(), admin, config.provisioning_lease),
            isolation: ConnectionIsolationManager::new(directory.clone(), registry.clone()),
            directory,
            registry,
            config,
            sweeper_cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// Start the pool sweeper (idle, expired and deactivated tenants).
    /// Calling it again is a no-op.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = Some(
                self.registry
                    .spawn_sweeper(self.sweeper_cancel.clone(), self.directory.clone()),
            );
        }
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<TenantDirectory> {
        &self.directory
    }

    pub fn provisioner(&self) -> &SchemaProvisioner {
        &self.provisioner
    }

    pub fn registry(&self) -> &TenantPoolRegistry<F> {
        &self.registry
    }

    pub fn isolation(&self) -> &ConnectionIsolationManager<F> {
        &self.isolation
    }

    pub async fn bind_request(
        &self,
        identifier: Option<&str>,
        scope: RequestScope,
    ) -> Result<RequestTenantContext<F::Pool>> {
        self.isolation.bind_request(identifier, scope).await
    }

    pub async fn create_tenant(&self, name: &str, slug: &str) -> Result<Tenant> {
        self.provisioner.create_tenant(name, slug).await
    }

    pub async fn retry_provisioning(&self, id: Uuid) -> Result<Tenant> {
        self.provisioner.retry_provisioning(id).await
    }

    pub async fn migrate_all(&self) -> Result<MigrationReport> {
        self.provisioner.migrate_all().await
    }

    /// Deactivate a tenant and retire its pool.
    ///
    /// Requests already bound keep their connections; the pool closes after
    /// the drain grace period once they have all been released.
    pub async fn deactivate_tenant(&self, id: Uuid) -> Result<Tenant> {
        let tenant = self.directory.deactivate(id).await?;
        self.registry.retire(&tenant.namespace);
        Ok(tenant)
    }

    pub async fn reactivate_tenant(&self, id: Uuid) -> Result<Tenant> {
        self.directory.reactivate(id).await
    }

    /// Apply a rename and/or expiry change. An expiry in the past retires
    /// the pool immediately.
    pub async fn update_tenant(&self, id: Uuid, update: &UpdateTenant) -> Result<Tenant> {
        let mut tenant = self.directory.get(id).await?;
        if let Some(name) = &update.name {
            tenant = self.directory.rename(id, name.trim()).await?;
        }
        if let Some(expires_at) = update.expires_at {
            tenant = self.directory.set_expiry(id, expires_at).await?;
            if tenant.is_expired(Utc::now()) {
                self.registry.retire(&tenant.namespace);
            }
        }
        Ok(tenant)
    }

    pub async fn get_tenant(&self, id: Uuid) -> Result<Tenant> {
        self.directory.get(id).await
    }

    pub async fn list_tenants(&self, include_inactive: bool) -> Result<Vec<Tenant>> {
        self.directory.list(include_inactive).await
    }

    pub fn pool_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Stop the sweeper, then drain and close every tenant pool.
    pub async fn shutdown(&self) {
        self.sweeper_cancel.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "Tenant pool sweeper ended abnormally");
            }
        }
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenantError;
    use crate::memory::{MemoryCluster, MemoryNamespaceAdmin, MemoryPoolFactory, MemoryTenantStore};
    use std::time::Duration;

    fn tenancy() -> (Tenancy<MemoryPoolFactory>, Arc<MemoryPoolFactory>) {
        let factory = Arc::new(MemoryPoolFactory::new(Arc::new(MemoryCluster::new()), 2));
        let config = TenancyConfig {
            drain_grace_period: Duration::from_millis(30),
            checkout_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let tenancy = Tenancy::new(
            config,
            Arc::new(MemoryTenantStore::new()),
            Arc::new(MemoryNamespaceAdmin::new()),
            factory.clone(),
        )
        .unwrap();
        (tenancy, factory)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Tenancy::new(
            TenancyConfig {
                max_connections_per_pool: 0,
                ..Default::default()
            },
            Arc::new(MemoryTenantStore::new()),
            Arc::new(MemoryNamespaceAdmin::new()),
            Arc::new(MemoryPoolFactory::new(Arc::new(MemoryCluster::new()), 1)),
        );
        assert!(matches!(result, Err(TenantError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_deactivation_lets_in_flight_request_finish() {
        let (tenancy, factory) = tenancy();
        let acme = tenancy.create_tenant("Acme Corp", "acme").await.unwrap();

        let ctx = tenancy
            .bind_request(Some("acme"), RequestScope::default())
            .await
            .unwrap();

        tenancy.deactivate_tenant(acme.id).await.unwrap();
        assert!(matches!(
            tenancy.bind_request(Some("acme"), RequestScope::default()).await,
            Err(TenantError::Deactivated { .. })
        ));

        // The bound request keeps working past the grace period
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ctx.connection().await.unwrap().namespace(), "tenant_acme");
        assert!(factory.closed().is_empty());

        ctx.release().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(factory.closed(), vec!["tenant_acme".to_string()]);

        tenancy.reactivate_tenant(acme.id).await.unwrap();
        let again = tenancy
            .bind_request(Some("acme"), RequestScope::default())
            .await
            .unwrap();
        assert_eq!(again.namespace(), "tenant_acme");
    }

    #[tokio::test]
    async fn test_update_with_past_expiry_bars_tenant() {
        let (tenancy, _) = tenancy();
        let acme = tenancy.create_tenant("Acme Corp", "acme").await.unwrap();

        let renamed = tenancy
            .update_tenant(
                acme.id,
                &UpdateTenant {
                    name: Some("Acme Bistro".into()),
                    expires_at: Some(Some(Utc::now() - chrono::Duration::seconds(5))),
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Acme Bistro");

        match tenancy.bind_request(Some("acme"), RequestScope::default()).await {
            Err(TenantError::Deactivated { reason, .. }) => assert!(reason.contains("expired")),
            other => panic!("expected Deactivated, got {:?}", other.map(|c| c.namespace().to_string())),
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_pools() {
        let (tenancy, factory) = tenancy();
        tenancy.create_tenant("Acme Corp", "acme").await.unwrap();
        tenancy.create_tenant("Beta Bistro", "beta").await.unwrap();
        tenancy.start_sweeper();

        tenancy.bind_request(Some("acme"), RequestScope::default()).await.unwrap().release().await;
        tenancy.bind_request(Some("beta"), RequestScope::default()).await.unwrap().release().await;
        assert_eq!(tenancy.pool_stats().live_pools, 2);

        tenancy.shutdown().await;
        assert_eq!(factory.closed().len(), 2);
        assert_eq!(factory.checkouts(), factory.releases());
    }

    #[tokio::test]
    async fn test_unprovisioned_tenant_cannot_be_reactivated_into_service() {
        let admin = Arc::new(MemoryNamespaceAdmin::new());
        let tenancy = Tenancy::new(
            TenancyConfig::default(),
            Arc::new(MemoryTenantStore::new()),
            admin.clone(),
            Arc::new(MemoryPoolFactory::new(Arc::new(MemoryCluster::new()), 1)),
        )
        .unwrap();

        admin.fail_create(true);
        assert!(matches!(
            tenancy.create_tenant("Acme Corp", "acme").await,
            Err(TenantError::ProvisioningFailure { .. })
        ));
        let acme = tenancy.list_tenants(true).await.unwrap().remove(0);

        assert!(matches!(
            tenancy.deactivate_tenant(acme.id).await,
            Err(TenantError::Conflict(_))
        ));
        assert!(matches!(
            tenancy.reactivate_tenant(acme.id).await,
            Err(TenantError::Conflict(_))
        ));
        assert!(matches!(
            tenancy.bind_request(Some("acme"), RequestScope::default()).await,
            Err(TenantError::Deactivated { .. })
        ));
        assert!(!admin.namespace_exists("tenant_acme"));
    }
}
