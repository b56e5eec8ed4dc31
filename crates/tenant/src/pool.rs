//! Per-tenant pool seam
//!
//! A [`PoolFactory`] builds one bounded pool per tenant; every connection the
//! pool hands out is already scoped to that tenant's namespace. Nothing in
//! this crate ever changes the namespace of a live connection.

use crate::config::TenancyConfig;
use crate::error::{Result, TenantError};
use async_trait::async_trait;
use bistro_database::{connect_namespace_pool, NamespacePoolOptions, TenantClusterConfig};
use bistro_models::Tenant;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgConnectOptions;
use sqlx::{PgPool, Postgres};
use std::time::Duration;

/// A bounded pool of physical connections bound to one namespace
#[async_trait]
pub trait TenantPool: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Wait for a free connection. Waiters are served in arrival order.
    ///
    /// Callers bound the wait themselves; dropping the future abandons it
    /// without checking anything out.
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Close every physical connection. Waits for checked-out ones to return.
    async fn close(&self);

    fn namespace(&self) -> &str;
}

/// Builds tenant pools
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: TenantPool;

    async fn create_pool(&self, tenant: &Tenant) -> Result<Self::Pool>;
}

/// sqlx pool pinned to a tenant namespace
pub struct PgTenantPool {
    pool: PgPool,
    namespace: String,
}

impl PgTenantPool {
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantPool for PgTenantPool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<Self::Connection> {
        self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => TenantError::PoolExhausted(format!(
                "no free connection for namespace {}",
                self.namespace
            )),
            other => TenantError::Backend(format!(
                "checkout for namespace {} failed: {}",
                self.namespace, other
            )),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Creates [`PgTenantPool`]s on the tenant cluster
pub struct PgPoolFactory {
    base: PgConnectOptions,
    options: NamespacePoolOptions,
}

impl PgPoolFactory {
    pub fn new(cluster: &TenantClusterConfig, config: &TenancyConfig) -> Result<Self> {
        let base = cluster.connect_options()?;
        Ok(Self {
            base,
            options: NamespacePoolOptions {
                max_connections: config.max_connections_per_pool,
                min_connections: config.min_connections_per_pool,
                acquire_timeout: config.checkout_timeout,
                idle_timeout: config.idle_eviction_interval.max(Duration::from_secs(60)),
            },
        })
    }
}

#[async_trait]
impl PoolFactory for PgPoolFactory {
    type Pool = PgTenantPool;

    async fn create_pool(&self, tenant: &Tenant) -> Result<Self::Pool> {
        let pool = connect_namespace_pool(&self.base, &tenant.namespace, &self.options).await?;
        Ok(PgTenantPool {
            pool,
            namespace: tenant.namespace.clone(),
        })
    }
}
