//! Connection Isolation Manager
//!
//! Binds a request to exactly one connection from its tenant's own pool.

use crate::context::{RequestScope, RequestTenantContext};
use crate::directory::{TenantDirectory, TenantRef};
use crate::error::{Result, TenantError};
use crate::pool::{PoolFactory, TenantPool};
use crate::registry::{PoolHandle, TenantPoolRegistry};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct ConnectionIsolationManager<F: PoolFactory> {
    directory: Arc<TenantDirectory>,
    registry: TenantPoolRegistry<F>,
    checkout_timeout: Duration,
}

impl<F: PoolFactory> ConnectionIsolationManager<F> {
    pub fn new(directory: Arc<TenantDirectory>, registry: TenantPoolRegistry<F>) -> Self {
        let checkout_timeout = registry.config().checkout_timeout;
        Self {
            directory,
            registry,
            checkout_timeout,
        }
    }

    /// Resolve `identifier` and check out a connection scoped to its tenant.
    ///
    /// A missing or blank identifier is `Unauthorized`. Cancellation or an
    /// elapsed deadline at any point before the checkout completes yields
    /// `Cancelled` and leaves nothing checked out.
    pub async fn bind_request(
        &self,
        identifier: Option<&str>,
        scope: RequestScope,
    ) -> Result<RequestTenantContext<F::Pool>> {
        let tenant_ref = TenantRef::parse(identifier.unwrap_or_default())?;

        tokio::select! {
            biased;
            reason = scope.interrupted() => Err(TenantError::Cancelled(reason.to_string())),
            bound = self.bind(&tenant_ref, scope.clone()) => bound,
        }
    }

    async fn bind(
        &self,
        tenant_ref: &TenantRef,
        scope: RequestScope,
    ) -> Result<RequestTenantContext<F::Pool>> {
        let tenant = self.directory.resolve(tenant_ref).await?;
        let handle = self.registry.acquire_pool(&tenant).await?;
        let conn = self.checkout(&handle).await?;

        tracing::debug!(
            tenant_id = %tenant.id,
            namespace = %tenant.namespace,
            generation = handle.generation(),
            "Bound request to tenant connection"
        );
        Ok(RequestTenantContext::bind(tenant, handle, conn, scope))
    }

    async fn checkout(
        &self,
        handle: &PoolHandle<F::Pool>,
    ) -> Result<<F::Pool as TenantPool>::Connection> {
        match tokio::time::timeout(self.checkout_timeout, handle.acquire()).await {
            Ok(conn) => conn,
            Err(_) => {
                tracing::warn!(
                    namespace = %handle.namespace(),
                    timeout_ms = self.checkout_timeout.as_millis() as u64,
                    "Timed out waiting for a tenant connection"
                );
                Err(TenantError::PoolExhausted(format!(
                    "no connection for namespace {} within {}ms",
                    handle.namespace(),
                    self.checkout_timeout.as_millis()
                )))
            }
        }
    }

    /// Bind, run `f` with the context, and release on every exit path.
    ///
    /// `f` is abandoned with `Cancelled` if the scope is cancelled or its
    /// deadline passes first.
    pub async fn run_scoped<T, E, Fut>(
        &self,
        identifier: Option<&str>,
        scope: RequestScope,
        f: impl FnOnce(RequestTenantContext<F::Pool>) -> Fut,
    ) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<TenantError>,
    {
        let ctx = self.bind_request(identifier, scope.clone()).await?;

        let result = tokio::select! {
            biased;
            reason = scope.interrupted() => Err(TenantError::Cancelled(reason.to_string()).into()),
            out = f(ctx.clone()) => out,
        };

        if !ctx.is_released() {
            ctx.release().await;
        }
        result
    }

    pub fn directory(&self) -> &Arc<TenantDirectory> {
        &self.directory
    }

    pub fn registry(&self) -> &TenantPoolRegistry<F> {
        &self.registry
    }
}
