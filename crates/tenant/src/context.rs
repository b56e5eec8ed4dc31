//! Request-scoped tenant binding

use crate::error::{Result, TenantError};
use crate::pool::TenantPool;
use crate::registry::PoolHandle;
use bistro_models::Tenant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline of one request
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl RequestScope {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Resolves when the request is cancelled or its deadline passes.
    pub async fn interrupted(&self) -> &'static str {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.cancel.cancelled() => "request cancelled",
                () = tokio::time::sleep_until(deadline) => "request deadline exceeded",
            },
            None => {
                self.cancel.cancelled().await;
                "request cancelled"
            }
        }
    }
}

struct Checkout<P: TenantPool> {
    // Field order matters: the connection goes back to its pool before the
    // pool lease is dropped.
    conn: P::Connection,
    _handle: PoolHandle<P>,
}

struct ContextInner<P: TenantPool> {
    tenant: Arc<Tenant>,
    generation: u64,
    scope: RequestScope,
    checkout: Mutex<Option<Checkout<P>>>,
    released: AtomicBool,
}

impl<P: TenantPool> Drop for ContextInner<P> {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                tenant_id = %self.tenant.id,
                namespace = %self.tenant.namespace,
                "Tenant context dropped; returning connection"
            );
        }
    }
}

/// The tenant and connection bound to one request.
///
/// Clones share one binding. The connection returns to its pool on the
/// first [`release`](Self::release), or when the last clone is dropped.
pub struct RequestTenantContext<P: TenantPool> {
    inner: Arc<ContextInner<P>>,
}

impl<P: TenantPool> Clone for RequestTenantContext<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: TenantPool> RequestTenantContext<P> {
    pub(crate) fn bind(
        tenant: Arc<Tenant>,
        handle: PoolHandle<P>,
        conn: P::Connection,
        scope: RequestScope,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                tenant,
                generation: handle.generation(),
                scope,
                checkout: Mutex::new(Some(Checkout {
                    conn,
                    _handle: handle,
                })),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn tenant(&self) -> &Arc<Tenant> {
        &self.inner.tenant
    }

    pub fn namespace(&self) -> &str {
        &self.inner.tenant.namespace
    }

    /// Generation of the pool the connection came from
    pub fn pool_generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn scope(&self) -> &RequestScope {
        &self.inner.scope
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Exclusive access to the bound connection.
    ///
    /// Waits while another clone holds the connection.
    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, P::Connection>> {
        let guard = self.inner.checkout.lock().await;
        MutexGuard::try_map(guard, |checkout| checkout.as_mut().map(|c| &mut c.conn)).map_err(
            |_| {
                TenantError::Backend(format!(
                    "tenant context for {} was already released",
                    self.inner.tenant.slug
                ))
            },
        )
    }

    /// Return the connection to its pool.
    ///
    /// Waits for any outstanding [`connection`](Self::connection) guard.
    /// Releasing twice is a bug in the caller.
    pub async fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            tracing::error!(
                tenant_id = %self.inner.tenant.id,
                namespace = %self.inner.tenant.namespace,
                "Tenant context released more than once"
            );
            debug_assert!(false, "tenant context released more than once");
            return;
        }
        let checkout = self.inner.checkout.lock().await.take();
        drop(checkout);
    }
}
