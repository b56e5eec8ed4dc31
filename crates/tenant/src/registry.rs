//! Tenant Pool Registry
//!
//! Owns at most `max_live_pools` per-tenant pools, keyed by namespace.
//!
//! The map lock is a `parking_lot` mutex and is never held across an
//! `.await`. Pool creation happens outside the lock through a per-slot
//! `OnceCell`, so concurrent first accesses for one tenant share a single
//! creation. Every [`PoolHandle`] holds a lease on its slot; leases are only
//! taken under the map lock, and eviction only considers slots with no
//! lease, so an entry can never be evicted from under a caller.

use crate::config::TenancyConfig;
use crate::directory::TenantDirectory;
use crate::error::{Result, TenantError};
use crate::pool::{PoolFactory, TenantPool};
use bistro_models::Tenant;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

struct Slot<P> {
    tenant_id: Uuid,
    namespace: String,
    generation: u64,
    /// Latest snapshot seen by `acquire_pool`, used by the expiry sweep
    tenant: Mutex<Arc<Tenant>>,
    pool: OnceCell<Arc<P>>,
    refs: AtomicUsize,
    lru_tick: AtomicU64,
    last_used_at: Mutex<Instant>,
    idle: Notify,
}

impl<P> Slot<P> {
    fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.refs() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Reference on a registry slot; the slot is not evictable while one exists.
struct Lease<P> {
    slot: Arc<Slot<P>>,
}

impl<P> Drop for Lease<P> {
    fn drop(&mut self) {
        *self.slot.last_used_at.lock() = Instant::now();
        if self.slot.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot.idle.notify_waiters();
        }
    }
}

/// A leased tenant pool
pub struct PoolHandle<P> {
    pool: Arc<P>,
    lease: Lease<P>,
}

impl<P: TenantPool> PoolHandle<P> {
    /// Check out one connection. Unbounded; callers race it against their deadline.
    pub async fn acquire(&self) -> Result<P::Connection> {
        self.pool.acquire().await
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn namespace(&self) -> &str {
        &self.lease.slot.namespace
    }

    pub fn tenant_id(&self) -> Uuid {
        self.lease.slot.tenant_id
    }

    pub fn generation(&self) -> u64 {
        self.lease.slot.generation
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub tenant_id: Uuid,
    pub namespace: String,
    pub generation: u64,
    pub active_checkouts: usize,
    pub idle_secs: u64,
}

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub live_pools: usize,
    pub capacity: usize,
    pub connection_ceiling: u64,
    pub creations: u64,
    pub evictions: u64,
    pub retirements: u64,
    pub pools: Vec<PoolStats>,
}

/// Result of one idle sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub evicted: usize,
    pub retired: usize,
}

struct RegistryState<P> {
    slots: HashMap<String, Arc<Slot<P>>>,
    tick: u64,
    closed: bool,
}

struct RegistryInner<F: PoolFactory> {
    factory: Arc<F>,
    config: TenancyConfig,
    state: Mutex<RegistryState<F::Pool>>,
    generation: AtomicU64,
    creations: AtomicU64,
    evictions: AtomicU64,
    retirements: AtomicU64,
    drains: TaskTracker,
    shutdown: CancellationToken,
}

pub struct TenantPoolRegistry<F: PoolFactory> {
    inner: Arc<RegistryInner<F>>,
}

impl<F: PoolFactory> Clone for TenantPoolRegistry<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: PoolFactory> TenantPoolRegistry<F> {
    pub fn new(factory: Arc<F>, config: TenancyConfig) -> Self {
        tracing::debug!(
            max_live_pools = config.max_live_pools,
            max_connections_per_pool = config.max_connections_per_pool,
            "Created tenant pool registry"
        );
        Self {
            inner: Arc::new(RegistryInner {
                factory,
                config,
                state: Mutex::new(RegistryState {
                    slots: HashMap::new(),
                    tick: 0,
                    closed: false,
                }),
                generation: AtomicU64::new(0),
                creations: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                retirements: AtomicU64::new(0),
                drains: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.inner.factory
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.inner.config
    }

    /// Lease the tenant's pool, creating it on first access.
    ///
    /// At capacity the least recently used pool without leases is evicted.
    /// Fails with `PoolExhausted` when every live pool is in use.
    pub async fn acquire_pool(&self, tenant: &Arc<Tenant>) -> Result<PoolHandle<F::Pool>> {
        let (lease, evicted) = self.lease_slot(tenant)?;

        if let Some(slot) = evicted {
            self.inner.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                tenant_id = %slot.tenant_id,
                namespace = %slot.namespace,
                generation = slot.generation,
                "Evicting least recently used tenant pool"
            );
            if let Some(pool) = slot.pool.get() {
                pool.close().await;
            }
        }

        let slot = lease.slot.clone();
        let created = slot
            .pool
            .get_or_try_init(|| async {
                let pool = self.inner.factory.create_pool(tenant).await?;
                self.inner.creations.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    tenant_id = %slot.tenant_id,
                    namespace = %slot.namespace,
                    generation = slot.generation,
                    "Created tenant pool"
                );
                Ok::<_, TenantError>(Arc::new(pool))
            })
            .await;

        match created {
            Ok(pool) => Ok(PoolHandle {
                pool: pool.clone(),
                lease,
            }),
            Err(e) => {
                tracing::error!(
                    tenant_id = %slot.tenant_id,
                    namespace = %slot.namespace,
                    error = %e,
                    "Failed to create tenant pool"
                );
                self.forget_failed(&slot);
                Err(e)
            }
        }
    }

    /// Find or insert the slot and take a lease on it, all under the lock.
    #[allow(clippy::type_complexity)]
    fn lease_slot(
        &self,
        tenant: &Arc<Tenant>,
    ) -> Result<(Lease<F::Pool>, Option<Arc<Slot<F::Pool>>>)> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TenantError::Cancelled(
                "tenant pool registry is shut down".to_string(),
            ));
        }
        state.tick += 1;
        let tick = state.tick;

        if let Some(slot) = state.slots.get(&tenant.namespace) {
            slot.refs.fetch_add(1, Ordering::AcqRel);
            slot.lru_tick.store(tick, Ordering::Relaxed);
            *slot.tenant.lock() = tenant.clone();
            return Ok((Lease { slot: slot.clone() }, None));
        }

        let mut evicted = None;
        if state.slots.len() >= self.inner.config.max_live_pools {
            let victim = state
                .slots
                .iter()
                .filter(|(_, slot)| slot.refs() == 0)
                .min_by_key(|(_, slot)| slot.lru_tick.load(Ordering::Relaxed))
                .map(|(namespace, _)| namespace.clone());
            match victim {
                Some(namespace) => evicted = state.slots.remove(&namespace),
                None => {
                    tracing::warn!(
                        namespace = %tenant.namespace,
                        live_pools = state.slots.len(),
                        "Every tenant pool is in use; rejecting new tenant"
                    );
                    return Err(TenantError::PoolExhausted(format!(
                        "all {} tenant pools are in use",
                        self.inner.config.max_live_pools
                    )));
                }
            }
        }

        let slot = Arc::new(Slot {
            tenant_id: tenant.id,
            namespace: tenant.namespace.clone(),
            generation: self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1,
            tenant: Mutex::new(tenant.clone()),
            pool: OnceCell::new(),
            refs: AtomicUsize::new(1),
            lru_tick: AtomicU64::new(tick),
            last_used_at: Mutex::new(Instant::now()),
            idle: Notify::new(),
        });
        state.slots.insert(tenant.namespace.clone(), slot.clone());
        Ok((Lease { slot }, evicted))
    }

    /// Drop a slot whose creation failed, unless another caller is still
    /// waiting to retry it.
    fn forget_failed(&self, slot: &Arc<Slot<F::Pool>>) {
        let mut state = self.inner.state.lock();
        let registered = state
            .slots
            .get(&slot.namespace)
            .map(|s| Arc::ptr_eq(s, slot))
            .unwrap_or(false);
        if registered && slot.pool.get().is_none() && slot.refs() == 1 {
            state.slots.remove(&slot.namespace);
        }
    }

    /// Remove a tenant's pool and drain it in the background.
    ///
    /// Outstanding checkouts finish normally; the pool closes once the grace
    /// period has passed and every lease is gone. Returns `None` when the
    /// tenant had no live pool.
    pub fn retire(&self, namespace: &str) -> Option<JoinHandle<()>> {
        let slot = self.inner.state.lock().slots.remove(namespace)?;
        Some(self.spawn_drain(slot, self.inner.config.drain_grace_period))
    }

    fn spawn_drain(&self, slot: Arc<Slot<F::Pool>>, grace: Duration) -> JoinHandle<()> {
        self.inner.retirements.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            tenant_id = %slot.tenant_id,
            namespace = %slot.namespace,
            generation = slot.generation,
            grace_ms = grace.as_millis() as u64,
            "Retiring tenant pool"
        );
        let max_checkout_lifetime = self.inner.config.max_checkout_lifetime;
        self.inner
            .drains
            .spawn(drain(slot, grace, max_checkout_lifetime))
    }

    /// Evict pools idle for a full interval and retire pools of expired tenants
    pub async fn sweep_idle(&self) -> SweepOutcome {
        let idle_after = self.inner.config.idle_eviction_interval;
        let now = Utc::now();

        let (idle, expired) = {
            let mut state = self.inner.state.lock();
            let mut idle = Vec::new();
            let mut expired = Vec::new();
            state.slots.retain(|_, slot| {
                if slot.tenant.lock().is_expired(now) {
                    expired.push(slot.clone());
                    false
                } else if slot.refs() == 0 && slot.last_used_at.lock().elapsed() >= idle_after {
                    idle.push(slot.clone());
                    false
                } else {
                    true
                }
            });
            (idle, expired)
        };

        let outcome = SweepOutcome {
            evicted: idle.len(),
            retired: expired.len(),
        };

        for slot in idle {
            self.inner.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                tenant_id = %slot.tenant_id,
                namespace = %slot.namespace,
                generation = slot.generation,
                "Evicting idle tenant pool"
            );
            if let Some(pool) = slot.pool.get() {
                pool.close().await;
            }
        }
        for slot in expired {
            tracing::info!(tenant_id = %slot.tenant_id, namespace = %slot.namespace, "Tenant expired");
            self.spawn_drain(slot, self.inner.config.drain_grace_period);
        }

        outcome
    }

    /// Retire pools whose tenant no longer resolves as servable.
    ///
    /// Catches a pool created by a request that resolved its tenant just
    /// before a deactivation and reached `acquire_pool` after the retire.
    pub async fn retire_unservable(&self, directory: &TenantDirectory) -> usize {
        let live: Vec<(Uuid, String, u64)> = self
            .inner
            .state
            .lock()
            .slots
            .values()
            .map(|slot| (slot.tenant_id, slot.namespace.clone(), slot.generation))
            .collect();

        let mut retired = 0;
        for (tenant_id, namespace, generation) in live {
            match directory.resolve_by_id(tenant_id).await {
                Err(e @ (TenantError::Deactivated { .. } | TenantError::NotFound(_))) => {
                    let slot = {
                        let mut state = self.inner.state.lock();
                        match state.slots.get(&namespace) {
                            Some(slot) if slot.generation == generation => state.slots.remove(&namespace),
                            _ => None,
                        }
                    };
                    if let Some(slot) = slot {
                        tracing::info!(
                            tenant_id = %tenant_id,
                            namespace = %namespace,
                            reason = %e,
                            "Tenant no longer servable"
                        );
                        self.spawn_drain(slot, self.inner.config.drain_grace_period);
                        retired += 1;
                    }
                }
                Err(e) => tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Could not re-check tenant for live pool"
                ),
                Ok(_) => {}
            }
        }
        retired
    }

    /// Every `idle_eviction_interval`, run [`sweep_idle`](Self::sweep_idle)
    /// and [`retire_unservable`](Self::retire_unservable) until `cancel`
    /// fires or the registry shuts down.
    pub fn spawn_sweeper(
        &self,
        cancel: CancellationToken,
        directory: Arc<TenantDirectory>,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        let interval = self.inner.config.idle_eviction_interval;
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = cancel.cancelled() => break,
                    () = shutdown.cancelled() => break,
                }
                let outcome = registry.sweep_idle().await;
                let barred = registry.retire_unservable(&directory).await;
                if outcome != SweepOutcome::default() || barred > 0 {
                    tracing::debug!(
                        evicted = outcome.evicted,
                        retired = outcome.retired + barred,
                        "Tenant pool sweep finished"
                    );
                }
            }
        })
    }

    /// Refuse new pools, then drain and close every live and retiring pool.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let slots: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.slots.drain().map(|(_, slot)| slot).collect()
        };

        tracing::info!(live_pools = slots.len(), "Shutting down tenant pool registry");
        for slot in slots {
            self.spawn_drain(slot, Duration::ZERO);
        }
        self.inner.drains.close();
        self.inner.drains.wait().await;
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.inner.state.lock().slots.contains_key(namespace)
    }

    pub fn live_pools(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.inner.state.lock();
        let mut pools: Vec<PoolStats> = state
            .slots
            .values()
            .map(|slot| PoolStats {
                tenant_id: slot.tenant_id,
                namespace: slot.namespace.clone(),
                generation: slot.generation,
                active_checkouts: slot.refs(),
                idle_secs: slot.last_used_at.lock().elapsed().as_secs(),
            })
            .collect();
        pools.sort_by(|a, b| a.namespace.cmp(&b.namespace));

        RegistryStats {
            live_pools: state.slots.len(),
            capacity: self.inner.config.max_live_pools,
            connection_ceiling: self.inner.config.connection_ceiling(),
            creations: self.inner.creations.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            retirements: self.inner.retirements.load(Ordering::Relaxed),
            pools,
        }
    }
}

async fn drain<P: TenantPool>(slot: Arc<Slot<P>>, grace: Duration, max_checkout_lifetime: Duration) {
    if !grace.is_zero() {
        tokio::time::sleep(grace).await;
    }

    let drained = tokio::time::timeout(max_checkout_lifetime, slot.wait_idle())
        .await
        .is_ok();

    let Some(pool) = slot.pool.get() else {
        return;
    };
    if drained {
        pool.close().await;
        tracing::info!(
            tenant_id = %slot.tenant_id,
            namespace = %slot.namespace,
            generation = slot.generation,
            "Closed tenant pool"
        );
    } else {
        tracing::warn!(
            tenant_id = %slot.tenant_id,
            namespace = %slot.namespace,
            generation = slot.generation,
            outstanding = slot.refs(),
            "Checkout outlived max_checkout_lifetime; closing tenant pool anyway"
        );
        let pool = pool.clone();
        tokio::spawn(async move { pool.close().await });
    }
}
