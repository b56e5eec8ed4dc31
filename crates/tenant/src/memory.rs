//! In-memory backends
//!
//! Implementations of every backend seam that need no database. They count
//! reads, checkouts and releases so tests can assert on the exact traffic
//! the core generates.

use crate::error::{Result, TenantError};
use crate::pool::{PoolFactory, TenantPool};
use crate::provisioner::NamespaceAdmin;
use crate::store::TenantStore;
use async_trait::async_trait;
use bistro_models::{namespace_for_slug, NewTenant, Tenant, TenantStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

/// Landlord tenant registry held in a map
#[derive(Default)]
pub struct MemoryTenantStore {
    tenants: Mutex<HashMap<Uuid, Tenant>>,
    read_latency: Mutex<Duration>,
    reads_by_id: AtomicUsize,
    reads_by_slug: AtomicUsize,
    fail_activation: AtomicBool,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already provisioned, active tenant
    pub fn seed_active(&self, name: &str, slug: &str) -> Tenant {
        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            namespace: namespace_for_slug(slug),
            status: TenantStatus::Active,
            expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.tenants.lock().insert(tenant.id, tenant.clone());
        tenant
    }

    pub fn set_read_latency(&self, latency: Duration) {
        *self.read_latency.lock() = latency;
    }

    pub fn reads_by_id(&self) -> usize {
        self.reads_by_id.load(Ordering::SeqCst)
    }

    pub fn reads_by_slug(&self) -> usize {
        self.reads_by_slug.load(Ordering::SeqCst)
    }

    /// Make every transition to `active` fail with a backend error
    pub fn fail_activation(&self, fail: bool) {
        self.fail_activation.store(fail, Ordering::SeqCst);
    }

    /// Backdate a record's `updated_at`, as if its last writer went away
    pub fn backdate(&self, id: Uuid, by: Duration) {
        if let Some(tenant) = self.tenants.lock().get_mut(&id) {
            tenant.updated_at = tenant.updated_at - chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }

    pub fn len(&self) -> usize {
        self.tenants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.lock().is_empty()
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Result<Tenant>
    where
        F: FnOnce(&mut Tenant),
    {
        let mut tenants = self.tenants.lock();
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        apply(tenant);
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        self.reads_by_id.fetch_add(1, Ordering::SeqCst);
        let latency = *self.read_latency.lock();
        simulate_latency(latency).await;
        Ok(self.tenants.lock().get(&id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        self.reads_by_slug.fetch_add(1, Ordering::SeqCst);
        let latency = *self.read_latency.lock();
        simulate_latency(latency).await;
        Ok(self
            .tenants
            .lock()
            .values()
            .find(|t| t.slug == slug)
            .cloned())
    }

    async fn insert(&self, new: &NewTenant) -> Result<Tenant> {
        let mut tenants = self.tenants.lock();
        if tenants.values().any(|t| t.slug == new.slug) {
            return Err(TenantError::Conflict(format!(
                "Tenant with slug '{}' already exists",
                new.slug
            )));
        }
        if tenants.values().any(|t| t.namespace == new.namespace) {
            return Err(TenantError::Conflict(format!(
                "Tenant with namespace '{}' already exists",
                new.namespace
            )));
        }

        let now = Utc::now();
        let tenant = Tenant {
            id: new.id,
            name: new.name.clone(),
            slug: new.slug.clone(),
            namespace: new.namespace.clone(),
            status: TenantStatus::Provisioning,
            expires_at: None,
            created_at: now,
            updated_at: now,
        };
        tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[TenantStatus],
        to: TenantStatus,
    ) -> Result<Option<Tenant>> {
        if to == TenantStatus::Active && self.fail_activation.load(Ordering::SeqCst) {
            return Err(TenantError::Backend("landlord write failed".to_string()));
        }
        let mut tenants = self.tenants.lock();
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        if !from.contains(&tenant.status) {
            return Ok(None);
        }
        tenant.status = to;
        tenant.updated_at = Utc::now();
        Ok(Some(tenant.clone()))
    }

    async fn claim_provisioning(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Tenant>> {
        let mut tenants = self.tenants.lock();
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        let claimable = match tenant.status {
            TenantStatus::ProvisioningFailed => true,
            TenantStatus::Provisioning => tenant.updated_at < stale_before,
            TenantStatus::Active | TenantStatus::Deactivated => false,
        };
        if !claimable {
            return Ok(None);
        }
        tenant.status = TenantStatus::Provisioning;
        tenant.updated_at = Utc::now();
        Ok(Some(tenant.clone()))
    }

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> Result<Tenant> {
        self.update(id, |t| t.status = status)
    }

    async fn rename(&self, id: Uuid, name: &str) -> Result<Tenant> {
        self.update(id, |t| t.name = name.to_string())
    }

    async fn set_expiry(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<Tenant> {
        self.update(id, |t| t.expires_at = expires_at)
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self
            .tenants
            .lock()
            .values()
            .filter(|t| include_inactive || t.status == TenantStatus::Active)
            .cloned()
            .collect();
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(tenants)
    }
}

/// Namespace DDL against an in-memory catalogue
#[derive(Default)]
pub struct MemoryNamespaceAdmin {
    /// namespace -> applied baseline versions
    namespaces: Mutex<HashMap<String, Vec<i32>>>,
    creates: AtomicUsize,
    ddl_latency: Mutex<Duration>,
    fail_create: AtomicBool,
    fail_baseline: AtomicBool,
}

impl MemoryNamespaceAdmin {
    /// Baseline versions applied to every new namespace
    pub const BASELINE: &'static [i32] = &[1, 2, 3];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace_exists(&self, namespace: &str) -> bool {
        self.namespaces.lock().contains_key(namespace)
    }

    pub fn namespaces(&self) -> HashSet<String> {
        self.namespaces.lock().keys().cloned().collect()
    }

    /// Number of `create_namespace` calls that created a namespace
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn applied_versions(&self, namespace: &str) -> Vec<i32> {
        self.namespaces
            .lock()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_ddl_latency(&self, latency: Duration) {
        *self.ddl_latency.lock() = latency;
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_baseline(&self, fail: bool) {
        self.fail_baseline.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NamespaceAdmin for MemoryNamespaceAdmin {
    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let latency = *self.ddl_latency.lock();
        simulate_latency(latency).await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TenantError::Backend(format!(
                "CREATE SCHEMA {} rejected",
                namespace
            )));
        }

        let mut namespaces = self.namespaces.lock();
        if !namespaces.contains_key(namespace) {
            namespaces.insert(namespace.to_string(), Vec::new());
            self.creates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn apply_baseline(&self, namespace: &str) -> Result<Vec<i32>> {
        if self.fail_baseline.load(Ordering::SeqCst) {
            return Err(TenantError::Backend(format!(
                "baseline migration for {} failed",
                namespace
            )));
        }

        let mut namespaces = self.namespaces.lock();
        let applied = namespaces.get_mut(namespace).ok_or_else(|| {
            TenantError::Backend(format!("schema {} does not exist", namespace))
        })?;
        let mut newly_applied = Vec::new();
        for version in Self::BASELINE {
            if !applied.contains(version) {
                applied.push(*version);
                newly_applied.push(*version);
            }
        }
        Ok(newly_applied)
    }
}

/// Shared row storage partitioned by namespace
#[derive(Default)]
pub struct MemoryCluster {
    rows: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, namespace: &str, row: &str) {
        self.rows
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .push(row.to_string());
    }
}

#[derive(Default)]
struct Traffic {
    checkouts: AtomicUsize,
    releases: AtomicUsize,
    closed: Mutex<Vec<String>>,
}

/// Builds [`MemoryPool`]s over a [`MemoryCluster`]
pub struct MemoryPoolFactory {
    cluster: Arc<MemoryCluster>,
    max_connections: usize,
    creations: AtomicUsize,
    create_latency: Mutex<Duration>,
    fail_create: AtomicBool,
    traffic: Arc<Traffic>,
}

impl MemoryPoolFactory {
    pub fn new(cluster: Arc<MemoryCluster>, max_connections: usize) -> Self {
        Self {
            cluster,
            max_connections,
            creations: AtomicUsize::new(0),
            create_latency: Mutex::new(Duration::ZERO),
            fail_create: AtomicBool::new(false),
            traffic: Arc::new(Traffic::default()),
        }
    }

    pub fn set_create_latency(&self, latency: Duration) {
        *self.create_latency.lock() = latency;
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> usize {
        self.traffic.checkouts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.traffic.releases.load(Ordering::SeqCst)
    }

    /// Namespaces whose pools were closed, in closing order
    pub fn closed(&self) -> Vec<String> {
        self.traffic.closed.lock().clone()
    }
}

#[async_trait]
impl PoolFactory for MemoryPoolFactory {
    type Pool = MemoryPool;

    async fn create_pool(&self, tenant: &Tenant) -> Result<MemoryPool> {
        let latency = *self.create_latency.lock();
        simulate_latency(latency).await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TenantError::Backend(format!(
                "cannot connect to namespace {}",
                tenant.namespace
            )));
        }

        self.creations.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryPool {
            namespace: tenant.namespace.clone(),
            slots: Arc::new(Semaphore::new(self.max_connections)),
            closed: AtomicBool::new(false),
            cluster: self.cluster.clone(),
            traffic: self.traffic.clone(),
        })
    }
}

/// Bounded pool; waiters are served FIFO by the semaphore
pub struct MemoryPool {
    namespace: String,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
    cluster: Arc<MemoryCluster>,
    traffic: Arc<Traffic>,
}

impl MemoryPool {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[async_trait]
impl TenantPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection> {
        let permit = self.slots.clone().acquire_owned().await.map_err(|_| {
            TenantError::Backend(format!("pool for namespace {} is closed", self.namespace))
        })?;
        self.traffic.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            namespace: self.namespace.clone(),
            cluster: self.cluster.clone(),
            traffic: self.traffic.clone(),
            _permit: permit,
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.slots.close();
            self.traffic.closed.lock().push(self.namespace.clone());
        }
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// A checked-out connection whose namespace was fixed when it was opened
pub struct MemoryConnection {
    namespace: String,
    cluster: Arc<MemoryCluster>,
    traffic: Arc<Traffic>,
    _permit: OwnedSemaphorePermit,
}

impl MemoryConnection {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Unqualified `SELECT`: sees only the bound namespace
    pub fn fetch_rows(&self) -> Vec<String> {
        self.cluster
            .rows
            .lock()
            .get(&self.namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Unqualified `INSERT` into the bound namespace
    pub fn insert_row(&mut self, row: &str) {
        self.cluster.seed(&self.namespace, row);
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.traffic.releases.fetch_add(1, Ordering::SeqCst);
    }
}
