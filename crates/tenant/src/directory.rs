//! Tenant Directory
//!
//! Resolves a tenant identifier (id or slug) to a servable [`Tenant`].
//!
//! Reads go through two moka caches, one keyed by id and one by slug.
//! Concurrent misses on the same key share one backing-store query
//! (`try_get_with` single-flights the init future).
//!
//! Every administrative mutation advances a directory-wide epoch, records it
//! as the tenant's last-mutated epoch and then invalidates both keys. Cache
//! entries are stamped with the epoch observed before their fetch began; an
//! entry stamped earlier than its tenant's last mutation is stale and is
//! refetched. Both keys therefore go stale together, even for a fetch that
//! was already in flight when the mutation landed.

use crate::error::{Result, TenantError};
use crate::store::TenantStore;
use bistro_models::{normalize_slug, Tenant, TenantStatus};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A tenant identifier as presented by a caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantRef {
    Id(Uuid),
    Slug(String),
}

impl TenantRef {
    /// UUIDs resolve by id, anything else by slug. Blank input is `Unauthorized`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TenantError::Unauthorized(
                "no tenant identifier presented".to_string(),
            ));
        }
        match Uuid::parse_str(raw) {
            Ok(id) => Ok(TenantRef::Id(id)),
            Err(_) => Ok(TenantRef::Slug(raw.to_lowercase())),
        }
    }
}

impl fmt::Display for TenantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantRef::Id(id) => write!(f, "{}", id),
            TenantRef::Slug(slug) => f.write_str(slug),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    tenant: Arc<Tenant>,
    epoch: u64,
}

/// Directory cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectoryStats {
    pub cached_by_id: u64,
    pub cached_by_slug: u64,
}

pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    by_id: Cache<Uuid, CacheEntry>,
    by_slug: Cache<String, CacheEntry>,
    epoch: AtomicU64,
    mutated_at: Mutex<HashMap<Uuid, u64>>,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn TenantStore>, capacity: u64, ttl: Duration) -> Self {
        Self {
            store,
            by_id: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
            by_slug: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
            epoch: AtomicU64::new(0),
            mutated_at: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let mutated_at = self.mutated_at.lock().get(&entry.tenant.id).copied().unwrap_or(0);
        entry.epoch >= mutated_at
    }

    /// Resolve a servable tenant by id
    pub async fn resolve_by_id(&self, id: Uuid) -> Result<Arc<Tenant>> {
        let tenant = self.lookup_by_id(id).await?;
        Self::ensure_servable(tenant)
    }

    /// Resolve a servable tenant by slug
    pub async fn resolve_by_slug(&self, slug: &str) -> Result<Arc<Tenant>> {
        let tenant = self.lookup_by_slug(slug).await?;
        Self::ensure_servable(tenant)
    }

    pub async fn resolve(&self, tenant: &TenantRef) -> Result<Arc<Tenant>> {
        match tenant {
            TenantRef::Id(id) => self.resolve_by_id(*id).await,
            TenantRef::Slug(slug) => self.resolve_by_slug(slug).await,
        }
    }

    fn ensure_servable(tenant: Arc<Tenant>) -> Result<Arc<Tenant>> {
        match tenant.check_servable(Utc::now()) {
            Ok(()) => Ok(tenant),
            Err(reason) => Err(TenantError::Deactivated {
                slug: tenant.slug.clone(),
                reason: reason.to_string(),
            }),
        }
    }

    /// Cached lookup by id, whatever the tenant's status
    pub async fn lookup_by_id(&self, id: Uuid) -> Result<Arc<Tenant>> {
        loop {
            let entry = self
                .by_id
                .try_get_with(id, async {
                    let epoch = self.epoch.load(Ordering::Acquire);
                    let tenant = self
                        .store
                        .find_by_id(id)
                        .await?
                        .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
                    Ok::<_, TenantError>(CacheEntry {
                        tenant: Arc::new(tenant),
                        epoch,
                    })
                })
                .await
                .map_err(|e| (*e).clone())?;

            if self.is_fresh(&entry) {
                return Ok(entry.tenant);
            }
            self.by_id.invalidate(&id).await;
        }
    }

    /// Cached lookup by slug, whatever the tenant's status
    pub async fn lookup_by_slug(&self, slug: &str) -> Result<Arc<Tenant>> {
        let slug = slug.trim().to_lowercase();
        loop {
            let entry = self
                .by_slug
                .try_get_with(slug.clone(), async {
                    let epoch = self.epoch.load(Ordering::Acquire);
                    let tenant = self
                        .store
                        .find_by_slug(&slug)
                        .await?
                        .ok_or_else(|| TenantError::NotFound(slug.clone()))?;
                    Ok::<_, TenantError>(CacheEntry {
                        tenant: Arc::new(tenant),
                        epoch,
                    })
                })
                .await
                .map_err(|e| (*e).clone())?;

            if self.is_fresh(&entry) {
                return Ok(entry.tenant);
            }
            self.by_slug.invalidate(&slug).await;
        }
    }

    /// Drop every cached view of `tenant`.
    pub async fn invalidate(&self, tenant: &Tenant) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.mutated_at.lock().insert(tenant.id, epoch);
        self.by_id.invalidate(&tenant.id).await;
        self.by_slug.invalidate(&tenant.slug).await;

        tracing::debug!(tenant_id = %tenant.id, slug = %tenant.slug, "Invalidated tenant directory entries");
    }

    /// Soft-deactivate an active tenant; new resolutions return
    /// `Deactivated` immediately.
    ///
    /// Only `active` tenants can be deactivated, so `reactivate` never
    /// makes servable a tenant whose namespace was not fully built.
    pub async fn deactivate(&self, id: Uuid) -> Result<Tenant> {
        let tenant = self
            .store
            .transition_status(id, &[TenantStatus::Active], TenantStatus::Deactivated)
            .await?
            .ok_or_else(|| TenantError::Conflict(format!("tenant {} is not active", id)))?;
        self.invalidate(&tenant).await;

        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Deactivated tenant");
        Ok(tenant)
    }

    /// Reactivate a deactivated tenant
    pub async fn reactivate(&self, id: Uuid) -> Result<Tenant> {
        let tenant = self
            .store
            .transition_status(id, &[TenantStatus::Deactivated], TenantStatus::Active)
            .await?
            .ok_or_else(|| {
                TenantError::Conflict(format!("tenant {} is not deactivated", id))
            })?;
        self.invalidate(&tenant).await;

        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Reactivated tenant");
        Ok(tenant)
    }

    pub async fn rename(&self, id: Uuid, name: &str) -> Result<Tenant> {
        let tenant = self.store.rename(id, name).await?;
        self.invalidate(&tenant).await;
        Ok(tenant)
    }

    pub async fn set_expiry(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<Tenant> {
        let tenant = self.store.set_expiry(id, expires_at).await?;
        self.invalidate(&tenant).await;
        Ok(tenant)
    }

    /// Uncached read for administrative views
    pub async fn get(&self, id: Uuid) -> Result<Tenant> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| TenantError::NotFound(id.to_string()))
    }

    /// Uncached read by slug; the slug is normalized first.
    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        let slug = normalize_slug(slug).map_err(|e| TenantError::InvalidSlug(e.to_string()))?;
        self.store.find_by_slug(&slug).await
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>> {
        self.store.list(include_inactive).await
    }

    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            cached_by_id: self.by_id.entry_count(),
            cached_by_slug: self.by_slug.entry_count(),
        }
    }
}
