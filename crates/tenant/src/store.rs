//! Landlord metadata store seam

use crate::error::Result;
use async_trait::async_trait;
use bistro_database::TenantRepository;
use bistro_models::{NewTenant, Tenant, TenantStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Backing store for tenant records.
///
/// `insert` must fail with `TenantError::Conflict` when the slug or the
/// namespace is already taken; that constraint is the only arbiter of
/// concurrent provisioning.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>>;

    async fn insert(&self, tenant: &NewTenant) -> Result<Tenant>;

    /// Compare-and-set on status. `Ok(None)` means the record was not in any of `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: &[TenantStatus],
        to: TenantStatus,
    ) -> Result<Option<Tenant>>;

    /// Claim a tenant for (re)provisioning: `provisioning_failed`, or
    /// `provisioning` untouched since `stale_before`. `Ok(None)` when neither holds.
    async fn claim_provisioning(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Tenant>>;

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> Result<Tenant>;

    async fn rename(&self, id: Uuid, name: &str) -> Result<Tenant>;

    async fn set_expiry(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<Tenant>;

    async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>>;
}

#[async_trait]
impl TenantStore for TenantRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(TenantRepository::find_by_id(self, id).await?)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        Ok(TenantRepository::find_by_slug(self, slug).await?)
    }

    async fn insert(&self, tenant: &NewTenant) -> Result<Tenant> {
        Ok(TenantRepository::insert(self, tenant).await?)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[TenantStatus],
        to: TenantStatus,
    ) -> Result<Option<Tenant>> {
        Ok(TenantRepository::transition_status(self, id, from, to).await?)
    }

    async fn claim_provisioning(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Tenant>> {
        Ok(TenantRepository::claim_provisioning(self, id, stale_before).await?)
    }

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> Result<Tenant> {
        Ok(TenantRepository::set_status(self, id, status).await?)
    }

    async fn rename(&self, id: Uuid, name: &str) -> Result<Tenant> {
        Ok(TenantRepository::rename(self, id, name).await?)
    }

    async fn set_expiry(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<Tenant> {
        Ok(TenantRepository::set_expiry(self, id, expires_at).await?)
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>> {
        Ok(TenantRepository::list(self, include_inactive).await?)
    }
}
