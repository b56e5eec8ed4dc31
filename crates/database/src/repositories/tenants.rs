use crate::error::{DatabaseError, Result};
use bistro_models::{NewTenant, Tenant, TenantStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const TENANT_COLUMNS: &str =
    "id, name, slug, namespace, status, expires_at, created_at, updated_at";

/// Landlord `tenant_registry` table
pub const LANDLORD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenant_registry (
    id          UUID PRIMARY KEY,
    name        VARCHAR(255) NOT NULL,
    slug        VARCHAR(63)  NOT NULL UNIQUE,
    namespace   VARCHAR(63)  NOT NULL UNIQUE,
    status      VARCHAR(32)  NOT NULL DEFAULT 'provisioning',
    expires_at  TIMESTAMPTZ,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_tenant_registry_status ON tenant_registry (status);
"#;

/// Tenant records in the landlord database
#[derive(Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the landlord table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(LANDLORD_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a tenant in `provisioning` state.
    ///
    /// The unique constraints on `slug` and `namespace` decide concurrent
    /// inserts; the loser gets `DuplicateEntry`.
    pub async fn insert(&self, tenant: &NewTenant) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!(
            r#"
            INSERT INTO tenant_registry (id, name, slug, namespace, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(&tenant.namespace)
        .bind(TenantStatus::Provisioning)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_insert(e, "Tenant", &format!("slug '{}'", tenant.slug)))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenant_registry WHERE id = $1",
            TENANT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        Ok(sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenant_registry WHERE slug = $1",
            TENANT_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Move a tenant to `to` only if its current status is one of `from`.
    ///
    /// Returns `None` when the row exists but was not in an allowed state.
    pub async fn transition_status(
        &self,
        id: Uuid,
        from: &[TenantStatus],
        to: TenantStatus,
    ) -> Result<Option<Tenant>> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let updated = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE tenant_registry
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = ANY($3)
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(to)
        .bind(id)
        .bind(&from)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_none() && self.find_by_id(id).await?.is_none() {
            return Err(DatabaseError::not_found("Tenant", &id.to_string()));
        }
        Ok(updated)
    }

    /// Claim a tenant for (re)provisioning.
    ///
    /// Succeeds from `provisioning_failed`, or from a `provisioning` record
    /// last touched before `stale_before` (its provisioner died or was
    /// abandoned). The claim refreshes `updated_at`, which starts a new lease.
    pub async fn claim_provisioning(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Tenant>> {
        let claimed = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE tenant_registry
            SET status = $1, updated_at = NOW()
            WHERE id = $2
              AND (status = $3 OR (status = $1 AND updated_at < $4))
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(TenantStatus::Provisioning)
        .bind(id)
        .bind(TenantStatus::ProvisioningFailed)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() && self.find_by_id(id).await?.is_none() {
            return Err(DatabaseError::not_found("Tenant", &id.to_string()));
        }
        Ok(claimed)
    }

    pub async fn set_status(&self, id: Uuid, status: TenantStatus) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE tenant_registry
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(status)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Tenant", &id.to_string()))
    }

    pub async fn rename(&self, id: Uuid, name: &str) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE tenant_registry
            SET name = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Tenant", &id.to_string()))
    }

    pub async fn set_expiry(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE tenant_registry
            SET expires_at = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(expires_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Tenant", &id.to_string()))
    }

    /// List tenants, newest first
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>> {
        let query = if include_inactive {
            format!(
                "SELECT {} FROM tenant_registry ORDER BY created_at DESC",
                TENANT_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM tenant_registry WHERE status = 'active' ORDER BY created_at DESC",
                TENANT_COLUMNS
            )
        };

        Ok(sqlx::query_as::<_, Tenant>(&query)
            .fetch_all(&self.pool)
            .await?)
    }
}
