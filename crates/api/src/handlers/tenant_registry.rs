//! Tenant Registry Management Handlers
//!
//! Administrative endpoints over the landlord registry:
//! - Create/list/update tenants
//! - Deactivate, reactivate, retry failed provisioning
//! - View live pool statistics

use crate::handlers::{tenant_error, validation_error, HandlerError};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bistro_models::{CreateTenant, Tenant, UpdateTenant};
use bistro_tenant::provisioner::MigrationReport;
use bistro_tenant::{DirectoryStats, RegistryStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Tenant> for TenantResponse {
    fn from(t: Tenant) -> Self {
        Self {
            id: t.id,
            slug: t.slug,
            name: t.name,
            namespace: t.namespace,
            status: t.status.to_string(),
            expires_at: t.expires_at.map(|at| at.to_rfc3339()),
            created_at: t.created_at.to_rfc3339(),
            updated_at: t.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTenantsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Serialize)]
pub struct PoolsResponse {
    pub registry: RegistryStats,
    pub directory: DirectoryStats,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new tenant
/// POST /api/admin/tenants
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTenant>,
) -> Result<(StatusCode, Json<TenantResponse>), HandlerError> {
    request.validate().map_err(validation_error)?;

    let tenant = state
        .tenancy
        .create_tenant(&request.name, &request.slug)
        .await
        .map_err(tenant_error)?;

    tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Created tenant via admin API");
    Ok((StatusCode::CREATED, Json(tenant.into())))
}

/// List tenants
/// GET /api/admin/tenants
pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTenantsQuery>,
) -> Result<Json<Vec<TenantResponse>>, HandlerError> {
    let tenants = state
        .tenancy
        .list_tenants(query.include_inactive)
        .await
        .map_err(tenant_error)?;
    Ok(Json(tenants.into_iter().map(Into::into).collect()))
}

/// Get a specific tenant
/// GET /api/admin/tenants/:tenant_id
pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, HandlerError> {
    let tenant = state.tenancy.get_tenant(tenant_id).await.map_err(tenant_error)?;
    Ok(Json(tenant.into()))
}

/// Rename a tenant and/or change its expiry
/// PATCH /api/admin/tenants/:tenant_id
pub async fn update_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<UpdateTenant>,
) -> Result<Json<TenantResponse>, HandlerError> {
    request.validate().map_err(validation_error)?;

    let tenant = state
        .tenancy
        .update_tenant(tenant_id, &request)
        .await
        .map_err(tenant_error)?;
    Ok(Json(tenant.into()))
}

/// Deactivate a tenant; its pool drains after the grace period
/// POST /api/admin/tenants/:tenant_id/deactivate
pub async fn deactivate_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, HandlerError> {
    let tenant = state
        .tenancy
        .deactivate_tenant(tenant_id)
        .await
        .map_err(tenant_error)?;
    Ok(Json(tenant.into()))
}

/// Reactivate a deactivated tenant
/// POST /api/admin/tenants/:tenant_id/reactivate
pub async fn reactivate_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, HandlerError> {
    let tenant = state
        .tenancy
        .reactivate_tenant(tenant_id)
        .await
        .map_err(tenant_error)?;
    Ok(Json(tenant.into()))
}

/// Resume provisioning of a failed tenant
/// POST /api/admin/tenants/:tenant_id/retry
pub async fn retry_provisioning(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantResponse>, HandlerError> {
    let tenant = state
        .tenancy
        .retry_provisioning(tenant_id)
        .await
        .map_err(tenant_error)?;
    Ok(Json(tenant.into()))
}

/// Re-apply baseline migrations to every active tenant
/// POST /api/admin/migrations
pub async fn migrate_tenants(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MigrationReport>, HandlerError> {
    let report = state.tenancy.migrate_all().await.map_err(tenant_error)?;
    Ok(Json(report))
}

/// Pool registry and directory cache statistics
/// GET /api/admin/pools
pub async fn pool_stats(State(state): State<Arc<AppState>>) -> Json<PoolsResponse> {
    Json(PoolsResponse {
        registry: state.tenancy.pool_stats(),
        directory: state.tenancy.directory().stats(),
    })
}
