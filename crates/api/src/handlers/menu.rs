//! Menu items: a tenant-scoped business module.
//!
//! Queries are unqualified; the bound connection's `search_path` decides
//! which tenant's tables they reach.

use crate::handlers::{tenant_error, validation_error, HandlerError};
use axum::{http::StatusCode, Extension, Json};
use bistro_database::DatabaseError;
use bistro_tenant::{PgTenantPool, RequestTenantContext, TenantError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

type TenantContext = RequestTenantContext<PgTenantPool>;

#[derive(Debug, Serialize, FromRow)]
pub struct MenuItem {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub price_cents: i64,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMenuItem {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(range(min = 0))]
    pub price_cents: i64,
}

fn db_error(err: sqlx::Error) -> HandlerError {
    tenant_error(TenantError::from(DatabaseError::from(err)))
}

/// GET /api/menu-items
pub async fn list_menu_items(
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<Vec<MenuItem>>, HandlerError> {
    let mut conn = ctx.connection().await.map_err(tenant_error)?;
    let items = sqlx::query_as::<_, MenuItem>(
        "SELECT id, category_id, name, price_cents, is_available, created_at FROM menu_items ORDER BY name",
    )
    .fetch_all(&mut **conn)
    .await
    .map_err(db_error)?;
    Ok(Json(items))
}

/// POST /api/menu-items
pub async fn create_menu_item(
    Extension(ctx): Extension<TenantContext>,
    Json(request): Json<CreateMenuItem>,
) -> Result<(StatusCode, Json<MenuItem>), HandlerError> {
    request.validate().map_err(validation_error)?;

    let mut conn = ctx.connection().await.map_err(tenant_error)?;
    let item = sqlx::query_as::<_, MenuItem>(
        r#"
        INSERT INTO menu_items (category_id, name, price_cents)
        VALUES ($1, $2, $3)
        RETURNING id, category_id, name, price_cents, is_available, created_at
        "#,
    )
    .bind(request.category_id)
    .bind(&request.name)
    .bind(request.price_cents)
    .fetch_one(&mut **conn)
    .await
    .map_err(db_error)?;

    tracing::debug!(tenant_id = %ctx.tenant().id, item_id = %item.id, "Created menu item");
    Ok((StatusCode::CREATED, Json(item)))
}
