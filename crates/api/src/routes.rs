use crate::handlers;
use crate::middleware;
use crate::AppState;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use bistro_tenant::{bind_tenant, PgPoolFactory, RoutePolicy, TenantGate};
use std::sync::Arc;

/// Routes served without a tenant. Everything else is tenant-bound.
pub fn route_policy() -> RoutePolicy {
    RoutePolicy::new()
        .public("/health")
        // Guarded by the admin token instead
        .public("/api/admin/**")
        .tenant("/api/menu-items")
}

pub fn create_router(state: Arc<AppState>, gate: TenantGate<PgPoolFactory>) -> Router {
    let admin = Router::new()
        .route(
            "/api/admin/tenants",
            post(handlers::tenant_registry::create_tenant)
                .get(handlers::tenant_registry::list_tenants),
        )
        .route(
            "/api/admin/tenants/:tenant_id",
            get(handlers::tenant_registry::get_tenant)
                .patch(handlers::tenant_registry::update_tenant),
        )
        .route(
            "/api/admin/tenants/:tenant_id/deactivate",
            post(handlers::tenant_registry::deactivate_tenant),
        )
        .route(
            "/api/admin/tenants/:tenant_id/reactivate",
            post(handlers::tenant_registry::reactivate_tenant),
        )
        .route(
            "/api/admin/tenants/:tenant_id/retry",
            post(handlers::tenant_registry::retry_provisioning),
        )
        .route(
            "/api/admin/migrations",
            post(handlers::tenant_registry::migrate_tenants),
        )
        .route("/api/admin/pools", get(handlers::tenant_registry::pool_stats))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_admin_token,
        ));

    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .merge(admin)
        // Tenant-scoped business routes
        .route(
            "/api/menu-items",
            get(handlers::menu::list_menu_items).post(handlers::menu::create_menu_item),
        )
        .layer(from_fn_with_state(gate, bind_tenant::<PgPoolFactory>))
        .with_state(state)
}
