//! axum integration
//!
//! [`bind_tenant`] binds every tenant route to a [`RequestTenantContext`]
//! before the handler runs and releases it once the handler returns.
//! Handlers take the context as `Extension<RequestTenantContext<_>>`.

use crate::context::{RequestScope, RequestTenantContext};
use crate::error::{Result, TenantError};
use crate::extractor::TenantExtractor;
use crate::policy::{RouteAccess, RoutePolicy};
use crate::pool::PoolFactory;
use crate::tenancy::Tenancy;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Middleware state
pub struct TenantGate<F: PoolFactory> {
    tenancy: Arc<Tenancy<F>>,
    policy: Arc<RoutePolicy>,
    extractor: TenantExtractor,
}

impl<F: PoolFactory> Clone for TenantGate<F> {
    fn clone(&self) -> Self {
        Self {
            tenancy: self.tenancy.clone(),
            policy: self.policy.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<F: PoolFactory> TenantGate<F> {
    pub fn new(tenancy: Arc<Tenancy<F>>, policy: RoutePolicy) -> Result<Self> {
        let extractor = TenantExtractor::new(&tenancy.config().identity_header)?;
        Ok(Self {
            tenancy,
            policy: Arc::new(policy),
            extractor,
        })
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }
}

pub async fn bind_tenant<F: PoolFactory>(
    State(gate): State<TenantGate<F>>,
    mut req: Request,
    next: Next,
) -> Response {
    if gate.policy.access(req.method(), req.uri().path()) == RouteAccess::Public {
        return next.run(req).await;
    }

    let identifier = gate.extractor.extract(req.extensions(), req.headers());
    let scope = RequestScope::new(CancellationToken::new())
        .with_timeout(gate.tenancy.config().request_timeout);

    let ctx = match gate
        .tenancy
        .bind_request(identifier.as_deref(), scope.clone())
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::debug!(
                path = %req.uri().path(),
                error = %e,
                "Rejected tenant request"
            );
            return e.into_response();
        }
    };
    req.extensions_mut().insert(ctx.clone());

    let response = tokio::select! {
        biased;
        reason = scope.interrupted() => TenantError::Cancelled(reason.to_string()).into_response(),
        response = next.run(req) => response,
    };

    if !ctx.is_released() {
        ctx.release().await;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenancyConfig;
    use crate::memory::{
        MemoryCluster, MemoryNamespaceAdmin, MemoryPool, MemoryPoolFactory, MemoryTenantStore,
    };
    use crate::extractor::VerifiedTenant;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Extension, Json, Router,
    };
    use std::time::Duration;
    use tower::ServiceExt;

    async fn menu(
        Extension(ctx): Extension<RequestTenantContext<MemoryPool>>,
    ) -> std::result::Result<Json<Vec<String>>, TenantError> {
        let rows = ctx.connection().await?.fetch_rows();
        Ok(Json(rows))
    }

    async fn slow(Extension(_ctx): Extension<RequestTenantContext<MemoryPool>>) -> &'static str {
        tokio::time::sleep(Duration::from_secs(5)).await;
        "done"
    }

    struct Fixture {
        app: Router,
        tenancy: Arc<Tenancy<MemoryPoolFactory>>,
        factory: Arc<MemoryPoolFactory>,
    }

    async fn fixture() -> Fixture {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.seed("tenant_acme", "Margherita");
        cluster.seed("tenant_beta", "Pad Thai");
        let factory = Arc::new(MemoryPoolFactory::new(cluster, 2));
        let tenancy = Arc::new(
            Tenancy::new(
                TenancyConfig {
                    request_timeout: Duration::from_millis(50),
                    ..Default::default()
                },
                Arc::new(MemoryTenantStore::new()),
                Arc::new(MemoryNamespaceAdmin::new()),
                factory.clone(),
            )
            .unwrap(),
        );
        tenancy.create_tenant("Acme Corp", "acme").await.unwrap();
        tenancy.create_tenant("Beta Bistro", "beta").await.unwrap();

        let policy = RoutePolicy::new().public("/health").tenant("/api/**");
        let gate = TenantGate::new(tenancy.clone(), policy).unwrap();
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/menu-items", get(menu))
            .route("/api/slow", get(slow))
            .layer(from_fn_with_state(gate, bind_tenant::<MemoryPoolFactory>));

        Fixture {
            app,
            tenancy,
            factory,
        }
    }

    fn request(path: &str, tenant: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(tenant) = tenant {
            builder = builder.header("x-verified-tenant", tenant);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_tenant_route_sees_own_rows() {
        let fx = fixture().await;

        let response = fx.app.clone().oneshot(request("/api/menu-items", Some("acme"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!(["Margherita"]));

        let response = fx.app.clone().oneshot(request("/api/menu-items", Some("beta"))).await.unwrap();
        assert_eq!(body_json(response).await, serde_json::json!(["Pad Thai"]));

        assert_eq!(fx.factory.checkouts(), 2);
        assert_eq!(fx.factory.releases(), 2);
    }

    #[tokio::test]
    async fn test_verified_extension_is_accepted() {
        let fx = fixture().await;
        let mut req = request("/api/menu-items", None);
        req.extensions_mut().insert(VerifiedTenant("beta".to_string()));

        let response = fx.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejections_map_to_status_codes() {
        let fx = fixture().await;

        let response = fx.app.clone().oneshot(request("/api/menu-items", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unauthorized");

        let response = fx.app.clone().oneshot(request("/api/menu-items", Some("nobody"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let beta = fx.tenancy.directory().get_by_slug("beta").await.unwrap().unwrap();
        fx.tenancy.deactivate_tenant(beta.id).await.unwrap();
        let response = fx.app.clone().oneshot(request("/api/menu-items", Some("beta"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"], "tenant_deactivated");

        assert_eq!(fx.factory.checkouts(), 0);
    }

    #[tokio::test]
    async fn test_public_route_skips_binding() {
        let fx = fixture().await;
        let response = fx.app.clone().oneshot(request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fx.factory.checkouts(), 0);
    }

    #[tokio::test]
    async fn test_request_deadline_releases_connection() {
        let fx = fixture().await;
        let response = fx.app.clone().oneshot(request("/api/slow", Some("acme"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "cancelled");
        assert_eq!(fx.factory.checkouts(), 1);
        assert_eq!(fx.factory.releases(), 1);
    }
}
