//! Namespace-pinned connection pools
//!
//! Every physical connection opened here carries `search_path=<namespace>` as
//! a startup option, so the namespace is fixed for the connection's whole
//! life. A tenant pool never issues `SET search_path` and is never shared
//! with another tenant.

use crate::error::{DatabaseError, Result};
use bistro_models::is_valid_namespace;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

/// Sizing for one tenant's pool
#[derive(Debug, Clone)]
pub struct NamespacePoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for NamespacePoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Connect options whose every connection is scoped to `namespace`.
pub fn namespace_connect_options(
    base: &PgConnectOptions,
    namespace: &str,
) -> Result<PgConnectOptions> {
    if !is_valid_namespace(namespace) {
        return Err(DatabaseError::InvalidInput(format!(
            "Refusing to pin invalid namespace '{}'",
            namespace
        )));
    }

    Ok(base
        .clone()
        .options([("search_path", namespace)])
        .application_name(&format!("bistro:{}", namespace)))
}

/// Open a bounded pool for one tenant namespace.
pub async fn connect_namespace_pool(
    base: &PgConnectOptions,
    namespace: &str,
    options: &NamespacePoolOptions,
) -> Result<PgPool> {
    let connect_options = namespace_connect_options(base, namespace)?;

    let pool = PgPoolOptions::new()
        .max_connections(options.max_connections)
        .min_connections(options.min_connections.min(options.max_connections))
        .acquire_timeout(options.acquire_timeout)
        .idle_timeout(options.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            DatabaseError::ConnectionFailed(format!(
                "Failed to connect pool for namespace {}: {}",
                namespace, e
            ))
        })?;

    tracing::info!(
        namespace,
        max_connections = options.max_connections,
        "Created namespace connection pool"
    );

    Ok(pool)
}

/// Schema the connection actually resolves unqualified names against.
pub async fn current_namespace(conn: &mut sqlx::PgConnection) -> Result<String> {
    let (schema,): (String,) = sqlx::query_as("SELECT current_schema()")
        .fetch_one(conn)
        .await?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TenantClusterConfig;

    #[test]
    fn test_namespace_is_pinned_as_startup_option() {
        let base = TenantClusterConfig::default().connect_options().unwrap();
        let options = namespace_connect_options(&base, "tenant_acme").unwrap();
        assert_eq!(
            options.get_options(),
            Some("-c search_path=tenant_acme")
        );
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let base = TenantClusterConfig::default().connect_options().unwrap();
        assert!(matches!(
            namespace_connect_options(&base, "public"),
            Err(DatabaseError::InvalidInput(_))
        ));
        assert!(namespace_connect_options(&base, "tenant_a; DROP TABLE x").is_err());
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_pool_connections_use_namespace() {
        let base = TenantClusterConfig::from_env().connect_options().unwrap();
        let admin = TenantClusterConfig::from_env().connect_admin_pool().await.unwrap();
        sqlx::raw_sql("CREATE SCHEMA IF NOT EXISTS \"tenant_pool_pinning\"")
            .execute(&admin)
            .await
            .unwrap();

        let pool = connect_namespace_pool(&base, "tenant_pool_pinning", &NamespacePoolOptions::default())
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(current_namespace(&mut conn).await.unwrap(), "tenant_pool_pinning");
    }
}
