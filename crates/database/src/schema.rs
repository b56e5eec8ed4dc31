//! Tenant namespace DDL
//!
//! Runs on the administrative pool of the tenant cluster, never on a tenant
//! pool and never on the landlord pool.

use crate::error::{DatabaseError, Result};
use bistro_models::is_valid_namespace;
use sqlx::PgPool;

/// One baseline migration step. `{schema}` is replaced by the quoted namespace.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Baseline schema every tenant namespace starts from
pub const BASELINE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "menu",
        sql: r#"
            CREATE TABLE IF NOT EXISTS {schema}.menu_categories (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name        VARCHAR(128) NOT NULL,
                position    INTEGER NOT NULL DEFAULT 0,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS {schema}.menu_items (
                id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                category_id  UUID REFERENCES {schema}.menu_categories(id) ON DELETE SET NULL,
                name         VARCHAR(255) NOT NULL,
                price_cents  BIGINT NOT NULL CHECK (price_cents >= 0),
                is_available BOOLEAN NOT NULL DEFAULT TRUE,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
        "#,
    },
    Migration {
        version: 2,
        name: "orders",
        sql: r#"
            CREATE TABLE IF NOT EXISTS {schema}.orders (
                id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                table_label  VARCHAR(32),
                status       VARCHAR(32) NOT NULL DEFAULT 'open',
                total_cents  BIGINT NOT NULL DEFAULT 0,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                closed_at    TIMESTAMPTZ
            );
            CREATE TABLE IF NOT EXISTS {schema}.order_lines (
                id            UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                order_id      UUID NOT NULL REFERENCES {schema}.orders(id) ON DELETE CASCADE,
                menu_item_id  UUID REFERENCES {schema}.menu_items(id) ON DELETE SET NULL,
                quantity      INTEGER NOT NULL CHECK (quantity > 0),
                price_cents   BIGINT NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "staff_and_inventory",
        sql: r#"
            CREATE TABLE IF NOT EXISTS {schema}.employees (
                id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                full_name    VARCHAR(255) NOT NULL,
                role         VARCHAR(64) NOT NULL,
                hourly_cents BIGINT,
                is_active    BOOLEAN NOT NULL DEFAULT TRUE,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS {schema}.inventory_items (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name        VARCHAR(255) NOT NULL,
                unit        VARCHAR(32) NOT NULL,
                quantity    NUMERIC(12, 3) NOT NULL DEFAULT 0,
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
        "#,
    },
];

/// Quote a validated namespace for interpolation into DDL.
fn quoted(namespace: &str) -> Result<String> {
    if !is_valid_namespace(namespace) {
        return Err(DatabaseError::InvalidInput(format!(
            "Invalid tenant namespace '{}'",
            namespace
        )));
    }
    Ok(format!("\"{}\"", namespace))
}

/// Renders a migration for one namespace.
pub fn render_migration(migration: &Migration, namespace: &str) -> Result<String> {
    Ok(migration.sql.replace("{schema}", &quoted(namespace)?))
}

/// Schema DDL against the tenant cluster's administrative pool
#[derive(Clone)]
pub struct SchemaManager {
    admin_pool: PgPool,
}

impl SchemaManager {
    pub fn new(admin_pool: PgPool) -> Self {
        Self { admin_pool }
    }

    pub fn admin_pool(&self) -> &PgPool {
        &self.admin_pool
    }

    /// `CREATE SCHEMA IF NOT EXISTS`; safe to repeat.
    pub async fn create_schema(&self, namespace: &str) -> Result<()> {
        let schema = quoted(namespace)?;
        sqlx::raw_sql(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&self.admin_pool)
            .await?;

        tracing::info!(namespace, "Ensured tenant schema exists");
        Ok(())
    }

    pub async fn schema_exists(&self, namespace: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)",
        )
        .bind(namespace)
        .fetch_one(&self.admin_pool)
        .await?;
        Ok(exists)
    }

    /// Apply every migration not yet recorded in `<namespace>.schema_migrations`.
    ///
    /// Each step runs in its own transaction together with its bookkeeping
    /// row. Returns the versions applied by this call.
    pub async fn apply_migrations(
        &self,
        namespace: &str,
        migrations: &[Migration],
    ) -> Result<Vec<i32>> {
        let schema = quoted(namespace)?;

        sqlx::raw_sql(&format!(
            r#"CREATE TABLE IF NOT EXISTS {schema}.schema_migrations (
                version     INTEGER PRIMARY KEY,
                name        VARCHAR(128) NOT NULL,
                applied_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#
        ))
        .execute(&self.admin_pool)
        .await?;

        let applied: Vec<i32> = sqlx::query_scalar(&format!(
            "SELECT version FROM {schema}.schema_migrations ORDER BY version"
        ))
        .fetch_all(&self.admin_pool)
        .await?;

        let mut newly_applied = Vec::new();
        for migration in migrations {
            if applied.contains(&migration.version) {
                continue;
            }

            let sql = render_migration(migration, namespace)?;
            let mut tx = self.admin_pool.begin().await?;
            sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&sql)).await.map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "{} v{} ({}) failed: {}",
                    namespace, migration.version, migration.name, e
                ))
            })?;
            sqlx::query(&format!(
                "INSERT INTO {schema}.schema_migrations (version, name) VALUES ($1, $2) ON CONFLICT (version) DO NOTHING"
            ))
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            tracing::debug!(
                namespace,
                version = migration.version,
                name = migration.name,
                "Applied tenant migration"
            );
            newly_applied.push(migration.version);
        }

        Ok(newly_applied)
    }
}
