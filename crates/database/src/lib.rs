pub mod connection;
pub mod error;
pub mod repositories;
pub mod schema;
pub mod tenant_pool;

pub use connection::{Database, DatabaseConfig, TenantClusterConfig};
pub use error::{DatabaseError, Result};
pub use repositories::tenants::{TenantRepository, LANDLORD_SCHEMA};
pub use schema::{Migration, SchemaManager, BASELINE_MIGRATIONS};
pub use tenant_pool::{
    connect_namespace_pool, current_namespace, namespace_connect_options, NamespacePoolOptions,
};
