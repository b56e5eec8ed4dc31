//! Tenant resolution and connection isolation.
//!
//! Every request is resolved to a tenant, bound to one connection from
//! that tenant's own pool (whose namespace was fixed when the connection
//! was opened) and released exactly once.

pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod extractor;
pub mod isolation;
pub mod layer;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod policy;
pub mod pool;
pub mod provisioner;
pub mod registry;
pub mod store;
pub mod tenancy;

pub use config::TenancyConfig;
pub use context::{RequestScope, RequestTenantContext};
pub use directory::{DirectoryStats, TenantDirectory, TenantRef};
pub use error::{ErrorResponse, Result, TenantError};
pub use extractor::{TenantExtractor, VerifiedTenant};
pub use isolation::ConnectionIsolationManager;
pub use layer::{bind_tenant, TenantGate};
pub use policy::{RouteAccess, RoutePolicy, RouteRule};
pub use pool::{PgPoolFactory, PgTenantPool, PoolFactory, TenantPool};
pub use provisioner::{MigrationReport, NamespaceAdmin, SchemaProvisioner};
pub use registry::{PoolHandle, RegistryStats, SweepOutcome, TenantPoolRegistry};
pub use store::TenantStore;
pub use tenancy::Tenancy;
