pub mod namespace;
pub mod tenant;

pub use namespace::{is_valid_namespace, namespace_for_slug, normalize_slug, SlugError};
pub use tenant::{BarReason, CreateTenant, NewTenant, Tenant, TenantStatus, UpdateTenant};
