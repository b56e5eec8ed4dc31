use bistro_database::{DatabaseConfig, TenantClusterConfig};
use bistro_tenant::TenancyConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Landlord database holding the tenant registry
    pub database: DatabaseConfig,
    /// Cluster holding the tenant schemas
    pub cluster: TenantClusterConfig,
    pub tenancy: TenancyConfig,
    /// Bearer token for `/api/admin/*`; the admin API is disabled when unset
    pub admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server_host: std::env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database: DatabaseConfig::from_env(),
            cluster: TenantClusterConfig::from_env(),
            tenancy: TenancyConfig::from_env(),
            admin_token: std::env::var("ADMIN_API_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        }
    }
}
