use crate::error::{Result, TenantError};
use std::time::Duration;

/// Tenancy limits and timings
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// Maximum number of live tenant pools held by the registry
    pub max_live_pools: usize,
    /// Maximum physical connections per tenant pool
    pub max_connections_per_pool: u32,
    /// Connections opened eagerly when a pool is created
    pub min_connections_per_pool: u32,
    /// How long a request waits for a free connection
    pub checkout_timeout: Duration,
    /// Period of the idle pool sweeper; pools unused this long are evicted
    pub idle_eviction_interval: Duration,
    /// Delay before a deactivated tenant's pool starts draining
    pub drain_grace_period: Duration,
    /// Longest a checkout may stay out before a drain gives up waiting on it
    pub max_checkout_lifetime: Duration,
    /// How long a `provisioning` record belongs to its provisioner; older
    /// ones are treated as abandoned and may be claimed again
    pub provisioning_lease: Duration,
    /// Time-to-live of directory cache entries
    pub directory_cache_ttl: Duration,
    /// Maximum number of cached tenant records (per key kind)
    pub directory_cache_capacity: u64,
    /// Deadline applied to each tenant-bound HTTP request
    pub request_timeout: Duration,
    /// Trusted header carrying the verified tenant identifier
    pub identity_header: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            max_live_pools: 50,
            max_connections_per_pool: 5,
            min_connections_per_pool: 1,
            checkout_timeout: Duration::from_secs(5),
            idle_eviction_interval: Duration::from_secs(300),
            drain_grace_period: Duration::from_secs(30),
            max_checkout_lifetime: Duration::from_secs(120),
            provisioning_lease: Duration::from_secs(600),
            directory_cache_ttl: Duration::from_secs(300),
            directory_cache_capacity: 10_000,
            request_timeout: Duration::from_secs(30),
            identity_header: "x-verified-tenant".to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl TenancyConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_live_pools: env_or("TENANCY_MAX_LIVE_POOLS", defaults.max_live_pools),
            max_connections_per_pool: env_or(
                "TENANCY_MAX_CONNECTIONS_PER_POOL",
                defaults.max_connections_per_pool,
            ),
            min_connections_per_pool: env_or(
                "TENANCY_MIN_CONNECTIONS_PER_POOL",
                defaults.min_connections_per_pool,
            ),
            checkout_timeout: Duration::from_millis(env_or(
                "TENANCY_CHECKOUT_TIMEOUT_MS",
                defaults.checkout_timeout.as_millis() as u64,
            )),
            idle_eviction_interval: Duration::from_secs(env_or(
                "TENANCY_IDLE_EVICTION_INTERVAL_SECS",
                defaults.idle_eviction_interval.as_secs(),
            )),
            drain_grace_period: Duration::from_secs(env_or(
                "TENANCY_DRAIN_GRACE_PERIOD_SECS",
                defaults.drain_grace_period.as_secs(),
            )),
            max_checkout_lifetime: Duration::from_secs(env_or(
                "TENANCY_MAX_CHECKOUT_LIFETIME_SECS",
                defaults.max_checkout_lifetime.as_secs(),
            )),
            provisioning_lease: Duration::from_secs(env_or(
                "TENANCY_PROVISIONING_LEASE_SECS",
                defaults.provisioning_lease.as_secs(),
            )),
            directory_cache_ttl: Duration::from_secs(env_or(
                "TENANCY_DIRECTORY_CACHE_TTL_SECS",
                defaults.directory_cache_ttl.as_secs(),
            )),
            directory_cache_capacity: env_or(
                "TENANCY_DIRECTORY_CACHE_CAPACITY",
                defaults.directory_cache_capacity,
            ),
            request_timeout: Duration::from_secs(env_or(
                "TENANCY_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            identity_header: std::env::var("TENANCY_IDENTITY_HEADER")
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or(defaults.identity_header),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_live_pools == 0 {
            return Err(TenantError::InvalidConfig(
                "max_live_pools must be greater than zero".to_string(),
            ));
        }
        if self.max_connections_per_pool == 0 {
            return Err(TenantError::InvalidConfig(
                "max_connections_per_pool must be greater than zero".to_string(),
            ));
        }
        if self.checkout_timeout.is_zero() {
            return Err(TenantError::InvalidConfig(
                "checkout_timeout must be greater than zero".to_string(),
            ));
        }
        if self.idle_eviction_interval.is_zero() {
            return Err(TenantError::InvalidConfig(
                "idle_eviction_interval must be greater than zero".to_string(),
            ));
        }
        if self.provisioning_lease.is_zero()
            || chrono::Duration::from_std(self.provisioning_lease).is_err()
        {
            return Err(TenantError::InvalidConfig(
                "provisioning_lease must be a positive duration".to_string(),
            ));
        }
        if self.identity_header.trim().is_empty() {
            return Err(TenantError::InvalidConfig(
                "identity_header must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound on physical tenant connections held at once
    pub fn connection_ceiling(&self) -> u64 {
        self.max_live_pools as u64 * self.max_connections_per_pool as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TenancyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection_ceiling(), 250);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = TenancyConfig {
            max_live_pools: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TenantError::InvalidConfig(_))));

        let config = TenancyConfig {
            checkout_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TenancyConfig {
            provisioning_lease: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_env() {
        // from_env returns defaults when env vars are not set
        let config = TenancyConfig::from_env();
        assert_eq!(config.max_live_pools, 50);
        assert_eq!(config.max_connections_per_pool, 5);
        assert_eq!(config.identity_header, "x-verified-tenant");
        assert_eq!(config.provisioning_lease, Duration::from_secs(600));
    }
}
