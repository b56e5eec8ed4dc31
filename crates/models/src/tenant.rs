use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::namespace::SLUG_REGEX;

/// Tenant (restaurant / organization) registered in the landlord database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    /// Schema name, derived from the slug once and never changed
    pub namespace: String,
    pub status: TenantStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Whether requests may be served for this tenant at `now`.
    pub fn check_servable(&self, now: DateTime<Utc>) -> Result<(), BarReason> {
        if self.status != TenantStatus::Active {
            return Err(BarReason::Status(self.status));
        }
        match self.expires_at {
            Some(expires_at) if expires_at <= now => Err(BarReason::Expired(expires_at)),
            _ => Ok(()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Lifecycle status stored in `tenant_registry.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Provisioning,
    Active,
    ProvisioningFailed,
    Deactivated,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::ProvisioningFailed => "provisioning_failed",
            TenantStatus::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(TenantStatus::Provisioning),
            "active" => Ok(TenantStatus::Active),
            "provisioning_failed" => Ok(TenantStatus::ProvisioningFailed),
            "deactivated" | "suspended" => Ok(TenantStatus::Deactivated),
            other => Err(format!("Invalid tenant status: {}", other)),
        }
    }
}

/// Why an existing tenant may not be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarReason {
    Status(TenantStatus),
    Expired(DateTime<Utc>),
}

impl fmt::Display for BarReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarReason::Status(status) => write!(f, "status is {}", status),
            BarReason::Expired(at) => write!(f, "expired at {}", at.to_rfc3339()),
        }
    }
}

/// Row inserted by the provisioner
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub namespace: String,
}

/// Create tenant request (administrative API / CLI)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTenant {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(min = 3, max = 56), regex(path = *SLUG_REGEX))]
    pub slug: String,
}

/// Partial update of mutable tenant attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateTenant {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    /// `Some(None)` clears the expiry
    #[serde(default, with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(
        value: &Option<Option<T>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<T>>, D::Error> {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tenant(status: TenantStatus, expires_at: Option<DateTime<Utc>>) -> Tenant {
        let now = Utc::now();
        Tenant {
            id: Uuid::new_v4(),
            name: "Acme Corp".to_string(),
            slug: "acme".to_string(),
            namespace: "tenant_acme".to_string(),
            status,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_active_tenant_is_servable() {
        let now = Utc::now();
        assert!(tenant(TenantStatus::Active, None).check_servable(now).is_ok());
        assert!(tenant(TenantStatus::Active, Some(now + Duration::hours(1)))
            .check_servable(now)
            .is_ok());
    }

    #[test]
    fn test_barred_tenants() {
        let now = Utc::now();
        assert_eq!(
            tenant(TenantStatus::Deactivated, None).check_servable(now),
            Err(BarReason::Status(TenantStatus::Deactivated))
        );
        assert_eq!(
            tenant(TenantStatus::ProvisioningFailed, None).check_servable(now),
            Err(BarReason::Status(TenantStatus::ProvisioningFailed))
        );

        let expired_at = now - Duration::seconds(1);
        assert_eq!(
            tenant(TenantStatus::Active, Some(expired_at)).check_servable(now),
            Err(BarReason::Expired(expired_at))
        );
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("active".parse::<TenantStatus>(), Ok(TenantStatus::Active));
        assert_eq!(
            "provisioning_failed".parse::<TenantStatus>(),
            Ok(TenantStatus::ProvisioningFailed)
        );
        assert_eq!("suspended".parse::<TenantStatus>(), Ok(TenantStatus::Deactivated));
        assert!("archived".parse::<TenantStatus>().is_err());
    }

    #[test]
    fn test_update_tenant_expiry_distinguishes_clear_from_absent() {
        let absent: UpdateTenant = serde_json::from_str(r#"{"name":"Acme"}"#).unwrap();
        assert_eq!(absent.expires_at, None);

        let cleared: UpdateTenant = serde_json::from_str(r#"{"expires_at":null}"#).unwrap();
        assert_eq!(cleared.expires_at, Some(None));
    }

    #[test]
    fn test_create_tenant_validation() {
        let ok = CreateTenant {
            name: "Joe's Café".to_string(),
            slug: "joes-cafe".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = CreateTenant {
            name: "Joe's Café".to_string(),
            slug: "Joe's Café".to_string(),
        };
        assert!(bad.validate().is_err());
    }
}
