use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bistro_database::DatabaseError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TenantError>;

#[derive(Debug, Clone, Error)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Tenant {slug} is deactivated: {reason}")]
    Deactivated { slug: String, reason: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Provisioning failed for tenant {slug}: {message}")]
    ProvisioningFailure { slug: String, message: String },

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid slug: {0}")]
    InvalidSlug(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl TenantError {
    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            TenantError::NotFound(_) => "tenant_not_found",
            TenantError::Deactivated { .. } => "tenant_deactivated",
            TenantError::Unauthorized(_) => "unauthorized",
            TenantError::Conflict(_) => "conflict",
            TenantError::ProvisioningFailure { .. } => "provisioning_failed",
            TenantError::PoolExhausted(_) => "pool_exhausted",
            TenantError::Cancelled(_) => "cancelled",
            TenantError::InvalidSlug(_) => "invalid_slug",
            TenantError::InvalidConfig(_) => "invalid_config",
            TenantError::Backend(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            TenantError::NotFound(_) => StatusCode::NOT_FOUND,
            TenantError::Deactivated { .. } => StatusCode::FORBIDDEN,
            TenantError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TenantError::Conflict(_) => StatusCode::CONFLICT,
            TenantError::InvalidSlug(_) => StatusCode::BAD_REQUEST,
            TenantError::PoolExhausted(_) | TenantError::Cancelled(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TenantError::ProvisioningFailure { .. }
            | TenantError::InvalidConfig(_)
            | TenantError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for TenantError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => TenantError::NotFound(msg),
            DatabaseError::DuplicateEntry(msg) => TenantError::Conflict(msg),
            DatabaseError::InvalidInput(msg) => TenantError::InvalidSlug(msg),
            err if err.is_pool_timeout() => TenantError::PoolExhausted(err.to_string()),
            other => TenantError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Tenant request failed");
        }
        (status, Json(ErrorResponse::new(self.code(), &self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TenantError::Unauthorized("missing".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            TenantError::Deactivated {
                slug: "acme".into(),
                reason: "status is deactivated".into()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(TenantError::NotFound("acme".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            TenantError::PoolExhausted("acme".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            TenantError::Cancelled("deadline".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_database_error_conversion() {
        assert!(matches!(
            TenantError::from(DatabaseError::duplicate("Tenant", "slug 'acme'")),
            TenantError::Conflict(_)
        ));
        assert!(matches!(
            TenantError::from(DatabaseError::not_found("Tenant", "x")),
            TenantError::NotFound(_)
        ));
        assert!(matches!(
            TenantError::from(DatabaseError::ConnectionError(sqlx::Error::PoolTimedOut)),
            TenantError::PoolExhausted(_)
        ));
        assert!(matches!(
            TenantError::from(DatabaseError::Other("boom".into())),
            TenantError::Backend(_)
        ));
    }
}
