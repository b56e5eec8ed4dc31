pub mod health;
pub mod menu;
pub mod tenant_registry;

use axum::{http::StatusCode, Json};
use bistro_tenant::{ErrorResponse, TenantError};
use validator::ValidationErrors;

pub type HandlerError = (StatusCode, Json<ErrorResponse>);

pub fn tenant_error(err: TenantError) -> HandlerError {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
    (status, Json(ErrorResponse::new(err.code(), &err.to_string())))
}

pub fn validation_error(err: ValidationErrors) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("validation_error", &err.to_string())),
    )
}
