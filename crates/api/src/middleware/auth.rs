use crate::handlers::HandlerError;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use bistro_tenant::ErrorResponse;
use std::sync::Arc;

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, HandlerError> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "missing_auth_header",
                    "Authorization header is required",
                )),
            )
        })?
        .to_str()
        .map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "invalid_auth_header",
                    "Invalid Authorization header format",
                )),
            )
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "invalid_auth_scheme",
                "Authorization header must use Bearer scheme",
            )),
        )
    })
}

/// Compare the presented token against the configured admin token
pub fn check_admin_token(expected: Option<&str>, headers: &HeaderMap) -> Result<(), HandlerError> {
    let Some(expected) = expected else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "admin_api_disabled",
                "ADMIN_API_TOKEN is not configured",
            )),
        ));
    };

    let presented = extract_bearer_token(headers)?;
    if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("invalid_token", "Invalid admin token")),
        ));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware guarding the administrative API
pub async fn require_admin_token(
    State(state): State<Arc<crate::AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, HandlerError> {
    if let Err(rejection) = check_admin_token(state.config.admin_token.as_deref(), &headers) {
        tracing::warn!(
            path = %request.uri().path(),
            code = %rejection.1.error,
            "Rejected admin request"
        );
        return Err(rejection);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_extraction() {
        assert_eq!(extract_bearer_token(&headers("Bearer s3cret")).unwrap(), "s3cret");
        assert_eq!(
            extract_bearer_token(&headers("Basic abc")).unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            extract_bearer_token(&HeaderMap::new()).unwrap_err().1.error,
            "missing_auth_header"
        );
    }

    #[test]
    fn test_admin_token_check() {
        assert!(check_admin_token(Some("s3cret"), &headers("Bearer s3cret")).is_ok());
        assert_eq!(
            check_admin_token(Some("s3cret"), &headers("Bearer wrong")).unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            check_admin_token(None, &headers("Bearer s3cret")).unwrap_err().0,
            StatusCode::FORBIDDEN
        );
    }
}
