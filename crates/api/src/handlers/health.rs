use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub landlord: String,
    pub live_pools: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let landlord = match state.landlord.ping().await {
        Ok(()) => "up".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Landlord database ping failed");
            "down".to_string()
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        landlord,
        live_pools: state.tenancy.registry().live_pools(),
    })
}
