//! Root and health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::models::ModelMetadata;
use crate::AppState;

#[derive(Serialize)]
pub struct RootResponse {
    message: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
    clients: usize,
    model: ModelMetadata,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "API prédiction risque de défaut prête",
    })
}

pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
        clients: state.scoring.table().len(),
        model: state.model.clone(),
    })
}
