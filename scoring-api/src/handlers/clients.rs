//! Client listing handler

use axum::{extract::State, Json};

use crate::AppState;

/// List all known client ids, in table order
pub async fn list(State(state): State<AppState>) -> Json<Vec<i64>> {
    Json(state.scoring.client_ids())
}
