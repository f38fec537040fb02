//! SHAP attribution handlers
//!
//! TreeSHAP is CPU bound, so both handlers run it on the blocking pool.

use axum::{extract::{State, Path}, Json};

use crate::service::{GlobalAttribution, LocalAttribution};
use crate::{AppState, AppResult};

/// Mean absolute attribution over the background sample
pub async fn global(State(state): State<AppState>) -> AppResult<Json<GlobalAttribution>> {
    let scoring = state.scoring.clone();
    let result = tokio::task::spawn_blocking(move || scoring.shap_global()).await??;
    Ok(Json(result))
}

/// Attribution for one client
pub async fn local(
    State(state): State<AppState>,
    Path(client_id): Path<i64>,
) -> AppResult<Json<LocalAttribution>> {
    let scoring = state.scoring.clone();
    let result = tokio::task::spawn_blocking(move || scoring.shap_local(client_id)).await??;
    Ok(Json(result))
}
