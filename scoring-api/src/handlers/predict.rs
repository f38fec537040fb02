//! Prediction handler

use axum::{extract::{State, Path, Query}, Json};
use serde::Deserialize;

use crate::config::DEFAULT_THRESHOLD;
use crate::service::Prediction;
use crate::{AppState, AppResult};

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub seuil: Option<f64>,
}

/// Score one client against the business threshold
pub async fn predict(
    State(state): State<AppState>,
    Path(client_id): Path<i64>,
    Query(query): Query<PredictQuery>,
) -> AppResult<Json<Prediction>> {
    let threshold = query.seuil.unwrap_or(DEFAULT_THRESHOLD);
    let prediction = state.scoring.predict(client_id, threshold)?;

    tracing::debug!(
        "client {} scored {:.4} (threshold {})",
        client_id,
        prediction.probability_default,
        threshold
    );
    Ok(Json(prediction))
}
