//! Population comparison handlers

use axum::{extract::{State, Path, Query}, Json};
use serde::Deserialize;

use crate::service::{BivariatePairing, FeatureDistribution};
use crate::{AppState, AppResult};

#[derive(Debug, Deserialize)]
pub struct DistributionQuery {
    pub client_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct BivariateQuery {
    pub x: String,
    pub y: String,
}

/// Population values of a feature alongside one client's value
pub async fn feature_distribution(
    State(state): State<AppState>,
    Path(feature_name): Path<String>,
    Query(query): Query<DistributionQuery>,
) -> AppResult<Json<FeatureDistribution>> {
    let result = state.scoring.feature_distribution(query.client_id, &feature_name)?;
    Ok(Json(result))
}

/// Two columns for a scatter plot
pub async fn bivariate(
    State(state): State<AppState>,
    Query(query): Query<BivariateQuery>,
) -> AppResult<Json<BivariatePairing>> {
    let result = state.scoring.bivariate(&query.x, &query.y)?;
    Ok(Json(result))
}
