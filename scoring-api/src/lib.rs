//! Credit Scoring API
//!
//! Serves a pre-trained credit default classifier to the analyst dashboard.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CREDIT SCORING API                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────────┐  ┌─────────────────────┐ │
//! │  │  Router   │  │  Scoring      │  │  Tree Explainer     │ │
//! │  │  (Axum)   │─▶│  Service      │─▶│  (TreeSHAP)         │ │
//! │  └───────────┘  └───────┬───────┘  └──────────┬──────────┘ │
//! │                         ▼                     ▼            │
//! │                ┌───────────────┐  ┌─────────────────────┐  │
//! │                │ Client Table  │  │ Model artifact      │  │
//! │                │ (CSV, in RAM) │  │ (MLmodel + LightGBM)│  │
//! │                └───────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All state is loaded once by [`bootstrap`] and never mutated afterwards.

pub mod config;
pub mod error;
pub mod explain;
pub mod handlers;
pub mod models;
pub mod service;
pub mod table;

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};

pub use error::{AppError, AppResult};

use crate::config::Config;
use crate::models::ModelMetadata;
use crate::service::ScoringService;
use crate::table::ClientTable;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scoring: Arc<ScoringService>,
    pub model: ModelMetadata,
}

/// Load the model and the client table; any failure aborts startup
pub async fn bootstrap(config: &Config) -> anyhow::Result<AppState> {
    let source = config.model_source()?;
    let model = models::load_model(&source)
        .await
        .with_context(|| format!("failed to load model from {}", source))?;

    let table = ClientTable::load(&config.clients_csv, &config.id_column)
        .with_context(|| format!("failed to load clients from {}", config.clients_csv.display()))?;

    let metadata = model.metadata.clone();
    let scoring = ScoringService::new(table, model)?;

    Ok(AppState {
        scoring: Arc::new(scoring),
        model: metadata,
    })
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::check))
        .route("/clients", get(handlers::clients::list))
        .route("/predict/:client_id", get(handlers::predict::predict))
        .route("/shap/global", get(handlers::shap::global))
        .route("/shap/local/:client_id", get(handlers::shap::local))
        .route(
            "/client_feature_distribution/:feature_name",
            get(handlers::analysis::feature_distribution),
        )
        .route("/bivariate_analysis", get(handlers::analysis::bivariate))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
