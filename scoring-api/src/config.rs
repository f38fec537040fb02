//! Configuration module

use std::env;
use std::path::PathBuf;

use crate::models::ModelSource;

/// Business operating point for the default decision
pub const DEFAULT_THRESHOLD: f64 = 0.5454545454545455;

/// Number of leading client rows used as the global SHAP background
pub const BACKGROUND_SIZE: usize = 100;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (dev, prod)
    pub environment: String,

    /// Local model directory (dev)
    pub model_path: PathBuf,

    /// Remote model registry base URI (prod)
    pub model_registry_uri: Option<String>,

    /// Client table CSV
    pub clients_csv: PathBuf,

    /// Unique client identifier column
    pub id_column: String,

    /// Listen host
    pub host: String,

    /// Server port
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            model_path: PathBuf::from("model"),
            model_registry_uri: None,
            clients_csv: PathBuf::from("data/clients_test.csv"),
            id_column: "SK_ID_CURR".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            environment: env::var("ENV")
                .unwrap_or(defaults.environment),

            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),

            model_registry_uri: env::var("MODEL_REGISTRY_URI")
                .ok()
                .filter(|uri| !uri.trim().is_empty()),

            clients_csv: env::var("CLIENTS_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.clients_csv),

            id_column: env::var("CLIENT_ID_COLUMN")
                .unwrap_or(defaults.id_column),

            host: env::var("HOST")
                .unwrap_or(defaults.host),

            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "prod"
    }

    /// Resolve where the model artifact is read from
    pub fn model_source(&self) -> anyhow::Result<ModelSource> {
        if self.is_production() {
            let uri = self.model_registry_uri.clone().ok_or_else(|| {
                anyhow::anyhow!("ENV=prod requires MODEL_REGISTRY_URI to be set")
            })?;
            tracing::info!("ENV=prod: remote model registry {}", uri);
            Ok(ModelSource::Remote(uri))
        } else {
            tracing::info!("ENV={}: local model at {}", self.environment, self.model_path.display());
            Ok(ModelSource::Local(self.model_path.clone()))
        }
    }
}
