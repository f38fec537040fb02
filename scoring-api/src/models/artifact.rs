//! Model artifact loader
//!
//! Resolves the MLflow-style model directory (local path or remote registry),
//! reads the `MLmodel` descriptor and the LightGBM booster it points to, and
//! exposes the two views the service needs: a predict-only [`Classifier`]
//! and the native [`Booster`] for attribution.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::booster::Booster;
use super::schema::InputSchema;
use super::ModelError;
use crate::table::Frame;

const DESCRIPTOR_FILE: &str = "MLmodel";
const DEFAULT_BOOSTER_FILE: &str = "model.lgb";

// ============================================================================
// SOURCE
// ============================================================================

/// Where the model artifact lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Local(PathBuf),
    Remote(String),
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "file://{}", path.display()),
            ModelSource::Remote(uri) => write!(f, "{}", uri),
        }
    }
}

impl ModelSource {
    /// Read one file of the artifact directory
    async fn read(&self, file: &str) -> Result<String, ModelError> {
        match self {
            ModelSource::Local(dir) => {
                let path = dir.join(file);
                if !path.exists() {
                    return Err(ModelError::NotFound(path.display().to_string()));
                }
                Ok(tokio::fs::read_to_string(&path).await?)
            }
            ModelSource::Remote(base) => {
                let url = format!("{}/{}", base.trim_end_matches('/'), file);
                tracing::info!("Fetching {}", url);
                let response = reqwest::get(&url).await?.error_for_status()?;
                Ok(response.text().await?)
            }
        }
    }
}

// ============================================================================
// DESCRIPTOR
// ============================================================================

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    flavors: Flavors,
    signature: Option<Signature>,
}

#[derive(Debug, Default, Deserialize)]
struct Flavors {
    lightgbm: Option<LightgbmFlavor>,
}

#[derive(Debug, Deserialize)]
struct LightgbmFlavor {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    inputs: Option<String>,
}

impl Descriptor {
    fn parse(text: &str) -> Result<Self, ModelError> {
        serde_yaml::from_str(text).map_err(|e| ModelError::Descriptor(e.to_string()))
    }

    fn booster_file(&self) -> Result<String, ModelError> {
        let flavor = self
            .flavors
            .lightgbm
            .as_ref()
            .ok_or_else(|| ModelError::Descriptor("no lightgbm flavor".to_string()))?;
        Ok(flavor.data.clone().unwrap_or_else(|| DEFAULT_BOOSTER_FILE.to_string()))
    }

    fn input_schema(&self) -> Result<Option<InputSchema>, ModelError> {
        match self.signature.as_ref().and_then(|s| s.inputs.as_deref()) {
            Some(raw) => InputSchema::from_json(raw)
                .map(Some)
                .map_err(|e| ModelError::Descriptor(format!("signature inputs: {}", e))),
            None => Ok(None),
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Predict-only view of a binary classifier
pub trait Classifier: Send + Sync {
    /// Declared input columns, if the artifact carries a signature
    fn input_schema(&self) -> Option<&InputSchema>;

    /// Probability of the positive class for each row of `frame`
    fn predict(&self, frame: &Frame) -> Result<Vec<f64>, ModelError>;
}

/// Model as packaged in the artifact directory
#[derive(Debug, Clone)]
pub struct PackagedModel {
    schema: Option<InputSchema>,
    booster: Arc<Booster>,
}

impl PackagedModel {
    pub fn new(schema: Option<InputSchema>, booster: Arc<Booster>) -> Self {
        Self { schema, booster }
    }
}

impl Classifier for PackagedModel {
    fn input_schema(&self) -> Option<&InputSchema> {
        self.schema.as_ref()
    }

    fn predict(&self, frame: &Frame) -> Result<Vec<f64>, ModelError> {
        let matrix = feature_matrix(frame, &self.booster.feature_names)?;
        Ok(matrix
            .rows()
            .into_iter()
            .map(|row| self.booster.predict_proba(&row.to_vec()))
            .collect())
    }
}

/// Rows of `frame` laid out in `features` order
pub fn feature_matrix(frame: &Frame, features: &[String]) -> Result<Array2<f64>, ModelError> {
    let rows = frame.num_rows();
    let mut matrix = Array2::<f64>::zeros((rows, features.len()));

    for (j, name) in features.iter().enumerate() {
        let column = frame
            .column(name)
            .ok_or_else(|| ModelError::MissingFeature(name.clone()))?;
        for (i, value) in column.values.iter().enumerate() {
            matrix[[i, j]] = value
                .as_f64()
                .ok_or_else(|| ModelError::NonNumeric(name.clone()))?;
        }
    }
    Ok(matrix)
}

// ============================================================================
// LOADING
// ============================================================================

/// Artifact fingerprint, reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub source: String,
    pub sha256: String,
    pub num_trees: usize,
    pub num_features: usize,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

/// Both views of the same trained model
#[derive(Clone)]
pub struct LoadedModel {
    pub classifier: Arc<dyn Classifier>,
    pub booster: Arc<Booster>,
    pub metadata: ModelMetadata,
}

/// Load descriptor and booster from `source`
pub async fn load_model(source: &ModelSource) -> Result<LoadedModel, ModelError> {
    tracing::info!("Loading model from {}", source);

    let descriptor = Descriptor::parse(&source.read(DESCRIPTOR_FILE).await?)?;
    let booster_file = descriptor.booster_file()?;
    let schema = descriptor.input_schema()?;
    if schema.is_none() {
        tracing::info!("Model has no input schema: coercion disabled");
    }

    let text = source.read(&booster_file).await?;
    let sha256 = hex::encode(Sha256::digest(text.as_bytes()));
    let booster = Arc::new(Booster::from_lightgbm_text(&text)?);

    if let Some(schema) = &schema {
        if let Some(missing) = booster.feature_names.iter().find(|f| !schema.contains(f)) {
            return Err(ModelError::Descriptor(format!(
                "booster feature {} absent from signature",
                missing
            )));
        }
    }

    let metadata = ModelMetadata {
        source: source.to_string(),
        sha256,
        num_trees: booster.trees.len(),
        num_features: booster.num_features(),
        loaded_at: chrono::Utc::now(),
    };
    tracing::info!(
        "Model loaded: {} trees, {} features, sha256 {}",
        metadata.num_trees,
        metadata.num_features,
        metadata.sha256
    );

    Ok(LoadedModel {
        classifier: Arc::new(PackagedModel::new(schema, booster.clone())),
        booster,
        metadata,
    })
}
