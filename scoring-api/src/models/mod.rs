//! Model artifact, input schema and native tree ensemble

pub mod artifact;
pub mod booster;
pub mod schema;

use thiserror::Error;

pub use artifact::{load_model, Classifier, LoadedModel, ModelMetadata, ModelSource, PackagedModel};
pub use booster::Booster;
pub use schema::{DeclaredType, InputSchema};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact not found: {0}")]
    NotFound(String),

    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to fetch model artifact: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("invalid MLmodel descriptor: {0}")]
    Descriptor(String),

    #[error("invalid booster: {0}")]
    Parse(String),

    #[error("unsupported model: {0}")]
    Unsupported(String),

    #[error("missing feature column {0}")]
    MissingFeature(String),

    #[error("feature {0} is not numeric")]
    NonNumeric(String),
}
