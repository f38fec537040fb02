//! Explain Module - SHAP attribution for tree ensembles

pub mod engine;
pub mod types;

pub use engine::TreeExplainer;
pub use types::{ExpectedValue, ShapOutput};
