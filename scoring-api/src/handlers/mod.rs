//! HTTP handlers

pub mod health;
pub mod clients;
pub mod predict;
pub mod shap;
pub mod analysis;
