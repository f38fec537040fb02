//! Scoring service - read-only queries over the client table and the model
//!
//! Every operation is a pure function of the state built at startup. Nothing
//! is cached: attributions and distributions are recomputed per call.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::BACKGROUND_SIZE;
use crate::explain::TreeExplainer;
use crate::models::artifact::feature_matrix;
use crate::models::{Classifier, LoadedModel};
use crate::table::{ClientTable, Frame, Value};

const GENDER_FEMALE: &str = "CODE_GENDER_F";
const GENDER_MALE: &str = "CODE_GENDER_M";
const CHILDREN: &str = "CNT_CHILDREN";
const INCOME: &str = "AMT_INCOME_TOTAL";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Internal(String),
}

fn client_not_found(client_id: i64) -> ScoringError {
    ScoringError::NotFound(format!("Client {} non trouvé.", client_id))
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Gender {
    F,
    M,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Gender {
    /// Fold the two one-hot indicators into one label
    pub fn from_indicators(female: Option<&Value>, male: Option<&Value>) -> Self {
        if female.map(Value::is_set).unwrap_or(false) {
            Gender::F
        } else if male.map(Value::is_set).unwrap_or(false) {
            Gender::M
        } else {
            Gender::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    #[serde(rename = "SK_ID_CURR")]
    pub client_id: i64,
    #[serde(rename = "CODE_GENDER (Sexe)")]
    pub gender: Gender,
    #[serde(rename = "CNT_CHILDREN (Nombre d'enfants)")]
    pub children: i64,
    #[serde(rename = "AMT_INCOME_TOTAL (revenu total)")]
    pub income: f64,
    pub probability_default: f64,
    pub prediction: u8,
    pub seuil_metier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalAttribution {
    pub features: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalAttribution {
    pub shap_values: Vec<f64>,
    pub expected_value: f64,
    pub features: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDistribution {
    pub feature: String,
    pub client_value: Value,
    pub population_values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BivariatePairing {
    pub x: Vec<Value>,
    pub y: Vec<Value>,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct ScoringService {
    table: ClientTable,
    classifier: Arc<dyn Classifier>,
    explainer: TreeExplainer,
    background: Frame,
}

impl ScoringService {
    /// Wire the service; fails if the model needs a column the table lacks
    pub fn new(table: ClientTable, model: LoadedModel) -> anyhow::Result<Self> {
        for feature in &model.booster.feature_names {
            if feature != table.id_column() && !table.has_column(feature) {
                anyhow::bail!("model feature {} is not a column of the client table", feature);
            }
        }

        let classifier = model.classifier;
        let mut background = table.head(BACKGROUND_SIZE);
        if let Some(schema) = classifier.input_schema() {
            schema.coerce(&mut background);
        }
        tracing::info!("Background sample: {} rows", background.num_rows());

        Ok(Self {
            table,
            classifier,
            explainer: TreeExplainer::new(model.booster),
            background,
        })
    }

    pub fn table(&self) -> &ClientTable {
        &self.table
    }

    /// Client row with numeric columns coerced to the model's types
    fn prepared_client(&self, client_id: i64) -> Result<Frame, ScoringError> {
        let mut frame = self
            .table
            .client_frame(client_id)
            .ok_or_else(|| client_not_found(client_id))?;
        if let Some(schema) = self.classifier.input_schema() {
            schema.coerce(&mut frame);
        }
        Ok(frame)
    }

    pub fn client_ids(&self) -> Vec<i64> {
        self.table.ids().to_vec()
    }

    pub fn predict(&self, client_id: i64, threshold: f64) -> Result<Prediction, ScoringError> {
        let frame = self.prepared_client(client_id)?;

        let probability = self
            .classifier
            .predict(&frame)
            .map_err(|e| ScoringError::Internal(format!("Erreur prédiction : {}", e)))?
            .first()
            .copied()
            .ok_or_else(|| ScoringError::Internal("empty prediction".to_string()))?;

        let children = match frame.value(0, CHILDREN).and_then(Value::as_f64) {
            Some(v) if v.is_finite() => v as i64,
            _ => {
                return Err(ScoringError::Internal(format!(
                    "{} missing for client {}",
                    CHILDREN, client_id
                )))
            }
        };
        let income = frame
            .value(0, INCOME)
            .and_then(Value::as_f64)
            .ok_or_else(|| ScoringError::Internal(format!("{} missing for client {}", INCOME, client_id)))?;

        Ok(Prediction {
            client_id,
            gender: Gender::from_indicators(frame.value(0, GENDER_FEMALE), frame.value(0, GENDER_MALE)),
            children,
            income,
            probability_default: probability,
            prediction: u8::from(probability >= threshold),
            seuil_metier: threshold,
        })
    }

    /// Mean absolute attribution over the background sample
    pub fn shap_global(&self) -> Result<GlobalAttribution, ScoringError> {
        let internal = |e: String| ScoringError::Internal(format!("Erreur SHAP global : {}", e));

        let features = self.explainer.feature_names().to_vec();
        let x = feature_matrix(&self.background, &features).map_err(|e| internal(e.to_string()))?;
        let phi = self
            .explainer
            .shap_values(&x)
            .map_err(|e| internal(e.to_string()))?
            .positive_class()
            .ok_or_else(|| internal("only binary classifiers are supported".to_string()))?;

        let values = if phi.nrows() == 0 {
            vec![0.0; features.len()]
        } else {
            phi.mapv(f64::abs).mean_axis(ndarray::Axis(0)).map(|m| m.to_vec()).unwrap_or_default()
        };

        Ok(GlobalAttribution { features, values })
    }

    pub fn shap_local(&self, client_id: i64) -> Result<LocalAttribution, ScoringError> {
        let frame = self.prepared_client(client_id)?;
        let internal = |e: String| ScoringError::Internal(format!("Erreur SHAP local : {}", e));

        let x = feature_matrix(&frame, self.explainer.feature_names()).map_err(|e| internal(e.to_string()))?;
        let phi = self
            .explainer
            .shap_values(&x)
            .map_err(|e| internal(e.to_string()))?
            .positive_class()
            .ok_or_else(|| internal("only binary classifiers are supported".to_string()))?;
        let expected_value = self
            .explainer
            .expected_value()
            .positive_class()
            .ok_or_else(|| internal("only binary classifiers are supported".to_string()))?;

        Ok(LocalAttribution {
            shap_values: phi.row(0).to_vec(),
            expected_value,
            features: frame.row_map(0),
        })
    }

    pub fn feature_distribution(
        &self,
        client_id: i64,
        feature: &str,
    ) -> Result<FeatureDistribution, ScoringError> {
        if !self.table.contains(client_id) {
            return Err(client_not_found(client_id));
        }
        let population_values = self.table.column_values(feature).ok_or_else(|| {
            ScoringError::NotFound(format!("Variable {} non trouvée dans les données.", feature))
        })?;
        let client_value = self
            .table
            .cell(client_id, feature)
            .cloned()
            .unwrap_or(Value::Null);

        Ok(FeatureDistribution {
            feature: feature.to_string(),
            client_value,
            population_values,
        })
    }

    /// Both columns, each with its own missing values dropped
    pub fn bivariate(&self, x: &str, y: &str) -> Result<BivariatePairing, ScoringError> {
        match (self.table.column_values(x), self.table.column_values(y)) {
            (Some(x), Some(y)) => Ok(BivariatePairing { x, y }),
            _ => Err(ScoringError::InvalidArgument("Colonnes invalides.".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{load_model, ModelSource};
    use std::path::PathBuf;

    fn fixtures() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    async fn service() -> ScoringService {
        let table = ClientTable::load(&fixtures().join("clients.csv"), "SK_ID_CURR").unwrap();
        let model = load_model(&ModelSource::Local(fixtures().join("model"))).await.unwrap();
        ScoringService::new(table, model).unwrap()
    }

    #[tokio::test]
    async fn test_predict_known_client() {
        let svc = service().await;
        let p = svc.predict(100001, crate::config::DEFAULT_THRESHOLD).unwrap();
        assert_eq!(p.client_id, 100001);
        assert_eq!(p.gender, Gender::F);
        assert_eq!(p.children, 0);
        assert_eq!(p.income, 135000.0);
        assert!((p.probability_default - 1.0 / (1.0 + (-0.2f64).exp())).abs() < 1e-9);
        assert_eq!(p.prediction, 1);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let svc = service().await;
        let p = svc.predict(100001, 0.5).unwrap().probability_default;
        assert_eq!(svc.predict(100001, p).unwrap().prediction, 1);
        assert_eq!(svc.predict(100001, p + 1e-9).unwrap().prediction, 0);
    }

    #[tokio::test]
    async fn test_predict_is_deterministic() {
        let svc = service().await;
        let first = svc.predict(100005, 0.4).unwrap();
        let second = svc.predict(100005, 0.4).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.gender, Gender::M);
        assert_eq!(first.prediction, 1);
    }

    #[tokio::test]
    async fn test_unknown_gender() {
        let svc = service().await;
        assert_eq!(svc.predict(100038, 0.5).unwrap().gender, Gender::Unknown);
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_found() {
        let svc = service().await;
        assert!(matches!(svc.predict(999999999, 0.5), Err(ScoringError::NotFound(_))));
        assert!(matches!(svc.shap_local(999999999), Err(ScoringError::NotFound(_))));
        assert!(matches!(
            svc.feature_distribution(999999999, INCOME),
            Err(ScoringError::NotFound(msg)) if msg.contains("999999999")
        ));
    }

    #[tokio::test]
    async fn test_shap_global_shape() {
        let svc = service().await;
        let global = svc.shap_global().unwrap();
        assert_eq!(global.features.len(), global.values.len());
        assert_eq!(global.features.len(), 6);
        assert!(global.values.iter().all(|v| *v >= 0.0));
        // id and gender columns are never split on
        assert_eq!(global.values[0], 0.0);
    }

    #[tokio::test]
    async fn test_shap_local_matches_margin() {
        let svc = service().await;
        let local = svc.shap_local(100001).unwrap();
        assert_eq!(local.shap_values.len(), 6);
        let total: f64 = local.shap_values.iter().sum::<f64>() + local.expected_value;
        assert!((total - 0.2).abs() < 1e-9);
        assert_eq!(local.features["SK_ID_CURR"], serde_json::json!(100001));
        assert_eq!(local.features["CNT_CHILDREN"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn test_feature_distribution() {
        let svc = service().await;
        let d = svc.feature_distribution(100028, "EXT_SOURCE_2").unwrap();
        assert_eq!(d.population_values.len(), 5);
        assert!(d.client_value.is_missing());

        let err = svc.feature_distribution(100001, "FOO").unwrap_err();
        assert!(matches!(err, ScoringError::NotFound(msg) if msg.contains("FOO")));
    }

    #[tokio::test]
    async fn test_bivariate_filters_independently() {
        let svc = service().await;
        let pair = svc.bivariate("EXT_SOURCE_2", INCOME).unwrap();
        assert_eq!(pair.x.len(), 5);
        assert_eq!(pair.y.len(), 6);
        assert!(matches!(svc.bivariate("FOO", INCOME), Err(ScoringError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_rejects_model_table_mismatch() {
        let table = ClientTable::from_reader(
            csv::Reader::from_reader("SK_ID_CURR,CNT_CHILDREN\n1,0\n".as_bytes()),
            "SK_ID_CURR",
        )
        .unwrap();
        let model = load_model(&ModelSource::Local(fixtures().join("model"))).await.unwrap();
        assert!(ScoringService::new(table, model).is_err());
    }
}
