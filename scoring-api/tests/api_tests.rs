//! HTTP tests for the scoring routes
//!
//! Tests run against the fixture model (two trees over six features) and the
//! six-client fixture table.

use std::io::Write;
use std::path::PathBuf;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use credit_scoring_api::{bootstrap, config::Config, create_router};
use tower::ServiceExt;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture_config() -> Config {
    Config {
        model_path: fixtures().join("model"),
        clients_csv: fixtures().join("clients.csv"),
        ..Default::default()
    }
}

async fn app() -> Router {
    let state = bootstrap(&fixture_config()).await.unwrap();
    create_router(state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_root_message() {
    let (status, json) = get(app().await, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("prête"));
}

#[tokio::test]
async fn test_health_reports_model() {
    let (status, json) = get(app().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["clients"], 6);
    assert_eq!(json["model"]["num_trees"], 2);
}

#[tokio::test]
async fn test_list_clients() {
    let (status, json) = get(app().await, "/clients").await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<i64> = serde_json::from_value(json).unwrap();
    assert_eq!(ids, vec![100001, 100005, 100013, 100028, 100038, 100042]);
}

#[tokio::test]
async fn test_predict_default_threshold() {
    let (status, json) = get(app().await, "/predict/100001").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(json["SK_ID_CURR"], 100001);
    assert_eq!(json["CODE_GENDER (Sexe)"], "F");
    assert_eq!(json["CNT_CHILDREN (Nombre d'enfants)"], 0);
    assert_eq!(json["AMT_INCOME_TOTAL (revenu total)"], 135000.0);
    assert_eq!(json["seuil_metier"], 0.5454545454545455);

    let p = json["probability_default"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&p));
    assert_eq!(json["prediction"], u8::from(p >= 0.5454545454545455));
}

#[tokio::test]
async fn test_predict_custom_threshold() {
    let (_, json) = get(app().await, "/predict/100001?seuil=0.9").await;
    assert_eq!(json["prediction"], 0);
    assert_eq!(json["seuil_metier"], 0.9);
}

#[tokio::test]
async fn test_predict_unknown_client() {
    let (status, json) = get(app().await, "/predict/999999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("999999999"));
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_shap_global() {
    let (status, json) = get(app().await, "/shap/global").await;
    assert_eq!(status, StatusCode::OK);

    let features = json["features"].as_array().unwrap();
    let values = json["values"].as_array().unwrap();
    assert_eq!(features.len(), values.len());
    assert_eq!(features[4], "AMT_INCOME_TOTAL");
}

#[tokio::test]
async fn test_shap_local() {
    let (status, json) = get(app().await, "/shap/local/100005").await;
    assert_eq!(status, StatusCode::OK);

    let shap: Vec<f64> = serde_json::from_value(json["shap_values"].clone()).unwrap();
    let base = json["expected_value"].as_f64().unwrap();
    assert!((shap.iter().sum::<f64>() + base - (-0.3)).abs() < 1e-6);
    assert_eq!(json["features"]["SK_ID_CURR"], 100005);

    let (status, _) = get(app().await, "/shap/local/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_feature_distribution() {
    let (status, json) = get(
        app().await,
        "/client_feature_distribution/AMT_INCOME_TOTAL?client_id=100013",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["feature"], "AMT_INCOME_TOTAL");
    assert_eq!(json["client_value"], 202500.0);
    assert_eq!(json["population_values"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_feature_distribution_unknown_feature() {
    let (status, json) = get(app().await, "/client_feature_distribution/FOO?client_id=100001").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("FOO"));

    let (status, _) = get(app().await, "/client_feature_distribution/FOO?client_id=1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bivariate_analysis() {
    let (status, json) = get(app().await, "/bivariate_analysis?x=CNT_CHILDREN&y=EXT_SOURCE_2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["x"].as_array().unwrap().len(), 6);
    assert_eq!(json["y"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_bivariate_invalid_column() {
    let (status, json) = get(app().await, "/bivariate_analysis?x=FOO&y=AMT_INCOME_TOTAL").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Colonnes invalides.");
}

#[tokio::test]
async fn test_startup_fails_on_missing_files() {
    let config = Config {
        clients_csv: fixtures().join("missing.csv"),
        ..fixture_config()
    };
    assert!(bootstrap(&config).await.is_err());

    let config = Config {
        model_path: fixtures().join("no-model"),
        ..fixture_config()
    };
    assert!(bootstrap(&config).await.is_err());

    let config = Config {
        environment: "prod".to_string(),
        ..fixture_config()
    };
    assert!(bootstrap(&config).await.is_err());
}

#[tokio::test]
async fn test_startup_fails_on_duplicate_ids() {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "SK_ID_CURR,CODE_GENDER_F,CODE_GENDER_M,CNT_CHILDREN,AMT_INCOME_TOTAL,EXT_SOURCE_2").unwrap();
    writeln!(csv, "1,True,False,0,100.0,0.1").unwrap();
    writeln!(csv, "1,False,True,1,200.0,0.2").unwrap();

    let config = Config {
        clients_csv: csv.path().to_path_buf(),
        ..fixture_config()
    };
    assert!(bootstrap(&config).await.is_err());
}

#[tokio::test]
async fn test_missing_children_is_internal_error() {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "SK_ID_CURR,CODE_GENDER_F,CODE_GENDER_M,CNT_CHILDREN,AMT_INCOME_TOTAL,EXT_SOURCE_2").unwrap();
    writeln!(csv, "1,True,False,,100000.0,0.1").unwrap();
    writeln!(csv, "2,False,True,1,200000.0,0.2").unwrap();

    let config = Config {
        clients_csv: csv.path().to_path_buf(),
        ..fixture_config()
    };
    let app = create_router(bootstrap(&config).await.unwrap());

    let (status, json) = get(app.clone(), "/predict/1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], 500);
    assert!(json["error"].as_str().unwrap().contains("CNT_CHILDREN"));

    let (status, json) = get(app, "/predict/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["CNT_CHILDREN (Nombre d'enfants)"], 1);
}
