//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use ledgerline_core::{
    CategorizationRule, Category, Database, EngineConfig, RuleField, RuleOperator, TaxonomyFile,
    Thresholds,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const DINING: i64 = 2;
const GROCERIES: i64 = 3;

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::embedded();
    config.thresholds = Thresholds::new(0.7, 0.3).unwrap();
    config.batch.transaction_timeout = std::time::Duration::from_secs(5);
    config.training.min_samples_per_category = 5;
    config.rollout.min_window = 10;
    config.rollout.min_feedback = 0;
    config.rollout.max_latency_factor = 1000.0;
    config
}

fn category(id: i64, name: &str, parent_id: Option<i64>) -> Category {
    Category {
        id,
        name: name.to_string(),
        parent_id,
        is_business: None,
        is_system: false,
    }
}

fn setup_test_app() -> Router {
    let engine = Engine::new(Database::in_memory().unwrap(), test_config());
    engine
        .import_taxonomy(&TaxonomyFile {
            categories: vec![
                category(1, "Food", None),
                category(DINING, "Dining", Some(1)),
                category(GROCERIES, "Groceries", Some(1)),
            ],
            rules: vec![CategorizationRule {
                id: "starbucks".to_string(),
                category_id: DINING,
                field: RuleField::Merchant,
                operator: RuleOperator::Contains,
                value: "starbucks".to_string(),
                priority: 10,
            }],
        })
        .unwrap();
    create_router(Arc::new(engine), &ServerConfig::default())
}

async fn get_body_json(response: axum::response::Response) -> Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

fn tx(id: &str, description: &str, amount: f64) -> Value {
    json!({ "id": id, "description": description, "amount": amount })
}

async fn classify(app: &Router, transactions: Vec<Value>) -> Value {
    let response = send_json(
        app,
        "POST",
        "/api/classify",
        json!({ "transactions": transactions, "use_cache": false }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    get_body_json(response).await
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let app = setup_test_app();
    let response = get(&app, "/api/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["active_model_version"].is_null());
    assert_eq!(json["cache"]["entries"], 0);
}

// ========== Classification ==========

#[tokio::test]
async fn test_classify_rule_match() {
    let app = setup_test_app();
    let json = classify(
        &app,
        vec![tx("t1", "STARBUCKS #1234", -5.5), tx("t2", "UNKNOWN SHOP", -12.0)],
    )
    .await;

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["outcome"], "AUTO_APPLIED");
    assert_eq!(results[0]["category_id"], DINING);
    assert_eq!(results[0]["source"], "rule");
    assert_eq!(results[0]["rule_id"], "starbucks");
    // No model yet, so nothing else can resolve
    assert_eq!(results[1]["outcome"], "UNRESOLVED");

    assert_eq!(json["summary"]["total"], 2);
    assert_eq!(json["summary"]["auto_applied"], 1);
}

#[tokio::test]
async fn test_classify_empty_batch() {
    let app = setup_test_app();
    let json = classify(&app, vec![]).await;
    assert!(json["results"].as_array().unwrap().is_empty());
    assert_eq!(json["summary"]["total"], 0);
}

#[tokio::test]
async fn test_classify_rejects_malformed_body() {
    let app = setup_test_app();
    let response = send_json(
        &app,
        "POST",
        "/api/classify",
        json!({ "transactions": { "id": "t1" } }),
    )
    .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_classify_bad_rows_resolve_unresolved() {
    let app = setup_test_app();
    let json = classify(
        &app,
        vec![
            tx("t1", "STARBUCKS #1234", -5.5),
            json!({ "id": "t2", "description": "TEA", "amount": null }),
            json!({ "id": "t3", "description": "JUICE", "amount": "NaN" }),
            json!({ "id": "t4", "description": "WATER" }),
        ],
    )
    .await;

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0]["outcome"], "AUTO_APPLIED");
    for (result, id) in results[1..].iter().zip(["t2", "t3", "t4"]) {
        assert_eq!(result["transaction_id"], id);
        assert_eq!(result["outcome"], "UNRESOLVED");
        assert_eq!(result["note"]["kind"], "input_error");
    }
}

#[tokio::test]
async fn test_get_prediction() {
    let app = setup_test_app();
    classify(&app, vec![tx("t1", "STARBUCKS #1234", -5.5)]).await;

    let response = get(&app, "/api/predictions/t1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["current"]["outcome"], "AUTO_APPLIED");
    assert_eq!(json["history"].as_array().unwrap().len(), 1);

    let response = get(&app, "/api/predictions/missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_review_queue_empty_without_model() {
    let app = setup_test_app();
    classify(&app, vec![tx("t1", "UNKNOWN SHOP", -12.0)]).await;

    let response = get(&app, "/api/review?limit=10").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

// ========== Feedback ==========

#[tokio::test]
async fn test_feedback_flow() {
    let app = setup_test_app();
    classify(&app, vec![tx("t1", "STARBUCKS #1234", -5.5)]).await;

    let response = send_json(
        &app,
        "POST",
        "/api/feedback",
        json!({ "transaction_id": "t1", "accepted_suggestion": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["predicted_category_id"], DINING);
    assert_eq!(json["accepted"], true);

    let json = get_body_json(get(&app, "/api/feedback").await).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let json = get_body_json(get(&app, "/api/feedback/stats").await).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["accepted"], 1);
}

#[tokio::test]
async fn test_feedback_errors() {
    let app = setup_test_app();
    classify(&app, vec![tx("t1", "STARBUCKS #1234", -5.5)]).await;

    // No prediction for the transaction
    let response = send_json(
        &app,
        "POST",
        "/api/feedback",
        json!({ "transaction_id": "nope", "accepted_suggestion": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Category outside the taxonomy
    let response = send_json(
        &app,
        "POST",
        "/api/feedback",
        json!({ "transaction_id": "t1", "chosen_category_id": 99, "accepted_suggestion": false }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("99"));
}

// ========== Configuration and rules ==========

#[tokio::test]
async fn test_thresholds() {
    let app = setup_test_app();

    let json = get_body_json(get(&app, "/api/config/thresholds").await).await;
    assert_eq!(json["auto_apply_threshold"], 0.7);

    let response = send_json(
        &app,
        "PUT",
        "/api/config/thresholds",
        json!({ "auto_apply_threshold": 0.9, "review_threshold": 0.5 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(get(&app, "/api/config/thresholds").await).await;
    assert_eq!(json["auto_apply_threshold"], 0.9);

    // Review above auto-apply is rejected and nothing changes
    let response = send_json(
        &app,
        "PUT",
        "/api/config/thresholds",
        json!({ "auto_apply_threshold": 0.3, "review_threshold": 0.5 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(get(&app, "/api/config/thresholds").await).await;
    assert_eq!(json["review_threshold"], 0.5);
}

#[tokio::test]
async fn test_categories_and_rules() {
    let app = setup_test_app();

    let json = get_body_json(get(&app, "/api/categories").await).await;
    assert_eq!(json.as_array().unwrap().len(), 3);

    let json = get_body_json(get(&app, "/api/rules").await).await;
    assert_eq!(json["rules"].as_array().unwrap().len(), 1);
    assert!(json["disabled"].as_array().unwrap().is_empty());

    let response = send_json(
        &app,
        "POST",
        "/api/rules/test",
        tx("sample", "STARBUCKS STORE 99", -3.0),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["winner"]["rule_id"], "starbucks");
    assert_eq!(json["matching"].as_array().unwrap().len(), 1);
}

// ========== Training and rollout ==========

#[tokio::test]
async fn test_training_not_due() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/training/run")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["ran"], false);

    // Forced, but there is nothing to learn from
    let response = send_json(&app, "POST", "/api/training/run", json!({ "force": true })).await;
    let json = get_body_json(response).await;
    assert_eq!(json["ran"], true);
    assert_eq!(json["outcome"]["trigger"]["trigger"], "forced");
    assert!(json["outcome"]["report"]["model"].is_null());
    assert!(json["outcome"]["report"]["skipped"].is_string());
}

#[tokio::test]
async fn test_rollout_without_models() {
    let app = setup_test_app();

    let json = get_body_json(get(&app, "/api/rollout").await).await;
    assert!(json["active"].is_null());
    assert!(json["candidate"].is_null());

    let response = send_json(&app, "POST", "/api/rollout/evaluate", json!({})).await;
    let json = get_body_json(response).await;
    assert_eq!(json["decision"], "no_candidate");

    let response = send_json(&app, "POST", "/api/rollout/rollback", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = get_body_json(get(&app, "/api/rollout/events").await).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_train_promote_and_classify() {
    let app = setup_test_app();

    let mut batch = Vec::new();
    for i in 0..10 {
        batch.push(tx(&format!("d{}", i), "BLUE BOTTLE COFFEE", -4.5));
        batch.push(tx(&format!("g{}", i), "SAFEWAY GROCERY", -62.0));
    }
    classify(&app, batch).await;

    for i in 0..10 {
        for (id, category_id) in [(format!("d{}", i), DINING), (format!("g{}", i), GROCERIES)] {
            let response = send_json(
                &app,
                "POST",
                "/api/feedback",
                json!({
                    "transaction_id": id,
                    "chosen_category_id": category_id,
                    "accepted_suggestion": false
                }),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }
    }

    let response = send_json(&app, "POST", "/api/training/run", json!({ "force": true })).await;
    let json = get_body_json(response).await;
    let version = json["outcome"]["report"]["model"]["id"].as_i64().unwrap();
    assert_eq!(json["outcome"]["report"]["model"]["status"], "shadow");

    // First model has nothing to compare against
    let response = send_json(&app, "POST", "/api/rollout/evaluate", json!({})).await;
    let json = get_body_json(response).await;
    assert_eq!(json["decision"], "promoted");
    assert_eq!(json["model_version"], version);

    let json = classify(&app, vec![tx("new", "BLUE BOTTLE COFFEE", -5.0)]).await;
    let result = &json["results"][0];
    assert_eq!(result["category_id"], DINING);
    assert_eq!(result["source"], "model");
    assert_eq!(result["model_version"], version);

    let json = get_body_json(get(&app, "/api/models").await).await;
    assert_eq!(json[0]["status"], "active");

    let json = get_body_json(get(&app, "/api/health").await).await;
    assert_eq!(json["active_model_version"], version);
}

#[tokio::test]
async fn test_transition_conflict_maps_to_409() {
    let err = AppError::from(ledgerline_core::Error::TransitionConflict {
        version: 3,
        expected: "partial".to_string(),
        actual: "retired".to_string(),
    });
    assert_eq!(err.status, StatusCode::CONFLICT);
    assert!(err.internal.is_none());

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Model 3 is retired, expected partial");
}
