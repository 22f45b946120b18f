//! Integration tests for the HTTP API
//!
//! Tests API endpoints against an in-memory economy.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use thought_keeper::config::CommitConfig;
use thought_keeper::core::{create_router, CurveParams, ThoughtEconomy};
use thought_keeper::store::{keys, DurableStore, MemoryStore};
use tower::ServiceExt;

const FOCUSED: &str =
    "Attention shapes perception because salience filters experience before reflection begins.";

fn create_test_router() -> (Router, Arc<ThoughtEconomy>) {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let economy = Arc::new(ThoughtEconomy::open(store, CurveParams::default(), CommitConfig::default()).unwrap());
    (create_router(economy.clone()), economy)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read(response).await
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read(response).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_router();
    let (status, json) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["chain_length"], 0);
}

#[tokio::test]
async fn test_engage_commits_and_credits() {
    let (app, economy) = create_test_router();
    let (status, json) = post(
        app.clone(),
        "/engage",
        json!({ "participant_id": "ada", "message": FOCUSED }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tier"], "resonance");
    assert_eq!(json["block_index"], 0);
    assert_eq!(json["tokens_awarded"], 2_000_000);
    assert_eq!(economy.chain().len(), 1);

    let (status, account) = get(app, "/accounts/ada").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["balance"], 2_000_000);
}

#[tokio::test]
async fn test_engage_noise_is_ok_but_unrecorded() {
    let (app, economy) = create_test_router();
    let (status, json) = post(app, "/engage", json!({ "participant_id": "ada", "message": "" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tier"], "noise");
    assert!(json["block_index"].is_null());
    assert!(economy.chain().is_empty());
}

#[tokio::test]
async fn test_engage_requires_participant() {
    let (app, _) = create_test_router();
    let (status, json) = post(app, "/engage", json!({ "participant_id": " ", "message": FOCUSED })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["retryable"], false);
}

#[tokio::test]
async fn test_chain_and_block_lookups() {
    let (app, _) = create_test_router();
    let (_, receipt) = post(
        app.clone(),
        "/engage",
        json!({ "participant_id": "ada", "message": FOCUSED }),
    )
    .await;
    let digest = receipt["block_digest"].as_str().unwrap().to_string();

    let (status, chain) = get(app.clone(), "/chain?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chain["length"], 1);
    assert_eq!(chain["tip"], digest.as_str());
    assert_eq!(chain["blocks"].as_array().unwrap().len(), 1);

    let (status, report) = get(app.clone(), "/chain/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["verified"], true);
    assert_eq!(report["block"]["digest"], digest.as_str());

    let (status, report) = get(app.clone(), &format!("/chain/digest/{digest}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["block"]["index"], 0);

    let (status, verify) = get(app.clone(), "/chain/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verify["valid"], true);
    assert_eq!(verify["verified_blocks"], 1);

    let (status, _) = get(app.clone(), "/chain/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(app, "/chain/digest/not-hex").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_witness_endpoint() {
    let (app, _) = create_test_router();
    let (_, receipt) = post(
        app.clone(),
        "/engage",
        json!({ "participant_id": "ada", "message": FOCUSED }),
    )
    .await;

    let (status, json) = post(
        app.clone(),
        "/witness",
        json!({
            "witness_id": "bob",
            "block_digest": receipt["block_digest"],
            "comment": "Perhaps salience is learned, which means culture trains what we notice first?"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["block_index"], 1);

    let (status, json) = post(
        app,
        "/witness",
        json!({ "witness_id": "bob", "block_digest": "ab".repeat(32), "comment": "Interesting point there." }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["retryable"], false);
}

#[tokio::test]
async fn test_economics_endpoint() {
    let (app, _) = create_test_router();
    let (status, json) = get(app, "/economics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cumulative_issued"], 0);
    assert_eq!(json["supply_ceiling"], 21_000_000_000_000u64);
    assert_eq!(json["current_rate"], 1_000_000);
    assert_eq!(json["quality_multipliers"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_pantheon_endpoint() {
    let (app, _) = create_test_router();
    let (status, json) = get(app, "/pantheon").await;

    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["apollo", "athena", "hermes", "mnemosyne"]);
}

#[tokio::test]
async fn test_unknown_account_is_404() {
    let (app, _) = create_test_router();
    let (status, json) = get(app, "/accounts/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nobody"));
}

#[tokio::test]
async fn test_verify_reports_first_bad_block() {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn DurableStore> = store.clone();
    let economy = Arc::new(ThoughtEconomy::open(shared, CurveParams::default(), CommitConfig::default()).unwrap());
    let app = create_router(economy.clone());
    for i in 0..3 {
        let message = format!("{FOCUSED} Consider case number {i} carefully.");
        post(app.clone(), "/engage", json!({ "participant_id": "ada", "message": message })).await;
    }

    let mut block = (*economy.chain().get(1).unwrap()).clone();
    block.engagements[0].participant = "mallory".to_string();
    store
        .replace_item(keys::CHAIN, 1, &serde_json::to_string(&block).unwrap())
        .unwrap();

    let (status, verify) = get(app.clone(), "/chain/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verify["valid"], false);
    assert_eq!(verify["verified_blocks"], 1);
    assert_eq!(verify["failed_at"], 1);
    assert_eq!(verify["fault"], "digest mismatch");

    let (status, report) = get(app, "/chain/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["verified"], false);
    assert_eq!(report["failed_at"], 1);
}

#[tokio::test]
async fn test_engagement_history_endpoint() {
    let (app, _) = create_test_router();
    for who in ["ada", "bob"] {
        post(app.clone(), "/engage", json!({ "participant_id": who, "message": FOCUSED })).await;
    }

    let (status, json) = get(app.clone(), "/engagements").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
    assert_eq!(json["results"][0]["engagement"]["participant"], "bob");
    assert_eq!(json["results"][0]["block_index"], 1);

    let (_, json) = get(app, "/engagements?participant=ada&limit=5").await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["results"][0]["engagement"]["tier"], "resonance");
    assert_eq!(json["results"][0]["kind"], "engagement");
}
