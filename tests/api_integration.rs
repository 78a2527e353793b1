//! Integration tests for the REST API feature.

#![cfg(feature = "api")]

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::util::ServiceExt;

use grid_balance::api::{AppState, router};

use common::{fixed_engine, test_config};

fn app() -> Router {
    app_with(20.0, 900.0, 800.0)
}

fn app_with(price: f64, renewable_mw: f64, demand_mw: f64) -> Router {
    let engine = fixed_engine(test_config(), price, renewable_mw, demand_mw);
    router(Arc::new(AppState { engine }))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn dispatch_then_read_back() {
    let app = app();

    let resp = app
        .clone()
        .oneshot(post_json("/dispatch", r#"{"region":"ON"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["decision"]["action"], "charge");
    assert_eq!(json["decision"]["rule"], "surplus_charge");
    assert_eq!(json["snapshot_provenance"], "live");
    assert_eq!(json["confidence"], 1.0);

    let resp = app.clone().oneshot(get("/logs?region=ON")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let logs = json_body(resp).await;
    assert_eq!(logs.as_array().map(Vec::len), Some(1));
    assert_eq!(logs[0]["region"], "ON");

    let resp = app
        .clone()
        .oneshot(get("/metrics?region=ON&days=1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let metrics = json_body(resp).await;
    assert_eq!(metrics["total_dispatches"], 1);
    assert_eq!(metrics["charge_count"], 1);

    let resp = app.oneshot(get("/status?region=ON")).await.unwrap();
    let status = json_body(resp).await;
    assert_eq!(status["provenance"], "stored");
}

#[tokio::test]
async fn price_override_changes_the_decision() {
    let resp = app()
        .oneshot(post_json("/dispatch", r#"{"region":"ON","price":250.0}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["decision"]["action"], "hold");
}

#[tokio::test]
async fn curtailment_risk_override_charges() {
    let body = r#"{"region":"ON","price":35.0,"curtailment_risk":true}"#;
    let resp = app_with(20.0, 800.0, 800.0)
        .oneshot(post_json("/dispatch", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["decision"]["action"], "charge");
    assert_eq!(json["decision"]["rule"], "curtailment_absorb");

    let body = r#"{"region":"ON","price":35.0,"curtailment_risk":false}"#;
    let resp = app_with(20.0, 800.0, 800.0)
        .oneshot(post_json("/dispatch", body))
        .await
        .unwrap();
    let json = json_body(resp).await;
    assert_eq!(json["decision"]["action"], "hold");
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let resp = app()
        .oneshot(post_json("/dispatch", r#"{"region":"ON","soc":99}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp).await;
    assert_eq!(json["error"], "validation");
}

#[tokio::test]
async fn unknown_region_is_rejected() {
    let resp = app()
        .oneshot(post_json("/dispatch", r#"{"region":"YT"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app().oneshot(get("/logs?region=YT")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn log_limit_is_bounded() {
    let resp = app().oneshot(get("/logs?limit=5000")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
