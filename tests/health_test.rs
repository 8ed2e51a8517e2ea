//! Integration tests for health, metrics and API docs.

mod common;

use common::TestHarness;

#[tokio::test]
async fn health_check_returns_ok() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/health"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn metrics_without_recorder() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().starts_with("# No metrics recorder"));
}

#[tokio::test]
async fn openapi_document_lists_convert() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let doc: serde_json::Value = client
        .get(format!("http://{addr}/api-docs/openapi.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/api/convert/{operation}"].is_object());
    assert!(doc["paths"]["/api/queue/{job_id}"].is_object());
}
