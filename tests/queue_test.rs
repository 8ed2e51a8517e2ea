//! Integration tests for queue status and overview endpoints.

mod common;

use common::{post_convert, TestHarness};

#[tokio::test]
async fn job_status_reports_position() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for body in ["a", "b", "c"] {
        let resp = client
            .post(format!("http://{addr}/api/convert/video-convert?format=mp4"))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
        assert!(resp.headers().contains_key("location"));
        let queued: serde_json::Value = resp.json().await.unwrap();
        ids.push(queued["jobId"].as_str().unwrap().to_string());
    }

    let status: serde_json::Value = client
        .get(format!("http://{addr}/api/queue/{}", ids[0]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "processing");
    assert_eq!(status["position"], 0);

    let status: serde_json::Value = client
        .get(format!("http://{addr}/api/queue/{}", ids[2]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "queued");
    assert_eq!(status["position"], 2);
    assert_eq!(status["estimatedWait"], 60);
    assert!(status.get("error").is_none());
}

#[tokio::test]
async fn job_status_errors() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/api/queue/missing-job"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let header_id = resp.headers()["x-request-id"].to_str().unwrap().to_string();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "not_found");
    assert_eq!(body["request_id"].as_str(), Some(header_id.as_str()));

    let resp = client
        .get(format!("http://{addr}/api/queue/missing-job"))
        .header("x-request-id", "poll-42")
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["request_id"], "poll-42");

    let resp = client
        .get(format!("http://{addr}/api/queue/bad%24id"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn overview_counts_jobs_and_slots() {
    let (h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    post_convert(&client, addr, "video-convert?format=mp4", b"a").await;
    post_convert(&client, addr, "video-convert?format=mp4", b"b").await;

    let overview: serde_json::Value = client
        .get(format!("http://{addr}/api/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overview["queue"]["queued"], 1);
    assert_eq!(overview["queue"]["processing"], 1);
    assert_eq!(
        overview["queue"]["max_queue_size"],
        h.ctx.config.queue.max_queue_size
    );

    let slots = overview["slots"].as_array().unwrap();
    let video = slots.iter().find(|s| s["class"] == "video").unwrap();
    assert_eq!(video["active"], 1);
    assert_eq!(video["limit"], h.ctx.config.concurrency.video);
    assert!(slots
        .iter()
        .filter(|s| s["class"] != "video")
        .all(|s| s["active"] == 0));
}

#[tokio::test]
async fn api_preset_limits_polling() {
    let mut config = common::test_config();
    config.rate_limits.api = ff_core::config::RateLimitPreset::new(60, 2);
    let (_h, addr) = TestHarness::with_server_config(config).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = client
            .get(format!("http://{addr}/api/queue"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-ratelimit-limit"], "2");
    }
    let resp = client
        .get(format!("http://{addr}/api/queue"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().contains_key("retry-after"));

    // /health is outside the api preset.
    let resp = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
