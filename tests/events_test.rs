//! Integration tests for the SSE events endpoint.

mod common;

use std::time::Duration;

use common::{post_convert, TestHarness};

/// Read from an SSE response until `needle` shows up or a second passes.
async fn read_until(resp: &mut reqwest::Response, needle: &str) -> String {
    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !seen.contains(needle) {
        let chunk = match tokio::time::timeout_at(deadline, resp.chunk()).await {
            Ok(Ok(Some(chunk))) => chunk,
            _ => break,
        };
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
    seen
}

#[tokio::test]
async fn sse_stream_connects() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/api/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let ct = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(ct.contains("text/event-stream"), "expected SSE content-type, got: {ct}");
}

#[tokio::test]
async fn replays_queue_lifecycle() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let queued: serde_json::Value = post_convert(&client, addr, "video-convert?format=mp4", b"v")
        .await
        .json()
        .await
        .unwrap();
    let job_id = queued["jobId"].as_str().unwrap();

    let mut resp = client
        .get(format!("http://{addr}/api/events"))
        .send()
        .await
        .unwrap();
    let body = read_until(&mut resp, "job_started").await;
    assert!(body.contains("\"type\":\"job_queued\""), "{body}");
    assert!(body.contains("\"type\":\"job_started\""), "{body}");
    assert!(body.contains(job_id), "{body}");
}

#[tokio::test]
async fn job_filter_drops_other_jobs() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let first: serde_json::Value = post_convert(&client, addr, "video-convert?format=mp4", b"a")
        .await
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = post_convert(&client, addr, "video-convert?format=mp4", b"b")
        .await
        .json()
        .await
        .unwrap();
    let first_id = first["jobId"].as_str().unwrap();
    let second_id = second["jobId"].as_str().unwrap();

    let mut resp = client
        .get(format!("http://{addr}/api/events?job_id={second_id}"))
        .send()
        .await
        .unwrap();

    // Finishing the first job promotes the second, live.
    let done = post_convert(
        &client,
        addr,
        &format!("video-convert?format=mp4&job_id={first_id}"),
        b"a",
    )
    .await;
    assert_eq!(done.status(), 200);

    let body = read_until(&mut resp, "job_started").await;
    assert!(body.contains(second_id), "{body}");
    assert!(body.contains("job_started"), "{body}");
    assert!(!body.contains(first_id), "{body}");
}
