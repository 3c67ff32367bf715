mod common;

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use chrono::DateTime;
use common::{DEMO_KEY, MockIndex, TEST_KEY, spawn_app, test_config};
use crawlgate::clients::IndexError;
use crawlgate::config::ApiKeyConfig;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn default_app() -> Router {
    spawn_app(test_config(), MockIndex::new(Duration::ZERO)).await.0
}

async fn get(app: &Router, uri: &str, key: Option<&str>) -> Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post(app: &Router, uri: &str, key: Option<&str>, body: Value) -> Response {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    app.clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn test_recrawl_submission_and_status() {
    let app = default_app().await;

    let response = post(
        &app,
        "/api/v1/crawl/recrawl",
        Some(DEMO_KEY),
        json!({ "url": "https://example.com/page", "priority": 10 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["kind"], "recrawl");
    assert_eq!(
        body["data"]["message"],
        "Re-crawl job created successfully. Will complete within 1 hour."
    );

    let created = DateTime::parse_from_rfc3339(body["data"]["created_at"].as_str().unwrap()).unwrap();
    let deadline =
        DateTime::parse_from_rfc3339(body["data"]["sla_deadline"].as_str().unwrap()).unwrap();
    assert_eq!(deadline - created, chrono::Duration::hours(1));

    let job_id = body["data"]["job_id"].as_str().unwrap().to_string();
    let response = get(&app, &format!("/api/v1/jobs/{job_id}"), Some(DEMO_KEY)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["data"]["job_id"], job_id);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["retry_count"], 0);
    assert_eq!(body["data"]["url"], "https://example.com/page");
}

#[tokio::test]
async fn test_crawl_submission_uses_crawl_defaults() {
    let app = default_app().await;

    let response = post(
        &app,
        "/api/v1/crawl",
        Some(DEMO_KEY),
        json!({ "url": "https://example.com/other" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["data"]["kind"], "crawl");
    assert_eq!(body["data"]["priority"], 0);
    assert_eq!(
        body["data"]["message"],
        "Crawl job created successfully. Will complete within 24 hours."
    );
}

#[tokio::test]
async fn test_submission_validation() {
    let app = default_app().await;

    for body in [
        json!({ "url": "not a url" }),
        json!({ "url": "ftp://example.com/file" }),
        json!({ "url": "https://example.com", "priority": 11 }),
        json!({ "url": "https://example.com", "priority": -1 }),
        json!({ "url": format!("https://example.com/{}", "a".repeat(2100)) }),
    ] {
        let response = post(&app, "/api/v1/crawl/recrawl", Some(DEMO_KEY), body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_job_lookup_errors() {
    let app = default_app().await;

    let response = get(&app, "/api/v1/jobs/not-a-uuid", Some(DEMO_KEY)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(
        &app,
        "/api/v1/jobs/5b1c2d9e-0000-4000-8000-000000000000",
        Some(DEMO_KEY),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_auth() {
    let app = default_app().await;

    let response = get(&app, "/api/v1/search?q=rust", Some("wrong-key")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/search?q=rust")
                .header("Authorization", format!("Bearer {TEST_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("100"));

    // Anonymous callers get their own small quota
    let response = get(&app, "/api/v1/search?q=rust", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("10"));

    let mut config = test_config();
    config.auth.allow_anonymous = false;
    let (strict, _) = spawn_app(config, MockIndex::new(Duration::ZERO)).await;
    let response = get(&strict, "/api/v1/search?q=rust", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rate_limit_rejects_over_quota() {
    let mut config = test_config();
    config.auth.api_keys.push(ApiKeyConfig {
        key: "tiny-key".to_string(),
        name: "Tiny".to_string(),
        rate_limit: Some(3),
        window_seconds: None,
    });
    let index = MockIndex::new(Duration::ZERO);
    let (app, _) = spawn_app(config, index.clone()).await;

    for expected_remaining in ["2", "1", "0"] {
        let response = get(&app, "/api/v1/search?q=rust", Some("tiny-key")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("3"));
        assert_eq!(
            header(&response, "x-ratelimit-remaining").as_deref(),
            Some(expected_remaining)
        );
        assert!(header(&response, "x-ratelimit-reset").is_some());
    }

    let response = get(&app, "/api/v1/search?q=rust", Some("tiny-key")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("0"));
    let retry_after: i64 = header(&response, "retry-after").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    // Denied requests never reach the index
    assert_eq!(index.calls(), 1);

    // Other credentials keep their own budget
    let response = get(&app, "/api/v1/search?q=rust", Some(DEMO_KEY)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_keys_sharing_a_name_keep_separate_quotas() {
    let mut config = test_config();
    for secret in ["secret-a", "secret-b"] {
        config.auth.api_keys.push(ApiKeyConfig {
            key: secret.to_string(),
            name: "ci".to_string(),
            rate_limit: Some(2),
            window_seconds: None,
        });
    }
    let (app, _) = spawn_app(config, MockIndex::new(Duration::ZERO)).await;

    for _ in 0..2 {
        let response = get(&app, "/api/v1/search?q=rust", Some("secret-a")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = get(&app, "/api/v1/search?q=rust", Some("secret-a")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = get(&app, "/api/v1/search?q=rust", Some("secret-b")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_search_response_shape_and_cache() {
    let index = MockIndex::new(Duration::ZERO);
    let (app, _) = spawn_app(test_config(), index.clone()).await;

    let response = post(
        &app,
        "/api/v1/search",
        Some(DEMO_KEY),
        json!({ "query": "machine learning", "page": 1, "page_size": 10 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-process-time").is_some());

    let body = json_body(response).await;
    let data = &body["data"];
    assert_eq!(data["query"], "machine learning");
    assert_eq!(data["total_results"], 42);
    assert_eq!(data["total_pages"], 5);
    assert_eq!(data["page"], 1);
    assert_eq!(data["cached"], false);
    assert_eq!(data["results"].as_array().unwrap().len(), 3);
    assert!(data["results"][0]["url"].is_string());
    assert!(data["search_time_ms"].is_number());

    // Same query with different spacing and case hits the cache
    let response = get(
        &app,
        "/api/v1/search?q=Machine%20%20Learning&page=1&page_size=10",
        Some(DEMO_KEY),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["data"]["cached"], true);
    assert_eq!(index.calls(), 1);
}

#[tokio::test]
async fn test_search_validation_and_upstream_errors() {
    let app = default_app().await;

    let response = post(&app, "/api/v1/search", Some(DEMO_KEY), json!({ "query": "   " })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(
        &app,
        "/api/v1/search",
        Some(DEMO_KEY),
        json!({ "query": "rust", "page_size": 101 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(
        &app,
        "/api/v1/search",
        Some(DEMO_KEY),
        json!({ "query": "rust", "page": 0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(
        &app,
        "/api/v1/search",
        Some(DEMO_KEY),
        json!({ "query": "rust", "timeout_ms": 0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let slow = MockIndex::new(Duration::from_millis(200));
    let (app, _) = spawn_app(test_config(), slow.clone()).await;
    let response = get(&app, "/api/v1/search?q=rust&timeout_ms=20", Some(DEMO_KEY)).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let down = MockIndex::failing(Duration::ZERO, IndexError::Transient("connection refused".into()));
    let (app, _) = spawn_app(test_config(), down.clone()).await;
    let response = get(&app, "/api/v1/search?q=rust", Some(DEMO_KEY)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(down.calls(), 3);

    let malformed = MockIndex::failing(Duration::ZERO, IndexError::MalformedQuery("bad syntax".into()));
    let (app, _) = spawn_app(test_config(), malformed.clone()).await;
    let response = get(&app, "/api/v1/search?q=rust", Some(DEMO_KEY)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(malformed.calls(), 1);
}

#[tokio::test]
async fn test_worker_lifecycle_over_http() {
    let app = default_app().await;

    let response = post(&app, "/api/v1/jobs/claim", Some(DEMO_KEY), json!({ "worker_id": "w-1" })).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = post(
        &app,
        "/api/v1/crawl/recrawl",
        Some(DEMO_KEY),
        json!({ "url": "https://example.com/a" }),
    )
    .await;
    let job_id = json_body(response).await["data"]["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = post(&app, "/api/v1/jobs/claim", Some(DEMO_KEY), json!({ "worker_id": "w-1" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["job"]["job_id"], job_id);
    assert_eq!(body["data"]["job"]["status"], "in_progress");
    assert_eq!(body["data"]["lease"]["worker_id"], "w-1");

    let response = post(
        &app,
        &format!("/api/v1/jobs/{job_id}/renew"),
        Some(DEMO_KEY),
        json!({ "worker_id": "w-1" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["renewals"], 1);

    // Only the lease holder may report
    let response = post(
        &app,
        &format!("/api/v1/jobs/{job_id}/complete"),
        Some(DEMO_KEY),
        json!({ "worker_id": "w-2", "result": {} }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = post(
        &app,
        &format!("/api/v1/jobs/{job_id}/complete"),
        Some(DEMO_KEY),
        json!({ "worker_id": "w-1", "result": { "status_code": 200 } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["result"]["status_code"], 200);

    // Terminal jobs reject further reports
    let response = post(
        &app,
        &format!("/api/v1/jobs/{job_id}/fail"),
        Some(DEMO_KEY),
        json!({ "worker_id": "w-1", "reason": "late" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = get(&app, &format!("/api/v1/jobs/{job_id}"), Some(DEMO_KEY)).await;
    assert_eq!(json_body(response).await["data"]["status"], "completed");
}

#[tokio::test]
async fn test_ops_endpoints_skip_auth() {
    let app = default_app().await;

    let response = get(&app, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["dependencies"]["database"], "connected");
    assert_eq!(body["data"]["queue_depth"], 0);

    let response = get(&app, "/", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["name"], "crawlgate");

    let response = get(&app, "/metrics", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-ratelimit-limit").is_none());
}
