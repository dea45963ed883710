//! Fetch layer behaviour against a local HTTP server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::header::{HeaderValue, USER_AGENT};
use serde_json::json;

use jobfair::anti_block::{AntiBlocking, DelayRange};
use jobfair::fetch::{FetchError, FetchSettings, Fetcher, RetryPolicy};
use jobfair::{FetchStrategy, ScraperConfig};

type Hits = Arc<AtomicUsize>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn settings(max_rate_limit_waits: u32) -> FetchSettings {
    FetchSettings {
        timeout: Duration::from_secs(5),
        delay: DelayRange::none(),
        max_rate_limit_waits,
        rate_limit_default_wait: 0,
    }
}

fn fetcher(base: &str, strategy: FetchStrategy, waits: u32) -> Fetcher {
    let config = ScraperConfig::new("Local Fixture", base, "fixture", strategy);
    Fetcher::new(config, settings(waits))
        .unwrap()
        .with_toolkit(AntiBlocking::seeded(3, DelayRange::none()))
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        })
}

fn html(body: &str) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/html; charset=utf-8")],
        format!("<html><body>{}</body></html>", body),
    )
        .into_response()
}

async fn throttle_once(State(hits): State<Hits>) -> Response {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "0")],
            "slow down",
        )
            .into_response()
    } else {
        html("<h1>Spring Job Expo</h1>")
    }
}

async fn always_throttle(State(hits): State<Hits>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("retry-after", "0")],
        "slow down",
    )
        .into_response()
}

async fn flaky(State(hits): State<Hits>) -> Response {
    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else {
        html("<p>Recovered</p>")
    }
}

async fn broken(State(hits): State<Hits>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::BAD_GATEWAY.into_response()
}

async fn block_page(State(hits): State<Hits>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    html("<h1>Too Many Requests</h1><p>Please try again later.</p>")
}

async fn echo(
    State(hits): State<Hits>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    Json(json!({
        "query": query.unwrap_or_default(),
        "user_agent": header("user-agent"),
        "content_type": header("content-type"),
        "api_key": header("x-api-key"),
        "accept_language": header("accept-language"),
    }))
    .into_response()
}

async fn not_json(State(hits): State<Hits>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, [("content-type", "text/plain")], "oops").into_response()
}

async fn app(route: &str, hits: Hits) -> String {
    let router = match route {
        "throttle_once" => Router::new().route("/", get(throttle_once)),
        "always_throttle" => Router::new().route("/", get(always_throttle)),
        "flaky" => Router::new().route("/", get(flaky)),
        "broken" => Router::new().route("/", get(broken)),
        "block_page" => Router::new().route("/", get(block_page)),
        "echo" => Router::new().route("/", get(echo)),
        "not_json" => Router::new().route("/", get(not_json)),
        other => panic!("unknown route {}", other),
    };
    serve(router.with_state(hits)).await
}

#[tokio::test]
async fn test_rate_limited_request_is_retried_after_wait() {
    let hits = Hits::default();
    let base = app("throttle_once", hits.clone()).await;

    let page = fetcher(&base, FetchStrategy::Static, 3)
        .static_fetch(&format!("{}/", base), &[])
        .await
        .unwrap();

    assert_eq!(page.status, 200);
    assert!(page.body.contains("Spring Job Expo"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rate_limit_waits_are_bounded_and_not_retried() {
    let hits = Hits::default();
    let base = app("always_throttle", hits.clone()).await;

    let err = fetcher(&base, FetchStrategy::Static, 2)
        .static_fetch(&format!("{}/", base), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RateLimited { waits: 2, .. }));
    // One initial request plus two waits; the transport retry policy stays out of it.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_server_errors_are_retried_with_backoff() {
    let hits = Hits::default();
    let base = app("flaky", hits.clone()).await;

    let page = fetcher(&base, FetchStrategy::Static, 3)
        .static_fetch(&format!("{}/", base), &[])
        .await
        .unwrap();

    assert!(page.body.contains("Recovered"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_give_up_after_max_attempts() {
    let hits = Hits::default();
    let base = app("broken", hits.clone()).await;

    let err = fetcher(&base, FetchStrategy::Static, 3)
        .static_fetch(&format!("{}/", base), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 502, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_html_block_page_counts_as_rate_limited() {
    let hits = Hits::default();
    let base = app("block_page", hits.clone()).await;

    let err = fetcher(&base, FetchStrategy::Static, 0)
        .static_fetch(&format!("{}/", base), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RateLimited { waits: 0, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_api_fetch_merges_headers_and_params() {
    let hits = Hits::default();
    let base = app("echo", hits.clone()).await;

    let mut custom = reqwest::header::HeaderMap::new();
    custom.insert("x-api-key", HeaderValue::from_static("k-123"));
    custom.insert(USER_AGENT, HeaderValue::from_static("FairBot/2.0"));

    let body = fetcher(&base, FetchStrategy::Api, 3)
        .api_fetch(&format!("{}/", base), &[("page", "2")], Some(&custom))
        .await
        .unwrap();

    assert_eq!(body["query"], json!("page=2"));
    assert_eq!(body["user_agent"], json!("FairBot/2.0"));
    assert_eq!(body["api_key"], json!("k-123"));
    assert_eq!(body["content_type"], json!("application/json"));
    assert_eq!(
        body["accept_language"],
        json!("zh-HK,zh;q=0.9,en-US;q=0.8,en;q=0.7")
    );
}

#[tokio::test]
async fn test_api_fetch_uses_pool_user_agent_by_default() {
    let hits = Hits::default();
    let base = app("echo", hits.clone()).await;

    let body = fetcher(&base, FetchStrategy::Api, 3)
        .api_fetch(&format!("{}/", base), &[], None)
        .await
        .unwrap();

    let ua = body["user_agent"].as_str().unwrap();
    assert!(jobfair::anti_block::USER_AGENTS.contains(&ua));
}

#[tokio::test]
async fn test_invalid_json_is_not_retried() {
    let hits = Hits::default();
    let base = app("not_json", hits.clone()).await;

    let err = fetcher(&base, FetchStrategy::Api, 3)
        .api_fetch(&format!("{}/", base), &[], None)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Decode { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
