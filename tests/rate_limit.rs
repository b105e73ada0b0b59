//! Rate limiter behaviour under concurrent load and across windows.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use relais::middleware::rate_limit::{Admission, RateLimitStore, RateLimiter};
use relais::{Context, Pipeline, Request};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_admit_exactly_the_limit() {
    const LIMIT: u32 = 25;
    const CALLERS: usize = 200;

    let store = Arc::new(RateLimitStore::new(Duration::from_secs(60)));
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..CALLERS {
        let store = Arc::clone(&store);
        tasks.spawn(async move { store.acquire("shared", LIMIT) });
    }

    let mut admitted = 0;
    let mut limited = 0;
    while let Some(outcome) = tasks.join_next().await {
        match outcome.unwrap() {
            Admission::Admitted { .. } => admitted += 1,
            Admission::Limited { .. } => limited += 1,
        }
    }
    assert_eq!(admitted, LIMIT as usize);
    assert_eq!(limited, CALLERS - LIMIT as usize);
    assert_eq!(store.info("shared").count, LIMIT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_through_the_pipeline() {
    const LIMIT: u32 = 10;
    const REQUESTS: usize = 64;

    let pipeline = Arc::new(
        Pipeline::new()
            .with(RateLimiter::new(LIMIT, Duration::from_secs(60)))
            .route("/", |_ctx: Context| async { StatusCode::OK }),
    );

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..REQUESTS {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn(async move {
            pipeline.handle(Request::new("GET", "/").client_id("203.0.113.50")).await.status_code()
        });
    }

    let mut ok = 0;
    let mut too_many = 0;
    while let Some(status) = tasks.join_next().await {
        match status.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => too_many += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, LIMIT as usize);
    assert_eq!(too_many, REQUESTS - LIMIT as usize);
}

#[tokio::test(start_paused = true)]
async fn limited_client_is_admitted_again_after_the_window() {
    let limiter = RateLimiter::new(2, Duration::from_secs(10));
    let store = Arc::clone(limiter.store());
    let pipeline = Pipeline::new()
        .with(limiter)
        .route("/", |_ctx: Context| async { StatusCode::OK });
    let request = || Request::new("GET", "/").client_id("c1");

    assert_eq!(pipeline.handle(request()).await.status_code(), StatusCode::OK);
    assert_eq!(pipeline.handle(request()).await.status_code(), StatusCode::OK);
    let limited = pipeline.handle(request()).await;
    assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.header("Retry-After"), Some("10"));

    tokio::time::advance(Duration::from_secs(4)).await;
    let limited = pipeline.handle(request()).await;
    assert_eq!(limited.header("Retry-After"), Some("6"));

    tokio::time::advance(Duration::from_secs(7)).await;
    assert_eq!(pipeline.handle(request()).await.status_code(), StatusCode::OK);
    assert_eq!(store.info("c1").count, 1);
}

#[tokio::test(start_paused = true)]
async fn admin_reset_readmits_a_client() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    let store = Arc::clone(limiter.store());
    let pipeline = Pipeline::new()
        .with(limiter)
        .route("/", |_ctx: Context| async { StatusCode::OK });
    let request = || Request::new("GET", "/").client_id("c1");

    pipeline.handle(request()).await;
    assert_eq!(pipeline.handle(request()).await.status_code(), StatusCode::TOO_MANY_REQUESTS);

    store.reset("c1");
    assert_eq!(pipeline.handle(request()).await.status_code(), StatusCode::OK);

    store.clear();
    assert!(store.is_empty());
}
