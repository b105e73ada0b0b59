//! Proxying through a pipeline, against scripted transports and a live
//! loopback upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use http::StatusCode;
use http_body_util::BodyExt;
use relais::client::{
    OutboundRequest, OutboundResponse, ProxyDirective, ProxyOptions, ProxyOverrides, Transport,
};
use relais::middleware::BoxFuture;
use relais::middleware::proxy::{self, Proxy};
use relais::{Body, Context, Headers, Pipeline, Request, TransportError, config::PipelineConfig, host};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Fails the first `failures` calls, then answers `200 {"ok": true}`.
struct Flaky {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl Transport for Flaky {
    fn send(&self, _request: OutboundRequest) -> BoxFuture<'_, Result<OutboundResponse, TransportError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failures = self.failures;
        Box::pin(async move {
            if call <= failures {
                return Err(TransportError::Other(format!("connection reset (attempt {call})")));
            }
            Ok(OutboundResponse {
                status: StatusCode::OK,
                headers: Headers::from([("content-type".to_owned(), "application/json".to_owned())]),
                body: br#"{"ok":true}"#.to_vec().into(),
            })
        })
    }
}

fn flaky_pipeline(failures: u32, calls: &Arc<AtomicU32>) -> Pipeline {
    let transport = Flaky { failures, calls: Arc::clone(calls) };
    Pipeline::new()
        .with(Proxy::with_transport(transport).options(
            ProxyOptions::default()
                .retries(3)
                .retry_delay(Duration::from_millis(200)),
        ))
        .route("/up", |mut ctx: Context| async move {
            ctx.set_proxy(ProxyDirective::new("http://upstream.test/up"));
            ctx
        })
}

#[tokio::test(start_paused = true)]
async fn two_failures_then_success_waits_twice() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = flaky_pipeline(2, &calls);

    let start = Instant::now();
    let resp = pipeline.handle(Request::new("GET", "/up")).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.body().as_json(), Some(&json!({"ok": true})));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn three_failures_report_the_last_one() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = flaky_pipeline(3, &calls);

    let resp = pipeline.handle(Request::new("GET", "/up")).await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        resp.body().as_json(),
        Some(&json!({
            "error": "Proxy request failed",
            "message": "connection reset (attempt 3)",
        }))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn directive_set_by_middleware_is_forwarded_inline() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new()
        .with(relais::middleware::from_fn(|mut ctx: Context| async move {
            if ctx.request().path().starts_with("/legacy/") {
                ctx.set_proxy(ProxyDirective::new("http://legacy.test/"));
            }
            ctx
        }))
        .with(Proxy::with_transport(Flaky { failures: 0, calls: Arc::clone(&calls) }));

    let resp = pipeline.handle(Request::new("GET", "/legacy/thing")).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let resp = pipeline.handle(Request::new("GET", "/modern")).await;
    assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Serves one canned HTTP/1.1 response per connection and reports each
/// request head it read.
async fn upstream(status_line: &'static str, content_type: &'static str, body: &'static str) -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { return };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0; 8192];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                let reply = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, rx)
}

#[tokio::test]
async fn live_upstream_json_with_transform() {
    init_tracing();
    let (addr, mut seen) = upstream("200 OK", "application/json", r#"{"id":1,"title":"hello"}"#).await;
    let pipeline = Pipeline::new()
        .with(Proxy::new().options(
            ProxyOptions::default()
                .header("x-forwarded-by", "relais")
                .transform_response(|data| Body::Json(json!({"success": true, "data": data.as_json().cloned()}))),
        ))
        .route("/posts/{id}", move |mut ctx: Context| async move {
            let target = format!("http://{addr}/posts/{}", ctx.param("id").unwrap_or("0"));
            ctx.set_proxy(ProxyDirective::new(target));
            ctx
        });

    let resp = pipeline.handle(Request::new("GET", "/posts/1").header("x-trace", "t-1")).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(
        resp.body().as_json(),
        Some(&json!({"success": true, "data": {"id": 1, "title": "hello"}}))
    );

    let head = seen.recv().await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /posts/1 http/1.1"));
    assert!(head.contains("x-trace: t-1"));
    assert!(head.contains("x-forwarded-by: relais"));
}

#[tokio::test]
async fn reencoded_upstream_body_is_framed_by_its_own_length() {
    init_tracing();
    let (addr, _seen) = upstream("200 OK", "application/json", r#"{ "id" : 1 }"#).await;
    let pipeline = Pipeline::new()
        .with(Proxy::new())
        .route("/item", move |mut ctx: Context| async move {
            ctx.set_proxy(ProxyDirective::new(format!("http://{addr}/item")));
            ctx
        });

    let resp = pipeline.handle(Request::new("GET", "/item")).await;
    let out = host::into_http(resp);
    assert_eq!(out.status(), StatusCode::OK);
    assert!(!out.headers().contains_key("content-length"));
    assert!(!out.headers().contains_key("connection"));

    let body = out.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"id":1}"#);
}

#[tokio::test]
async fn inbound_header_never_overrides_configured_one() {
    init_tracing();
    let (addr, mut seen) = upstream("200 OK", "text/plain", "ok").await;
    let pipeline = Pipeline::new()
        .with(Proxy::new().options(ProxyOptions::default().header("x-api-key", "secret")))
        .route("/keyed", move |mut ctx: Context| async move {
            ctx.set_proxy(ProxyDirective::new(format!("http://{addr}/")));
            ctx
        });

    for _ in 0..20 {
        let req = Request::new("GET", "/keyed").header("X-Api-Key", "client");
        pipeline.handle(req).await;
        let head = seen.recv().await.unwrap().to_ascii_lowercase();
        assert!(head.contains("x-api-key: secret"));
        assert!(!head.contains("x-api-key: client"));
    }
}

#[tokio::test]
async fn live_upstream_errors_pass_through_as_text() {
    init_tracing();
    let (addr, _seen) = upstream("503 Service Unavailable", "text/plain", "down for maintenance").await;
    let config = PipelineConfig {
        base_url: Some(format!("http://{addr}/")),
        timeout_ms: 5_000,
    };
    let pipeline = Pipeline::with_config(config)
        .with(Proxy::new())
        .route("/status", proxy::forward("/health"));

    let resp = pipeline.handle(Request::new("GET", "/status")).await;
    assert_eq!(resp.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.body(), &Body::Text("down for maintenance".into()));
}

#[tokio::test]
async fn stalled_upstream_times_out_per_attempt() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept and hold connections without ever answering.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let pipeline = Pipeline::new()
        .with(Proxy::new())
        .route("/slow", move |mut ctx: Context| async move {
            ctx.set_proxy(ProxyDirective::new(format!("http://{addr}/")).with_options(
                ProxyOverrides::default()
                    .retries(2)
                    .retry_delay(Duration::from_millis(10))
                    .timeout(Duration::from_millis(100)),
            ));
            ctx
        });

    let resp = pipeline.handle(Request::new("GET", "/slow")).await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.body().as_json().unwrap()["message"], "request timed out after 100ms");
}
