//! Glue for the host HTTP layer.
//!
//! relais does not accept connections. The host (hyper, axum, anything that
//! speaks `http` types) parses the request, buffers the body, and calls in:
//!
//! ```rust,ignore
//! let svc = service_fn(move |req: hyper::Request<Incoming>| {
//!     let pipeline = Arc::clone(&pipeline);
//!     async move {
//!         let (parts, body) = req.into_parts();
//!         let body = body.collect().await?.to_bytes();
//!         let req = host::from_http(http::Request::from_parts(parts, body), Some(peer));
//!         Ok::<_, hyper::Error>(host::into_http(host::handle_guarded(pipeline, req).await))
//!     }
//! });
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;

use crate::body::Body;
use crate::pipeline::Pipeline;
use crate::request::{Headers, Request};
use crate::response::Response;

const FRAMING_HEADERS: [&str; 2] = ["content-length", "transfer-encoding"];

/// Converts a buffered `http` request into a pipeline [`Request`].
///
/// The client id is the first `X-Forwarded-For` hop when present (the host
/// normally sits behind a reverse proxy), otherwise the peer IP. The body is
/// classified by its `content-type`.
pub fn from_http(req: http::Request<Bytes>, peer: Option<SocketAddr>) -> Request {
    let (parts, body) = req.into_parts();

    let headers: Headers = parts.headers.iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();

    let client_id = parts.headers.get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()));

    let query = parts.uri.query().map(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .into_owned()
            .collect::<HashMap<_, _>>()
    });

    let content_type = parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let body = match Body::negotiate(content_type, body) {
        Body::Empty => None,
        body => Some(body),
    };

    Request {
        method: parts.method.as_str().to_owned(),
        path: parts.uri.path().to_owned(),
        headers,
        body,
        query,
        client_id,
        proxy: None,
    }
}

/// Converts a pipeline [`Response`] into an `http` response.
///
/// A `content-type` matching the body's shape is added unless the response
/// already declares one. Headers that are not valid on the wire are dropped,
/// and framing headers are left for the server to derive from the body.
pub fn into_http(resp: Response) -> http::Response<Full<Bytes>> {
    let mut out = http::Response::new(Full::new(resp.body.to_bytes()));
    *out.status_mut() = resp.status;

    let headers = out.headers_mut();
    for (name, value) in &resp.headers {
        if FRAMING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping response header that is not valid on the wire"),
        }
    }
    if !headers.contains_key(CONTENT_TYPE) {
        if let Some(content_type) = resp.body.content_type() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }
    out
}

/// Runs `req` through `pipeline` on its own task, turning a panic in any
/// stage into `500 {"error": "Internal server error"}`.
pub async fn handle_guarded(pipeline: Arc<Pipeline>, req: Request) -> Response {
    let method = req.method.clone();
    let path = req.path.clone();
    match tokio::spawn(async move { pipeline.handle(req).await }).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(%method, %path, error = %e, "pipeline stage failed");
            Response::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}
