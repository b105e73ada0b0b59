//! Upstream forwarding.
//!
//! A request is forwarded when it carries a [`ProxyDirective`], attached by an
//! earlier middleware or by a handler through [`Context::set_proxy`]. The
//! [`Proxy`] stage runs inline in the middleware chain and again after a
//! handler hands its context back, so either placement works:
//!
//! ```rust
//! use relais::{Context, Pipeline};
//! use relais::client::{ProxyDirective, ProxyOverrides};
//! use relais::middleware::proxy::Proxy;
//!
//! let pipeline = Pipeline::new()
//!     .with(Proxy::new())
//!     .route("/posts/{id}", |mut ctx: Context| async move {
//!         let target = format!("http://backend:8080/posts/{}", ctx.param("id").unwrap_or("0"));
//!         ctx.set_proxy(ProxyDirective::new(target).with_options(
//!             ProxyOverrides::default().header("accept", "application/json"),
//!         ));
//!         ctx
//!     });
//! ```
//!
//! The stage always answers a directed request: with the upstream response,
//! whatever its status, or with `500 {"error": "Proxy request failed",
//! "message": …}` once every attempt has failed.

use http::{Method, StatusCode, Uri};
use serde_json::json;
use url::Url;

use crate::body::Body;
use crate::client::{
    HyperTransport, OutboundRequest, ProxyDirective, ProxyOptions, ProxyOverrides, RetryingClient,
    Transport,
};
use crate::config::ProxySettings;
use crate::context::Context;
use crate::error::ProxyError;
use crate::handler::Handler;
use crate::middleware::{BoxFuture, Middleware};
use crate::request::{Headers, Request};
use crate::response::Response;

/// Inbound headers the outbound client sets itself.
const RECOMPUTED_HEADERS: [&str; 2] = ["host", "content-length"];

/// Upstream headers that describe the upstream connection or its framing.
/// The body is re-encoded after decoding, so none of them carry over.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Pipeline stage that forwards directed requests upstream.
pub struct Proxy {
    defaults: ProxyOptions,
    client: RetryingClient,
}

impl Proxy {
    /// Proxy over plain HTTP with default options.
    pub fn new() -> Self {
        Self::with_transport(HyperTransport::new())
    }

    pub fn with_transport(transport: impl Transport) -> Self {
        Self { defaults: ProxyOptions::default(), client: RetryingClient::new(transport) }
    }

    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self::new().options(ProxyOptions::from_settings(settings))
    }

    /// Replaces the module-level defaults that per-call overrides refine.
    pub fn options(mut self, defaults: ProxyOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &ProxyOptions {
        &self.defaults
    }

    async fn forward(&self, request: &Request, directive: &ProxyDirective) -> Response {
        let options = self.defaults.merge(&directive.options);
        let outcome = match outbound(request, directive, &options) {
            Ok(outbound) => self.client.call(outbound, &options).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(upstream) => {
                let content_type = upstream.header("content-type").map(str::to_owned);
                let mut body = Body::negotiate(content_type.as_deref(), upstream.body);
                if let Some(transform) = &options.transform_response {
                    body = transform(body);
                }
                let headers = upstream.headers.into_iter()
                    .filter(|(name, _)| !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)))
                    .collect();
                Response::from_parts(upstream.status, headers, body)
            }
            Err(e) => {
                tracing::error!(target_url = %directive.target, error = %e, "proxy request failed");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .json(json!({
                        "error": "Proxy request failed",
                        "message": e.message(),
                    }))
            }
        }
    }
}

impl Default for Proxy {
    fn default() -> Self { Self::new() }
}

impl Middleware for Proxy {
    fn process(&self, mut ctx: Context) -> BoxFuture<'_, Context> {
        Box::pin(async move {
            if ctx.has_response() {
                return ctx;
            }
            let Some(directive) = ctx.request().proxy() else {
                return ctx;
            };
            let response = self.forward(ctx.request(), directive).await;
            ctx.respond(response);
            ctx
        })
    }

    fn forwards(&self) -> bool {
        true
    }
}

/// Builds the outbound request for one proxied call.
fn outbound(
    request: &Request,
    directive: &ProxyDirective,
    options: &ProxyOptions,
) -> Result<OutboundRequest, ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidTarget {
        target: directive.target.clone(),
        reason,
    };
    let url = Url::parse(&directive.target).map_err(|e| invalid(e.to_string()))?;
    let uri: Uri = url.as_str().parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;

    let method = if request.method().is_empty() {
        Method::GET
    } else {
        Method::from_bytes(request.method().as_bytes())
            .map_err(|_| ProxyError::InvalidMethod(request.method().to_owned()))?
    };

    // Configured headers replace inbound ones regardless of case.
    let mut headers: Headers = request.headers().iter()
        .filter(|(name, _)| !RECOMPUTED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)))
        .filter(|(name, _)| !options.headers.keys().any(|k| name.eq_ignore_ascii_case(k)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    headers.extend(options.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

    let body = request.payload()
        .filter(|body| !body.is_empty())
        .map(|body| match &options.transform_request {
            Some(transform) => transform(body),
            None => body.to_bytes(),
        });

    Ok(OutboundRequest { method, uri, headers, body })
}

/// A handler that forwards every request it receives to `target`.
///
/// Relative targets are resolved against the pipeline's
/// [`base_url`](crate::config::PipelineConfig::base_url), and the pipeline's
/// timeout applies to each attempt. Needs a [`Proxy`] stage on the pipeline.
pub fn forward(target: &str) -> impl Handler + use<> {
    let target = target.to_owned();
    move |mut ctx: Context| {
        let resolved = ctx.config().resolve_target(&target);
        let options = ProxyOverrides::default().timeout(ctx.config().timeout());
        async move {
            ctx.set_proxy(ProxyDirective::new(resolved).with_options(options));
            ctx
        }
    }
}
