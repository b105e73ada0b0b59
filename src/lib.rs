//! # relais
//!
//! A minimal HTTP request pipeline: ordered middleware, a path router, a
//! fixed-window rate limiter and a retrying upstream proxy.
//!
//! ## The contract
//!
//! The host owns sockets, TLS and wire parsing. relais takes an
//! already-parsed [`Request`] and returns a [`Response`]. Everything in
//! between is:
//!
//! - **Middleware chain**: stages run in registration order; the first one
//!   to set a response ends the chain
//! - **Routing**: exact paths, `{name}` segments, one `*` fallback; misses
//!   are `404 {"error": "Route not found"}`
//! - **Rate limiting**: fixed windows per key, `429` with `Retry-After`
//! - **Proxying**: handlers attach a directive; the proxy stage forwards it
//!   with bounded retries and a per-attempt timeout
//!
//! ## Quick start
//!
//! ```rust
//! use std::time::Duration;
//! use relais::{Context, Pipeline, Request, Response};
//! use relais::middleware::{logger::Logger, proxy::{self, Proxy}, rate_limit::RateLimiter};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = Pipeline::new()
//!     .with(Logger::new())
//!     .with(RateLimiter::new(100, Duration::from_secs(60)))
//!     .with(Proxy::new())
//!     .route("/hello", hello)
//!     .route("/api/posts", proxy::forward("http://backend.internal/posts"));
//!
//! let resp = pipeline.handle(Request::new("GET", "/hello").client_id("10.0.0.1")).await;
//! assert_eq!(resp.body().as_json(), Some(&json!({"message": "hi"})));
//! # }
//!
//! async fn hello(ctx: Context) -> Response {
//!     let remaining = ctx.state().rate_limit().map_or(0, |info| info.remaining);
//!     tracing::debug!(remaining, "hello");
//!     Response::json(json!({"message": "hi"}))
//! }
//! ```

mod body;
mod context;
mod error;
mod handler;
mod pipeline;
mod request;
mod response;
mod router;

pub mod client;
pub mod config;
pub mod host;
pub mod middleware;

pub use body::Body;
pub use context::{Context, Params, State};
pub use error::{Error, ProxyError, TransportError};
pub use handler::{Handler, IntoReply, Reply};
pub use middleware::Middleware;
pub use pipeline::Pipeline;
pub use request::{Headers, Request};
pub use response::{IntoResponse, Json, Response, ResponseBuilder};
pub use router::{Route, Router, WILDCARD};
