//! The request pipeline.
//!
//! One request moves through these states:
//!
//! ```text
//! Initialized ──► Middlewares-Running ──┬──► Short-Circuited ──┐
//!                                       └──► Routing ──────────┴──► Completed
//! ```
//!
//! Middlewares run one at a time, in registration order, each awaited before
//! the next. The first one to set a response ends the chain and the router is
//! never consulted. Otherwise the path is resolved and its handler produces
//! the response, or hands the context back to be forwarded upstream.

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::context::Context;
use crate::handler::{ErasedHandler, Handler, Reply};
use crate::middleware::{Completion, Middleware};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// Ordered middlewares in front of a [`Router`].
///
/// Configure it with `&mut self` methods (or the chaining forms), then share
/// it, typically as `Arc<Pipeline>`. [`handle`](Pipeline::handle) takes
/// `&self`, so configuration cannot change under in-flight requests.
///
/// ```rust
/// use relais::{Context, Pipeline, Request, Response};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pipeline = Pipeline::new()
///     .route("/hello", |_ctx: Context| async { Response::json(json!({"message": "hi"})) });
///
/// let resp = pipeline.handle(Request::new("GET", "/hello")).await;
/// assert_eq!(resp.status_code(), 200);
/// # }
/// ```
///
/// A panicking middleware or handler unwinds through `handle`; hosts that
/// must always answer should go through
/// [`host::handle_guarded`](crate::host::handle_guarded).
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    middlewares: Vec<Box<dyn Middleware>>,
    router: Router,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            middlewares: Vec::new(),
            router: Router::new(),
        }
    }

    /// Replaces the route table wholesale.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Appends a middleware. Returns `self` for chaining.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.add_middleware(middleware);
        self
    }

    /// Registers a route. Returns `self` for chaining.
    pub fn route(mut self, path: &str, handler: impl Handler) -> Self {
        self.add_route(path, handler);
        self
    }

    pub fn add_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// See [`Router::add`]: last registration for a path wins, `*` is the fallback.
    pub fn add_route(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.router.add(path, handler);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs `request` through the middlewares and, unless one answered, the router.
    pub async fn handle(&self, request: Request) -> Response {
        let span = tracing::debug_span!("request", method = %request.method, path = %request.path);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: Request) -> Response {
        let started = Instant::now();
        let method = request.method.clone();
        let path = request.path.clone();

        let mut ctx = Context::new(request, Arc::clone(&self.config));
        let mut ran = 0;
        let mut short_circuited = false;
        for middleware in &self.middlewares {
            ctx = middleware.process(ctx).await;
            ran += 1;
            if ctx.has_response() {
                tracing::debug!(stage = ran, "middleware answered, skipping the rest");
                short_circuited = true;
                break;
            }
        }

        let response = if short_circuited {
            ctx.into_response().unwrap_or_else(no_response)
        } else {
            self.dispatch(ctx).await
        };

        let completion = Completion {
            method: &method,
            path: &path,
            status: response.status,
            elapsed: started.elapsed(),
        };
        for middleware in self.middlewares[..ran].iter().rev() {
            middleware.finish(&completion);
        }
        response
    }

    async fn dispatch(&self, mut ctx: Context) -> Response {
        let Some(route) = self.router.resolve(ctx.request().path()) else {
            tracing::debug!("no route matched");
            return Response::not_found();
        };
        ctx.params = route.params;
        ctx.in_handler = true;

        match route.handler.call(ctx).await {
            Reply::Respond(response) => response,
            Reply::Forward(mut ctx) => {
                ctx.in_handler = false;
                self.forward(ctx).await
            }
        }
    }

    /// Runs the forwarding stages over a context a handler handed back.
    async fn forward(&self, mut ctx: Context) -> Response {
        for middleware in self.middlewares.iter().filter(|m| m.forwards()) {
            if ctx.has_response() {
                break;
            }
            ctx = middleware.process(ctx).await;
        }
        ctx.into_response().unwrap_or_else(no_response)
    }
}

impl Default for Pipeline {
    fn default() -> Self { Self::new() }
}

fn no_response() -> Response {
    tracing::error!("handler returned its context but no stage produced a response");
    Response::error(StatusCode::INTERNAL_SERVER_ERROR, "No response produced")
}
