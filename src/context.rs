//! Per-request context threaded through the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use http::Extensions;
use serde_json::Value;

use crate::client::ProxyDirective;
use crate::config::PipelineConfig;
use crate::middleware::logger::Logger;
use crate::middleware::rate_limit::RateLimitInfo;
use crate::request::Request;
use crate::response::Response;

/// Route parameters bound from `{name}` segments.
pub type Params = HashMap<String, String>;

/// State for one request, from pipeline entry until its response is returned.
///
/// Stages receive the context by value and hand it back, so at any moment
/// exactly one stage owns it; it never crosses into another request.
///
/// The response slot is write-once. The first [`respond`](Context::respond)
/// wins; a second write is a programming error that panics in debug builds
/// and is logged and discarded in release builds.
///
/// A handler answers through its return value. A response it writes with
/// `respond` only counts if it also returns the context; writing one and
/// then returning something else is treated like a second write.
pub struct Context {
    request: Request,
    response: Option<Response>,
    state: State,
    pub(crate) params: Params,
    config: Arc<PipelineConfig>,
    /// Set while a route handler owns the context.
    pub(crate) in_handler: bool,
}

impl Context {
    pub fn new(request: Request, config: Arc<PipelineConfig>) -> Self {
        Self {
            request,
            response: None,
            state: State::default(),
            params: Params::new(),
            config,
            in_handler: false,
        }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn config(&self) -> &PipelineConfig { &self.config }
    pub fn params(&self) -> &Params { &self.params }
    pub fn state(&self) -> &State { &self.state }
    pub fn state_mut(&mut self) -> &mut State { &mut self.state }

    /// A bound route parameter: `/users/{id}` on `/users/42` gives `param("id") == Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Asks the proxy stage to forward this request upstream.
    pub fn set_proxy(&mut self, directive: ProxyDirective) {
        self.request.proxy = Some(directive);
    }

    pub fn response(&self) -> Option<&Response> { self.response.as_ref() }

    pub fn has_response(&self) -> bool { self.response.is_some() }

    /// Sets the response, halting the middleware chain.
    ///
    /// # Panics
    ///
    /// In debug builds, if a response has already been set.
    pub fn respond(&mut self, response: Response) {
        if let Some(existing) = &self.response {
            if cfg!(debug_assertions) {
                panic!(
                    "response already set for {} {} (status {}); a stage wrote a second response",
                    self.request.method, self.request.path, existing.status,
                );
            }
            tracing::error!(
                method = %self.request.method,
                path = %self.request.path,
                kept = %existing.status,
                discarded = %response.status,
                "second response write discarded",
            );
            return;
        }
        self.response = Some(response);
    }

    /// Consumes the context, yielding its response if one was set.
    pub fn into_response(mut self) -> Option<Response> {
        self.response.take()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let Some(orphan) = &self.response else { return };
        if !self.in_handler || std::thread::panicking() {
            return;
        }
        if cfg!(debug_assertions) {
            panic!(
                "handler for {} {} wrote a response (status {}) and then discarded its context",
                self.request.method, self.request.path, orphan.status,
            );
        }
        tracing::error!(
            method = %self.request.method,
            path = %self.request.path,
            discarded = %orphan.status,
            "response written by handler was discarded",
        );
    }
}

/// Inter-stage communication.
///
/// Well-known data has a typed slot. Anything else goes into the
/// [`Extensions`] side channel, keyed by type.
#[derive(Default)]
pub struct State {
    rate_limit: Option<RateLimitInfo>,
    validated: Option<Value>,
    logger: Option<Logger>,
    extensions: Extensions,
}

impl State {
    /// Rate-limit metadata written by the [`RateLimiter`](crate::middleware::rate_limit::RateLimiter).
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> { self.rate_limit.as_ref() }

    pub fn set_rate_limit(&mut self, info: RateLimitInfo) {
        self.rate_limit = Some(info);
    }

    /// The request payload as accepted by a validating stage.
    pub fn validated(&self) -> Option<&Value> { self.validated.as_ref() }

    pub fn set_validated(&mut self, payload: Value) {
        self.validated = Some(payload);
    }

    /// The access logger this request passed through, for handler-level records.
    pub fn logger(&self) -> Option<&Logger> { self.logger.as_ref() }

    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }
}
