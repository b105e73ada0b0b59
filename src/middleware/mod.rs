//! Middleware layer.
//!
//! A middleware is an object with one capability: take the request
//! [`Context`], do something with it, hand it back. The
//! [`Pipeline`](crate::Pipeline) awaits each one in registration order and
//! stops as soon as a stage has set a response.
//!
//! Built-in stages:
//! - [`logger::Logger`]: access records via `tracing`, never responds
//! - [`rate_limit::RateLimiter`]: fixed-window limiting per key, responds 429
//! - [`proxy::Proxy`]: forwards requests carrying a proxy directive upstream
//!
//! Closures become middleware through [`from_fn`]:
//!
//! ```rust
//! use relais::{Context, Pipeline, middleware};
//!
//! let pipeline = Pipeline::new().with(middleware::from_fn(|ctx: Context| async move {
//!     tracing::debug!(path = ctx.request().path(), "seen");
//!     ctx
//! }));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use http::StatusCode;

use crate::context::Context;

pub mod logger;
pub mod proxy;
pub mod rate_limit;

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` because the runtime polls the future in place; `Send` so
/// tokio may move it across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One pipeline stage.
pub trait Middleware: Send + Sync + 'static {
    /// Inspects or mutates the context and returns it for the next stage.
    ///
    /// Setting a response with [`Context::respond`] ends the chain.
    fn process(&self, ctx: Context) -> BoxFuture<'_, Context>;

    /// Whether this stage also runs after a handler hands its context back
    /// unanswered (see [`Reply::Forward`](crate::Reply::Forward)).
    fn forwards(&self) -> bool {
        false
    }

    /// Called once the response is final, in reverse registration order, for
    /// every stage whose `process` ran.
    fn finish(&self, _completion: &Completion<'_>) {}
}

/// Summary of a finished request, passed to [`Middleware::finish`].
#[derive(Clone, Copy, Debug)]
pub struct Completion<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub status: StatusCode,
    pub elapsed: Duration,
}

/// Middleware built from an async closure. See [`from_fn`].
pub struct FromFn<F>(F);

/// Wraps `f` as a [`Middleware`].
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Context> + Send + 'static,
{
    FromFn(f)
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Context> + Send + 'static,
{
    fn process(&self, ctx: Context) -> BoxFuture<'_, Context> {
        Box::pin((self.0)(ctx))
    }
}
