//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one table, so each one
//! is hidden behind a trait object (`dyn ErasedHandler`) with a common call
//! signature:
//!
//! ```text
//! async fn hello(ctx: Context) -> Response { … }   ← user writes this
//!        ↓ pipeline.add_route("/hello", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← stored as BoxedHandler
//!        ↓
//! handler.call(ctx)  at request time               ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(ctx).await.into_reply() })
//! ```
//!
//! # What a handler returns
//!
//! Anything implementing [`IntoReply`]: a [`Response`] (or any
//! [`IntoResponse`] type listed below), or the [`Context`] itself. Handing
//! the context back means "I have not answered; keep going", which is how a
//! handler asks for its request to be forwarded upstream after calling
//! [`Context::set_proxy`].

use std::future::Future;
use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;

use crate::context::Context;
use crate::middleware::BoxFuture;
use crate::response::{IntoResponse, Json, Response};

// ── Reply ─────────────────────────────────────────────────────────────────────

/// What a handler produced.
pub enum Reply {
    /// A final response.
    Respond(Response),
    /// The context, handed back for the forwarding stages.
    Forward(Context),
}

/// Conversion into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for Context {
    fn into_reply(self) -> Reply { Reply::Forward(self) }
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply { Reply::Respond(self) }
}

impl IntoReply for StatusCode {
    fn into_reply(self) -> Reply { Reply::Respond(self.into_response()) }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply { Reply::Respond(self.into_response()) }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply { Reply::Respond(self.into_response()) }
}

impl IntoReply for (StatusCode, Value) {
    fn into_reply(self) -> Reply { Reply::Respond(self.into_response()) }
}

impl<T: serde::Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Reply { Reply::Respond(self.into_response()) }
}

// ── Internal types ────────────────────────────────────────────────────────────

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Reply>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any `async fn` (or
/// closure returning a future) with the signature:
///
/// ```text
/// async fn name(ctx: Context) -> impl IntoReply
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Reply> {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.into_reply() })
    }
}
