//! Path router.
//!
//! Exact paths first, then `{name}` parameter and `{*rest}` catch-all routes
//! (via [`matchit`]), then a single wildcard fallback registered under `*`.
//! Methods are not part of the match: a handler sees every method sent to its
//! path and inspects [`Request::method`](crate::Request::method) itself.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::{InsertError, Router as MatchitRouter};

use crate::context::Params;
use crate::handler::{BoxedHandler, Handler};

/// Path of the fallback route.
pub const WILDCARD: &str = "*";

/// The route table.
///
/// Build it at startup, before traffic. Registering a path that already
/// exists replaces its handler; so does registering `*` twice.
pub struct Router {
    routes: HashMap<String, BoxedHandler>,
    tree: MatchitRouter<BoxedHandler>,
    fallback: Option<BoxedHandler>,
}

/// A resolved route: the handler to run and the parameters it bound.
pub struct Route {
    pub(crate) handler: BoxedHandler,
    pub(crate) params: Params,
}

impl Route {
    pub fn params(&self) -> &Params { &self.params }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            tree: MatchitRouter::new(),
            fallback: None,
        }
    }

    /// Register a handler for a path. Returns `self` for chaining.
    ///
    /// ```rust
    /// # use relais::{Context, Response, Router};
    /// # async fn get_user(_: Context) -> Response { Response::text("") }
    /// # async fn fallback(_: Context) -> Response { Response::text("") }
    /// Router::new()
    ///     .route("/users/{id}", get_user)
    ///     .route("*",           fallback);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the path conflicts with a registered one in a way matchit
    /// cannot disambiguate, e.g. `/users/{id}` next to `/users/{name}`.
    pub fn route(mut self, path: &str, handler: impl Handler) -> Self {
        self.add(path, handler);
        self
    }

    /// In-place form of [`route`](Router::route).
    pub fn add(&mut self, path: &str, handler: impl Handler) {
        let handler = handler.into_boxed_handler();
        if path == WILDCARD {
            self.fallback = Some(handler);
            return;
        }

        // matchit refuses to overwrite, so the tree is rebuilt from the
        // table. Registration happens once at startup; the cost is paid there.
        let previous = self.routes.insert(path.to_owned(), handler);
        match build_tree(&self.routes) {
            Ok(tree) => self.tree = tree,
            Err(e) => {
                match previous {
                    Some(h) => self.routes.insert(path.to_owned(), h),
                    None => self.routes.remove(path),
                };
                panic!("invalid route `{path}`: {e}");
            }
        }
    }

    /// Finds the handler for `path`, falling back to the wildcard.
    pub fn resolve(&self, path: &str) -> Option<Route> {
        if let Ok(matched) = self.tree.at(path) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Some(Route { handler: Arc::clone(matched.value), params });
        }
        self.fallback.as_ref().map(|handler| Route {
            handler: Arc::clone(handler),
            params: Params::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len() + usize::from(self.fallback.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

fn build_tree(
    routes: &HashMap<String, BoxedHandler>,
) -> Result<MatchitRouter<BoxedHandler>, InsertError> {
    let mut tree = MatchitRouter::new();
    for (path, handler) in routes {
        tree.insert(path.as_str(), Arc::clone(handler))?;
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::StatusCode;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::context::Context;
    use crate::handler::Reply;
    use crate::request::Request;
    use crate::response::Response;

    async fn call(router: &Router, path: &str) -> Option<(StatusCode, Params)> {
        let route = router.resolve(path)?;
        let params = route.params.clone();
        let ctx = Context::new(Request::new("GET", path), Arc::new(PipelineConfig::default()));
        match route.handler.call(ctx).await {
            Reply::Respond(resp) => Some((resp.status_code(), params)),
            Reply::Forward(_) => None,
        }
    }

    #[tokio::test]
    async fn exact_match_resolves() {
        let router = Router::new()
            .route("/a", |_ctx: Context| async { StatusCode::OK })
            .route("/b", |_ctx: Context| async { StatusCode::ACCEPTED });

        assert_eq!(call(&router, "/a").await.map(|r| r.0), Some(StatusCode::OK));
        assert_eq!(call(&router, "/b").await.map(|r| r.0), Some(StatusCode::ACCEPTED));
    }

    #[test]
    fn miss_without_wildcard_is_none() {
        let router = Router::new().route("/a", |_ctx: Context| async { StatusCode::OK });
        assert!(router.resolve("/missing").is_none());
        assert!(router.resolve("/a/b").is_none());
        assert!(router.resolve("/").is_none());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let router = Router::new()
            .route("/a", |_ctx: Context| async { StatusCode::OK })
            .route("/a", |_ctx: Context| async { StatusCode::CREATED });

        assert_eq!(router.len(), 1);
        assert_eq!(call(&router, "/a").await.map(|r| r.0), Some(StatusCode::CREATED));
    }

    #[tokio::test]
    async fn wildcard_is_the_fallback_and_is_replaceable() {
        let router = Router::new()
            .route("/a", |_ctx: Context| async { StatusCode::OK })
            .route(WILDCARD, |_ctx: Context| async { StatusCode::GONE })
            .route(WILDCARD, |_ctx: Context| async { StatusCode::IM_A_TEAPOT });

        assert_eq!(call(&router, "/a").await.map(|r| r.0), Some(StatusCode::OK));
        assert_eq!(call(&router, "/other").await.map(|r| r.0), Some(StatusCode::IM_A_TEAPOT));
    }

    #[tokio::test]
    async fn segment_parameters_are_bound() {
        let router = Router::new()
            .route("/users/{id}", |ctx: Context| async move {
                Response::text(ctx.param("id").unwrap_or_default().to_owned())
            })
            .route("/users/me", |_ctx: Context| async { StatusCode::ACCEPTED });

        let (status, params) = call(&router, "/users/42").await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        // Static segments take precedence over parameters.
        let (status, params) = call(&router, "/users/me").await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(params.is_empty());
    }

    #[test]
    fn colon_syntax_is_literal() {
        let router = Router::new().route("/user/:id", |_ctx: Context| async { StatusCode::OK });
        assert!(router.resolve("/user/42").is_none());
        assert!(router.resolve("/user/:id").is_some());
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_parameters_panic() {
        let _ = Router::new()
            .route("/users/{id}", |_ctx: Context| async { StatusCode::OK })
            .route("/users/{name}", |_ctx: Context| async { StatusCode::OK });
    }
}
