//! Outgoing response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in a handler or middleware and hand it back. The
//! host layer turns it into wire bytes (see [`host::into_http`](crate::host::into_http)).

use http::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};

use crate::body::Body;
use crate::request::Headers;

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing response: `{status, headers, body}`.
///
/// # Shortcuts (200 OK, no custom headers)
///
/// ```rust
/// use relais::Response;
/// use http::StatusCode;
/// use serde_json::json;
///
/// Response::json(json!({"message": "hi"}));
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use relais::Response;
/// use http::StatusCode;
/// use serde_json::json;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(json!({"id": 42}));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: Headers,
    pub(crate) body: Body,
}

impl Response {
    /// `200 OK` with a JSON body.
    pub fn json(body: Value) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with a plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Headers::new(), status: StatusCode::OK }
    }

    /// Structured failure: `{"error": message}`.
    pub fn error(code: StatusCode, message: &str) -> Self {
        Self::builder().status(code).json(json!({ "error": message }))
    }

    /// `404 {"error": "Route not found"}`.
    pub fn not_found() -> Self {
        Self::error(StatusCode::NOT_FOUND, "Route not found")
    }

    pub(crate) fn from_parts(status: StatusCode, headers: Headers, body: Body) -> Self {
        Self { status, headers, body }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &Headers { &self.headers }
    pub fn body(&self) -> &Body { &self.body }
    pub fn into_body(self) -> Body { self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. Terminated by a
/// typed body method.
pub struct ResponseBuilder {
    headers: Headers,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json(self, body: Value) -> Response {
        self.body(Body::Json(body))
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.body(Body::Text(body.into()))
    }

    pub fn body(self, body: impl Into<Body>) -> Response {
        Response { status: self.status, headers: self.headers, body: body.into() }
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        self.body(Body::Empty)
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into a [`Response`].
///
/// Implement it on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NO_CONTENT`.
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl IntoResponse for (StatusCode, Value) {
    fn into_response(self) -> Response {
        Response::builder().status(self.0).json(self.1)
    }
}

/// Typed JSON body.
///
/// ```rust
/// use relais::{Context, Json};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct User { id: u64, name: String }
///
/// async fn get_user(_ctx: Context) -> Json<User> {
///     Json(User { id: 1, name: "alice".into() })
/// }
/// ```
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_value(&self.0) {
            Ok(value) => Response::json(value),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise response body");
                Response::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}
