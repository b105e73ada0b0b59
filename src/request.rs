//! Incoming request type.

use std::collections::HashMap;

use serde_json::Value;

use crate::body::Body;
use crate::client::ProxyDirective;

/// Header map. Keys are kept exactly as supplied.
pub type Headers = HashMap<String, String>;

/// An already-parsed inbound request.
///
/// Built by the host layer (see [`host::from_http`](crate::host::from_http))
/// or directly in tests:
///
/// ```rust
/// use relais::Request;
/// use serde_json::json;
///
/// let req = Request::new("POST", "/users")
///     .header("content-type", "application/json")
///     .json(json!({"name": "alice"}))
///     .client_id("10.0.0.7");
/// assert_eq!(req.header_value("Content-Type"), Some("application/json"));
/// ```
///
/// Once inside the pipeline a request is read-only, apart from the proxy
/// directive a handler may attach through
/// [`Context::set_proxy`](crate::Context::set_proxy).
#[derive(Debug, Default)]
pub struct Request {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) headers: Headers,
    pub(crate) body: Option<Body>,
    pub(crate) query: Option<HashMap<String, String>>,
    pub(crate) client_id: Option<String>,
    pub(crate) proxy: Option<ProxyDirective>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json(self, value: Value) -> Self {
        self.body(Body::Json(value))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn method(&self) -> &str { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &Headers { &self.headers }
    pub fn payload(&self) -> Option<&Body> { self.body.as_ref() }
    pub fn query_map(&self) -> Option<&HashMap<String, String>> { self.query.as_ref() }
    pub fn client(&self) -> Option<&str> { self.client_id.as_deref() }
    pub fn proxy(&self) -> Option<&ProxyDirective> { self.proxy.as_ref() }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Single query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_ref()?.get(name).map(String::as_str)
    }
}
