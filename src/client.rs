//! Retrying outbound HTTP client.
//!
//! One logical call = up to `retries` attempts against a [`Transport`], each
//! bounded by `timeout`, with `retry_delay` between attempts. Only transport
//! failures (connection errors, timeouts, unreadable bodies) are retried; any
//! HTTP status the upstream returns, 5xx included, is a successful call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::body::Body;
use crate::config::ProxySettings;
use crate::error::{ProxyError, TransportError};
use crate::middleware::BoxFuture;
use crate::request::Headers;

// ── Options ───────────────────────────────────────────────────────────────────

/// Rewrites an inbound body into outbound bytes.
pub type RequestTransform = Arc<dyn Fn(&Body) -> Bytes + Send + Sync>;

/// Rewrites a decoded upstream body.
pub type ResponseTransform = Arc<dyn Fn(Body) -> Body + Send + Sync>;

/// Fully resolved options for one proxied call.
#[derive(Clone)]
pub struct ProxyOptions {
    pub timeout: Duration,
    /// Total attempts, at least one.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Added to (and overriding) the inbound headers.
    pub headers: Headers,
    pub transform_request: Option<RequestTransform>,
    pub transform_response: Option<ResponseTransform>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self::from_settings(&ProxySettings::default())
    }
}

impl ProxyOptions {
    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.timeout_ms),
            retries: settings.retries.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            headers: settings.headers.clone(),
            transform_request: None,
            transform_response: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn transform_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&Body) -> Bytes + Send + Sync + 'static,
    {
        self.transform_request = Some(Arc::new(f));
        self
    }

    pub fn transform_response<F>(mut self, f: F) -> Self
    where
        F: Fn(Body) -> Body + Send + Sync + 'static,
    {
        self.transform_response = Some(Arc::new(f));
        self
    }

    /// These options with every field set in `overrides` replaced.
    pub fn merge(&self, overrides: &ProxyOverrides) -> Self {
        Self {
            timeout: overrides.timeout.unwrap_or(self.timeout),
            retries: overrides.retries.unwrap_or(self.retries).max(1),
            retry_delay: overrides.retry_delay.unwrap_or(self.retry_delay),
            headers: overrides.headers.clone().unwrap_or_else(|| self.headers.clone()),
            transform_request: overrides.transform_request.clone()
                .or_else(|| self.transform_request.clone()),
            transform_response: overrides.transform_response.clone()
                .or_else(|| self.transform_response.clone()),
        }
    }
}

impl fmt::Debug for ProxyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyOptions")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("headers", &self.headers)
            .field("transform_request", &self.transform_request.is_some())
            .field("transform_response", &self.transform_response.is_some())
            .finish()
    }
}

/// Per-call overrides carried by a [`ProxyDirective`]. Unset fields fall back
/// to the proxy stage's defaults.
#[derive(Clone, Default)]
pub struct ProxyOverrides {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    /// Replaces the default extra headers as a whole.
    pub headers: Option<Headers>,
    pub transform_request: Option<RequestTransform>,
    pub transform_response: Option<ResponseTransform>,
}

impl ProxyOverrides {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn transform_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&Body) -> Bytes + Send + Sync + 'static,
    {
        self.transform_request = Some(Arc::new(f));
        self
    }

    pub fn transform_response<F>(mut self, f: F) -> Self
    where
        F: Fn(Body) -> Body + Send + Sync + 'static,
    {
        self.transform_response = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ProxyOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyOverrides")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("headers", &self.headers)
            .field("transform_request", &self.transform_request.is_some())
            .field("transform_response", &self.transform_response.is_some())
            .finish()
    }
}

/// Instruction, attached to a request, to forward it to `target`.
#[derive(Clone, Debug)]
pub struct ProxyDirective {
    pub target: String,
    pub options: ProxyOverrides,
}

impl ProxyDirective {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into(), options: ProxyOverrides::default() }
    }

    pub fn with_options(mut self, options: ProxyOverrides) -> Self {
        self.options = options;
        self
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// One outbound request, ready to send.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

/// The upstream's answer, body fully read.
#[derive(Clone, Debug)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
}

impl OutboundResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one request. Implementations make a single attempt; retries and
/// timeouts belong to [`RetryingClient`].
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<OutboundResponse, TransportError>>;
}

/// Plain-HTTP/1 transport on hyper's pooled client.
///
/// `https` targets fail as transport errors: TLS is the host's concern.
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self { client: Client::builder(TokioExecutor::new()).build_http() }
    }
}

impl Default for HyperTransport {
    fn default() -> Self { Self::new() }
}

impl Transport for HyperTransport {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<OutboundResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = http::Request::builder()
                .method(request.method)
                .uri(request.uri);
            if let Some(headers) = builder.headers_mut() {
                for (name, value) in &request.headers {
                    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                        (Ok(name), Ok(value)) => {
                            headers.insert(name, value);
                        }
                        _ => tracing::warn!(header = %name, "dropping header that is not valid on the wire"),
                    }
                }
            }
            let outbound = builder.body(Full::new(request.body.unwrap_or_default()))?;

            let response = self.client.request(outbound).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();

            let headers = parts.headers.iter()
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
                })
                .collect();
            Ok(OutboundResponse { status: parts.status, headers, body })
        })
    }
}

// ── RetryingClient ────────────────────────────────────────────────────────────

/// Bounded-retry wrapper around a [`Transport`].
#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn Transport>,
}

impl RetryingClient {
    pub fn new(transport: impl Transport) -> Self {
        Self { transport: Arc::new(transport) }
    }

    /// Sends `request`, retrying transport failures.
    ///
    /// Makes at most `options.retries` attempts (at least one), each cut off
    /// after `options.timeout`, sleeping `options.retry_delay` between them.
    /// On exhaustion the error carries the last attempt's failure.
    pub async fn call(
        &self,
        request: OutboundRequest,
        options: &ProxyOptions,
    ) -> Result<OutboundResponse, ProxyError> {
        let attempts = options.retries.max(1);
        let mut attempt = 0;
        loop {
            let sent = tokio::time::timeout(options.timeout, self.transport.send(request.clone())).await;
            let failure = match sent {
                Ok(Ok(response)) => {
                    tracing::debug!(uri = %request.uri, status = %response.status, attempt, "upstream responded");
                    return Ok(response);
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(options.timeout),
            };

            attempt += 1;
            if attempt >= attempts {
                tracing::error!(uri = %request.uri, attempts, error = %failure, "upstream call failed, giving up");
                return Err(ProxyError::Exhausted { attempts, last: failure });
            }
            tracing::warn!(
                uri = %request.uri,
                attempt,
                delay = ?options.retry_delay,
                error = %failure,
                "upstream attempt failed, retrying",
            );
            if !options.retry_delay.is_zero() {
                tokio::time::sleep(options.retry_delay).await;
            }
        }
    }
}
