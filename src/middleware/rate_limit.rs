//! Fixed-window rate limiting.
//!
//! Each key owns a counter and the instant its window ends. A request is
//! admitted while the counter is below the limit; admission increments it.
//! When the window ends the record is replaced by a fresh one.
//!
//! ```rust
//! use std::time::Duration;
//! use relais::{Pipeline, middleware::rate_limit::RateLimiter};
//!
//! let limiter = RateLimiter::new(10, Duration::from_secs(60))
//!     .key_by(|ctx| ctx.request().header_value("x-api-key").unwrap_or("anonymous").to_owned());
//! let store = limiter.store().clone();   // keep a handle for admin resets
//!
//! let pipeline = Pipeline::new().with(limiter);
//! store.reset("some-key");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use http::StatusCode;
use serde_json::json;
use tokio::time::Instant;

use crate::config::RateLimitSettings;
use crate::context::Context;
use crate::middleware::{BoxFuture, Middleware};
use crate::request::Headers;
use crate::response::Response;

/// Key used when the key function has nothing better, e.g. no client id.
pub const DEFAULT_KEY: &str = "default";

// ── Store ─────────────────────────────────────────────────────────────────────

/// Snapshot of one key's record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_at: Instant,
}

/// Result of [`RateLimitStore::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Counted. `remaining` is what is left after this request.
    Admitted { remaining: u32, reset_at: Instant },
    /// Over the limit; nothing was counted.
    Limited { reset_at: Instant },
}

/// Per-key fixed-window counters.
///
/// One mutex guards the whole table, so every read-modify-write is
/// linearizable: two concurrent [`acquire`](Self::acquire)s for the last slot
/// of a window admit exactly one.
///
/// Expired records are swept lazily by whichever operation first runs after
/// the earliest window end; between sweeps nothing is scanned.
pub struct RateLimitStore {
    window: Duration,
    inner: Mutex<Table>,
}

#[derive(Default)]
struct Table {
    records: HashMap<String, RateLimitRecord>,
    /// Earliest `reset_at` among `records`.
    next_expiry: Option<Instant>,
}

impl Table {
    fn sweep(&mut self, now: Instant) {
        if !self.next_expiry.is_some_and(|at| now > at) {
            return;
        }
        let before = self.records.len();
        self.records.retain(|_, record| now <= record.reset_at);
        self.next_expiry = self.records.values().map(|r| r.reset_at).min();
        tracing::trace!(evicted = before - self.records.len(), "rate limit sweep");
    }

    /// The live record for `key`, created fresh if absent or expired.
    fn live(&mut self, key: &str, now: Instant, window: Duration) -> &mut RateLimitRecord {
        self.sweep(now);
        // After the sweep every stored record satisfies `now <= reset_at`.
        let reset_at = now + window;
        if !self.records.contains_key(key) {
            self.next_expiry = Some(self.next_expiry.map_or(reset_at, |at| at.min(reset_at)));
        }
        self.records
            .entry(key.to_owned())
            .or_insert(RateLimitRecord { count: 0, reset_at })
    }
}

impl RateLimitStore {
    pub fn new(window: Duration) -> Self {
        Self { window, inner: Mutex::new(Table::default()) }
    }

    pub fn window(&self) -> Duration { self.window }

    /// Checks `key` against `max_requests` and counts the request if it fits.
    pub fn acquire(&self, key: &str, max_requests: u32) -> Admission {
        let now = Instant::now();
        let mut table = self.lock();
        let record = table.live(key, now, self.window);
        if record.count >= max_requests {
            return Admission::Limited { reset_at: record.reset_at };
        }
        record.count += 1;
        Admission::Admitted {
            remaining: max_requests - record.count,
            reset_at: record.reset_at,
        }
    }

    /// The current record for `key`, starting a window if there is none.
    pub fn info(&self, key: &str) -> RateLimitRecord {
        let now = Instant::now();
        *self.lock().live(key, now, self.window)
    }

    /// Counts one request for `key` unconditionally.
    pub fn increment(&self, key: &str) -> RateLimitRecord {
        let now = Instant::now();
        let mut table = self.lock();
        let record = table.live(key, now, self.window);
        record.count = record.count.saturating_add(1);
        *record
    }

    /// Forgets `key`; its next request starts a fresh window.
    pub fn reset(&self, key: &str) {
        let mut table = self.lock();
        table.records.remove(key);
        if table.records.is_empty() {
            table.next_expiry = None;
        }
    }

    /// Forgets every key.
    pub fn clear(&self) {
        let mut table = self.lock();
        table.records.clear();
        table.next_expiry = None;
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut table = self.lock();
        table.sweep(now);
        table.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the lock cannot leave a record half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Context state ─────────────────────────────────────────────────────────────

/// Rate-limit metadata left in [`State`](crate::context::State) for later stages.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub reset_in: Duration,
}

impl RateLimitInfo {
    fn new(limit: u32, remaining: u32, reset_at: Instant) -> Self {
        let reset_in = reset_at.saturating_duration_since(Instant::now());
        let reset_time = chrono::Duration::from_std(reset_in)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or_else(Utc::now);
        Self { limit, remaining, reset_time, reset_in }
    }

    /// `X-RateLimit-Reset` value: ISO-8601 with milliseconds, UTC.
    pub fn reset_header(&self) -> String {
        self.reset_time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// `Retry-After` value: whole seconds, rounded up, at least one.
    pub fn retry_after(&self) -> u64 {
        let secs = self.reset_in.as_secs() + u64::from(self.reset_in.subsec_nanos() > 0);
        secs.max(1)
    }

    /// The `X-RateLimit-*` headers describing this state.
    pub fn headers(&self) -> Headers {
        Headers::from([
            ("X-RateLimit-Limit".to_owned(), self.limit.to_string()),
            ("X-RateLimit-Remaining".to_owned(), self.remaining.to_string()),
            ("X-RateLimit-Reset".to_owned(), self.reset_header()),
        ])
    }

    /// Adds [`headers`](Self::headers) to a response. Not done automatically.
    pub fn apply(&self, response: &mut Response) {
        for (name, value) in self.headers() {
            response.insert_header(name, value);
        }
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

type KeyFn = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// Pipeline stage enforcing a fixed-window limit.
///
/// Over-limit requests get `429 Too Many Requests` with `X-RateLimit-*` and
/// `Retry-After` headers and `{"error": "Too many requests", "retryAfter": n}`.
/// Admitted requests continue with a [`RateLimitInfo`] in the context state.
pub struct RateLimiter {
    store: Arc<RateLimitStore>,
    max_requests: u32,
    key: KeyFn,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            store: Arc::new(RateLimitStore::new(window)),
            max_requests,
            key: Arc::new(default_key),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(settings.max_requests, settings.window())
    }

    /// Replaces the key function. The default keys by client id.
    pub fn key_by<F>(mut self, key: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.key = Arc::new(key);
        self
    }

    /// The counters behind this stage, for administrative resets.
    pub fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    fn limited(&self, key: &str, info: &RateLimitInfo) -> Response {
        let retry_after = info.retry_after();
        tracing::warn!(key, limit = self.max_requests, retry_after, "rate limit exceeded");
        Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("X-RateLimit-Limit", self.max_requests.to_string())
            .header("X-RateLimit-Remaining", "0")
            .header("X-RateLimit-Reset", info.reset_header())
            .header("Retry-After", retry_after.to_string())
            .json(json!({
                "error": "Too many requests",
                "retryAfter": retry_after,
            }))
    }
}

impl Middleware for RateLimiter {
    fn process(&self, mut ctx: Context) -> BoxFuture<'_, Context> {
        Box::pin(async move {
            let key = (self.key)(&ctx);
            match self.store.acquire(&key, self.max_requests) {
                Admission::Admitted { remaining, reset_at } => {
                    let info = RateLimitInfo::new(self.max_requests, remaining, reset_at);
                    ctx.state_mut().set_rate_limit(info);
                }
                Admission::Limited { reset_at } => {
                    let info = RateLimitInfo::new(self.max_requests, 0, reset_at);
                    let response = self.limited(&key, &info);
                    ctx.state_mut().set_rate_limit(info);
                    ctx.respond(response);
                }
            }
            ctx
        })
    }
}

fn default_key(ctx: &Context) -> String {
    ctx.request().client().unwrap_or(DEFAULT_KEY).to_owned()
}
