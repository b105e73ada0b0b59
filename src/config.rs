//! Settings.
//!
//! Every component is configured programmatically through its own builder
//! methods. [`Settings`] is the optional file-backed form of the same knobs,
//! for hosts that keep them in TOML:
//!
//! ```toml
//! [pipeline]
//! base_url   = "http://backend.internal:8080"
//! timeout_ms = 5000
//!
//! [rate_limit]
//! window_ms    = 60000
//! max_requests = 100
//!
//! [proxy]
//! timeout_ms     = 10000
//! retries        = 3
//! retry_delay_ms = 1000
//! headers        = { "x-forwarded-by" = "relais" }
//! ```
//!
//! Missing sections and keys take the defaults shown above (`base_url` is
//! unset by default, and `timeout_ms` under `[pipeline]` defaults to 30000).

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Error;

/// All settings, one section per component.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub rate_limit: RateLimitSettings,
    pub proxy: ProxySettings,
}

impl Settings {
    pub fn from_toml(source: &str) -> Result<Self, Error> {
        Ok(toml::from_str(source)?)
    }
}

/// Static configuration shared by every request of a pipeline.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base for relative proxy targets given to
    /// [`forward`](crate::middleware::proxy::forward).
    pub base_url: Option<String>,
    /// Per-attempt upstream timeout used by
    /// [`forward`](crate::middleware::proxy::forward).
    pub timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { base_url: None, timeout_ms: 30_000 }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Resolves `target` against [`base_url`](Self::base_url).
    ///
    /// Absolute targets, and every target when no base is configured, are
    /// returned unchanged; an unusable base is ignored with a warning.
    pub fn resolve_target(&self, target: &str) -> String {
        let Some(base) = self.base_url.as_deref() else {
            return target.to_owned();
        };
        if Url::parse(target).is_ok() {
            return target.to_owned();
        }
        match Url::parse(base).and_then(|base| base.join(target)) {
            Ok(url) => url.into(),
            Err(e) => {
                tracing::warn!(base, target, error = %e, "cannot resolve proxy target against base_url");
                target.to_owned()
            }
        }
    }
}

/// Knobs of the [`RateLimiter`](crate::middleware::rate_limit::RateLimiter).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { window_ms: 60_000, max_requests: 100 }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Defaults of the [`Proxy`](crate::middleware::proxy::Proxy) stage.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub headers: HashMap<String, String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 3,
            retry_delay_ms: 1_000,
            headers: HashMap::new(),
        }
    }
}
