//! Error types.
//!
//! Application-level outcomes (404, 429, a proxy that gave up) are expressed
//! as [`Response`](crate::Response) values, not as errors. The types here
//! surface the failures underneath them: a bad settings file, a transport
//! that could not reach the upstream, a proxy directive that cannot be sent.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Crate-level error returned by fallible configuration operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid settings: {0}")]
    Config(#[from] toml::de::Error),
}

/// A single outbound attempt failed before a response was read.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("invalid outbound request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("{0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read upstream body: {0}")]
    Body(#[from] hyper::Error),

    /// Failures reported by custom [`Transport`](crate::client::Transport)s.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// The error message followed by its chain of sources, `": "`-joined.
    ///
    /// hyper's client errors print only their kind (`client error (Connect)`);
    /// the cause worth showing to a caller lives further down the chain.
    pub fn describe(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.ends_with(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        message
    }
}

/// A proxy directive could not be turned into an upstream response.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid request method `{0}`")]
    InvalidMethod(String),

    #[error("upstream unreachable after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },
}

impl ProxyError {
    /// Message carried in the `message` field of the 500 failure body.
    ///
    /// For exhausted retries this is the last transport error, so callers see
    /// the cause of the final attempt rather than a summary.
    pub fn message(&self) -> String {
        match self {
            Self::Exhausted { last, .. } => last.describe(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_is_the_last_transport_error() {
        let err = ProxyError::Exhausted {
            attempts: 3,
            last: TransportError::Other("connection refused".into()),
        };
        assert_eq!(err.message(), "connection refused");
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn timeout_reports_milliseconds() {
        let err = TransportError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "request timed out after 250ms");
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err: Error = toml::from_str::<toml::Value>("= nope").unwrap_err().into();
        assert!(err.to_string().starts_with("invalid settings"));
    }
}
