//! Request and response payloads.

use bytes::Bytes;
use serde_json::Value;

/// A request or response payload.
///
/// Bodies arriving from the wire are classified once, by their declared
/// `content-type` (see [`Body::negotiate`]), and carried in that shape
/// through the pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl Body {
    /// Classifies raw bytes by their declared content type.
    ///
    /// | Declared type                     | Result                               |
    /// |-----------------------------------|--------------------------------------|
    /// | `application/json`, `*/*+json`    | [`Body::Json`], or bytes if invalid  |
    /// | `text/*`                          | [`Body::Text`] (lossy UTF-8)         |
    /// | anything else                     | [`Body::Bytes`]                      |
    /// | none                              | [`Body::Bytes`]                      |
    ///
    /// An empty payload is always [`Body::Empty`].
    pub fn negotiate(content_type: Option<&str>, raw: Bytes) -> Self {
        if raw.is_empty() {
            return Self::Empty;
        }
        let Some(essence) = content_type.map(mime_essence) else {
            return Self::Bytes(raw);
        };

        if essence == "application/json" || essence.ends_with("+json") {
            match serde_json::from_slice(&raw) {
                Ok(value) => Self::Json(value),
                Err(e) => {
                    tracing::debug!(error = %e, "declared JSON body does not parse, keeping raw bytes");
                    Self::Bytes(raw)
                }
            }
        } else if essence.starts_with("text/") {
            Self::Text(String::from_utf8_lossy(&raw).into_owned())
        } else {
            Self::Bytes(raw)
        }
    }

    /// Default wire serialisation.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            // Serialising a `Value` cannot fail: keys are always strings.
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Text(text) => Bytes::from(text.clone()),
            Self::Bytes(bytes) => bytes.clone(),
        }
    }

    /// The content type implied by the body's shape, if any.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Json(_) => Some("application/json"),
            Self::Text(_) => Some("text/plain; charset=utf-8"),
            Self::Bytes(_) => Some("application/octet-stream"),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self { Self::Json(value) }
}

impl From<String> for Body {
    fn from(text: String) -> Self { Self::Text(text) }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self { Self::Text(text.to_owned()) }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Self::Bytes(bytes) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Self::Bytes(Bytes::from(bytes)) }
}

/// `"Application/JSON; charset=utf-8"` → `"application/json"`.
fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
