//! Response payload shapes and their wire representation.
//!
//! A [`Payload`] is what a terminal send method carries: nothing, text,
//! raw bytes, or a structured JSON value. The shape alone decides the
//! content type; there is no runtime sniffing and no default.

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;

/// A response body, tagged by shape.
///
/// | Shape | Content type |
/// |---|---|
/// | `Empty` | none |
/// | `Text` | `text/plain; charset=utf-8` |
/// | `Bytes` | `application/octet-stream` |
/// | `Json` | `application/json` |
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Empty,
    Text(String),
    Bytes(Bytes),
    Json(serde_json::Value),
}

impl Payload {
    /// Builds a structured payload from any serializable value.
    ///
    /// ```rust
    /// # use canter::Payload;
    /// # use serde::Serialize;
    /// #[derive(Serialize)]
    /// struct Horse { name: &'static str, legs: u8 }
    ///
    /// let payload = Payload::json(&Horse { name: "Cookiecharm", legs: 4 })?;
    /// # Ok::<(), canter::Error>(())
    /// ```
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub(crate) fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty    => None,
            Self::Text(_)  => Some("text/plain; charset=utf-8"),
            Self::Bytes(_) => Some("application/octet-stream"),
            Self::Json(_)  => Some("application/json"),
        }
    }

    pub(crate) fn into_body(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Text(s) => Bytes::from(s),
            Self::Bytes(b) => b,
            // A `Value` is always string-keyed, so serializing it cannot fail.
            Self::Json(v) => Bytes::from(serde_json::to_vec(&v).unwrap_or_default()),
        }
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}
