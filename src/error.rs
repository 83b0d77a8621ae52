//! Unified error type.

use crate::method::Method;
use crate::server::Lifecycle;

/// Shorthand for results carrying the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by canter's fallible operations.
///
/// Declaration-time errors ([`DuplicateEndpoint`](Error::DuplicateEndpoint))
/// and startup errors ([`Unresolved`](Error::Unresolved),
/// [`InvalidRoute`](Error::InvalidRoute), [`Io`](Error::Io)) surface at boot.
/// Per-request errors returned by middleware or handlers, including
/// application failures wrapped in [`Handler`](Error::Handler), are funneled
/// to the configured error stage, which turns them into a terminal response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A declaration with the same `(method, url)` identity already exists.
    #[error("duplicate endpoint declared ({method} {url})")]
    DuplicateEndpoint { method: Method, url: String },

    /// The routing engine rejected a normalized URL at mount time.
    #[error("route `{url}` rejected by the routing engine: {source}")]
    InvalidRoute {
        url: String,
        #[source]
        source: matchit::InsertError,
    },

    /// No binding for the requested service in the container.
    #[error("no binding for `{service}` in the container")]
    Unresolved { service: &'static str },

    /// A terminal `send` method was called on an already-terminated
    /// transaction.
    #[error("transaction already terminated by an earlier terminal send")]
    AlreadySent,

    /// An operation was attempted in a lifecycle state that does not
    /// permit it.
    #[error("`{operation}` is not valid while the server is {state}")]
    Lifecycle {
        operation: &'static str,
        state: Lifecycle,
    },

    /// Payload serialization or deserialization failed.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// An application-level failure raised by a handler or middleware.
    #[error(transparent)]
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an application failure so it flows through the per-request
    /// error funnel.
    pub fn handler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Handler(err.into())
    }
}
