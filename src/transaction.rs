//! Per-request transaction: normalized request accessors plus the
//! terminal response builder.
//!
//! One [`Transaction`] exists per inbound request, created by the
//! transaction-construction step before any routing happens and shared
//! down the middleware chain behind an `Arc`. It is the only structure
//! mutated during live traffic, and it is owned by its request's task.
//!
//! The request side is read-only and fully materialized up front: the
//! body is collected into memory, query string and cookies are parsed
//! into maps. Route parameters are attached once the router has matched.
//! Values come back exactly as they appeared on the wire: no percent
//! decoding, no charset games.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError, Weak};

use bytes::Bytes;
use http::HeaderMap;
use http::Uri;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::Result;
use crate::hub::Hub;
use crate::send::Send;

/// What [`Transaction::params`] returns while no route has matched.
static NO_PARAMS: LazyLock<HashMap<String, String>> = LazyLock::new(HashMap::new);

/// Correlation summary for logs: who, where, which request.
#[derive(Clone, Debug)]
pub struct TransactionInfo {
    pub correlation_id: Uuid,
    pub url: String,
    pub ip_address: IpAddr,
}

/// The per-request context object.
pub struct Transaction {
    correlation_id: Uuid,
    method: http::Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: SocketAddr,
    body: Bytes,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    params: OnceLock<HashMap<String, String>>,
    user: Mutex<Option<serde_json::Value>>,
    send: Send,
}

impl Transaction {
    pub(crate) fn new(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: SocketAddr,
        on_end: Hub<Arc<Transaction>>,
    ) -> Arc<Self> {
        let query = parse_query(parts.uri.query().unwrap_or(""));
        let cookies = parse_cookies(&parts.headers);
        // The weak self-reference lets `Send` hand the finished transaction
        // to the end-of-transaction hub.
        Arc::new_cyclic(|weak: &Weak<Transaction>| Self {
            correlation_id: Uuid::new_v4(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            remote_addr,
            body,
            query,
            cookies,
            params: OnceLock::new(),
            user: Mutex::new(None),
            send: Send::new(on_end, weak.clone()),
        })
    }

    /// The terminal side: exactly one `send.*` call ends the request.
    pub fn send(&self) -> &Send {
        &self.send
    }

    /// Unique per-request token tying logs and lifecycle events together.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    /// Request path, without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Case-insensitive header lookup; `None` for absent or non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Route parameters captured by the matched URL pattern. Empty until
    /// the router has matched (and for not-found requests).
    pub fn params(&self) -> &HashMap<String, String> {
        // Must not initialize the cell: start subscribers read before
        // the router attaches the match.
        self.params.get().unwrap_or(&NO_PARAMS)
    }

    /// A single route parameter: `/horses/{horseId}` matched against
    /// `/horses/7` yields `param("horseId") == Some("7")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params().get(key).map(String::as_str)
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Stages a `Set-Cookie` header on the pending response.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadySent`](crate::Error::AlreadySent) once a terminal
    /// method has run; headers cannot chase a finished response.
    pub fn set_cookie(&self, name: &str, value: &str) -> Result<()> {
        self.send.push_header("set-cookie", &format!("{name}={value}"))
    }

    /// The authenticated-user payload, if some middleware attached one.
    pub fn user(&self) -> Option<serde_json::Value> {
        self.lock_user().clone()
    }

    /// Attaches the authenticated-user payload. Typically called by the
    /// authentication middleware; later calls overwrite.
    pub fn set_user(&self, user: serde_json::Value) {
        *self.lock_user() = Some(user);
    }

    /// Correlation id, original URL, and client address in one bundle.
    pub fn request_info(&self) -> TransactionInfo {
        TransactionInfo {
            correlation_id: self.correlation_id,
            url: self.uri.to_string(),
            ip_address: self.remote_addr.ip(),
        }
    }

    pub(crate) fn attach_params(&self, params: HashMap<String, String>) {
        // At most one route match per request; a second set is a bug in
        // the dispatch loop, not something to surface to handlers.
        let _ = self.params.set(params);
    }

    pub(crate) fn take_envelope(&self) -> Option<crate::send::Envelope> {
        self.send.take_envelope()
    }

    fn lock_user(&self) -> std::sync::MutexGuard<'_, Option<serde_json::Value>> {
        self.user.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("correlation_id", &self.correlation_id)
            .field("method", &self.method)
            .field("path", &self.uri.path())
            .finish_non_exhaustive()
    }
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for header in headers.get_all(http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.insert(name.to_owned(), value.to_owned());
            }
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn transaction(uri: &str, extra: &[(&str, &str)]) -> (Arc<Transaction>, Hub<Arc<Transaction>>) {
        let mut builder = http::Request::builder().method(http::Method::GET).uri(uri);
        for (name, value) in extra {
            builder = builder.header(*name, *value);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        let on_end = Hub::new();
        let txn = Transaction::new(
            parts,
            Bytes::from_static(b"{\"name\":\"Cookiecharm\"}"),
            "127.0.0.1:4000".parse().unwrap(),
            on_end.clone(),
        );
        (txn, on_end)
    }

    #[test]
    fn parses_query_pairs_and_bare_flags() {
        let (txn, _) = transaction("/horses?color=brown&fast", &[]);
        assert_eq!(txn.query_param("color"), Some("brown"));
        assert_eq!(txn.query_param("fast"), Some(""));
        assert_eq!(txn.query_param("missing"), None);
    }

    #[test]
    fn parses_cookie_header() {
        let (txn, _) = transaction("/horses", &[("cookie", "session=abc; theme=dark")]);
        assert_eq!(txn.cookie("session"), Some("abc"));
        assert_eq!(txn.cookie("theme"), Some("dark"));
    }

    #[test]
    fn params_are_empty_until_attached() {
        let (txn, _) = transaction("/horses/7", &[]);
        assert!(txn.params().is_empty());

        txn.attach_params(HashMap::from([("horseId".to_owned(), "7".to_owned())]));
        assert_eq!(txn.param("horseId"), Some("7"));
    }

    #[test]
    fn body_json_deserializes() {
        #[derive(serde::Deserialize)]
        struct Named { name: String }

        let (txn, _) = transaction("/horses", &[]);
        let named: Named = txn.body_json().unwrap();
        assert_eq!(named.name, "Cookiecharm");
    }

    #[test]
    fn first_send_wins_and_fires_end_exactly_once() {
        let (txn, on_end) = transaction("/horses", &[]);
        let ends = Arc::new(Mutex::new(0));
        let ends2 = Arc::clone(&ends);
        on_end.subscribe(Arc::new(move |_txn: Arc<Transaction>| {
            *ends2.lock().unwrap() += 1;
        }));

        txn.send().ok(json!({"a": 1})).unwrap();
        assert!(matches!(txn.send().not_found(), Err(Error::AlreadySent)));
        assert_eq!(*ends.lock().unwrap(), 1);

        let envelope = txn.take_envelope().expect("envelope");
        assert_eq!(u16::from(envelope.status), 200);
    }

    #[test]
    fn never_sending_never_fires_end() {
        let (txn, on_end) = transaction("/horses", &[]);
        let ends = Arc::new(Mutex::new(0));
        let ends2 = Arc::clone(&ends);
        on_end.subscribe(Arc::new(move |_txn: Arc<Transaction>| {
            *ends2.lock().unwrap() += 1;
        }));

        assert!(txn.take_envelope().is_none());
        assert_eq!(*ends.lock().unwrap(), 0);
    }

    #[test]
    fn cookies_ride_along_until_send_then_refuse() {
        let (txn, _) = transaction("/horses", &[]);
        txn.set_cookie("session", "abc").unwrap();
        txn.send().no_content().unwrap();
        assert!(matches!(txn.set_cookie("late", "x"), Err(Error::AlreadySent)));

        let envelope = txn.take_envelope().expect("envelope");
        assert_eq!(
            envelope.headers,
            vec![("set-cookie".to_owned(), "session=abc".to_owned())]
        );
    }

    #[test]
    fn end_subscribers_see_the_finished_transaction() {
        let (txn, on_end) = transaction("/horses?x=1", &[]);
        let observed = Arc::new(Mutex::new(None));
        let observed2 = Arc::clone(&observed);
        on_end.subscribe(Arc::new(move |finished: Arc<Transaction>| {
            assert!(finished.send().is_sent());
            *observed2.lock().unwrap() = Some(finished.correlation_id());
        }));

        txn.send().ok(()).unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(txn.correlation_id()));
    }

    #[test]
    fn user_payload_round_trips() {
        let (txn, _) = transaction("/horses", &[]);
        assert!(txn.user().is_none());
        txn.set_user(json!({"sub": "rider-1"}));
        assert_eq!(txn.user(), Some(json!({"sub": "rider-1"})));
    }

    #[test]
    fn request_info_carries_correlation_url_and_ip() {
        let (txn, _) = transaction("/horses?x=1", &[]);
        let info = txn.request_info();
        assert_eq!(info.correlation_id, txn.correlation_id());
        assert_eq!(info.url, "/horses?x=1");
        assert_eq!(info.ip_address, "127.0.0.1".parse::<IpAddr>().unwrap());
    }
}
