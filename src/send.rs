//! Response-envelope builder and the end-of-transaction signal.
//!
//! Every transaction owns exactly one [`Send`]. Each terminal method maps
//! a semantic outcome to a fixed status code, records the payload, and
//! fires the end-of-transaction hub, the single point where "this request
//! is done" is decided. A transaction may terminate at most once: the
//! second terminal call, from any stage, fails with
//! [`Error::AlreadySent`](crate::Error::AlreadySent) instead of silently
//! clobbering the first response.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::payload::Payload;
use crate::status::Status;
use crate::transaction::Transaction;

/// The frozen response: status, accumulated headers, payload.
///
/// Produced by the first terminal call, picked up exactly once by the
/// dispatch loop and bridged onto the wire.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) status: Status,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) payload: Payload,
}

struct SendState {
    /// Headers staged before termination (`Set-Cookie`, redirect target).
    headers: Vec<(String, String)>,
    /// The envelope, once a terminal method has run.
    envelope: Option<Envelope>,
    sent: bool,
}

/// The terminal side of a [`Transaction`].
///
/// Obtained via [`Transaction::send`]; all methods take `&self`, so a
/// handler holding the transaction behind an `Arc` can terminate it from
/// wherever the request logic ends up.
pub struct Send {
    state: Mutex<SendState>,
    on_end: Hub<Arc<Transaction>>,
    transaction: Weak<Transaction>,
}

impl Send {
    pub(crate) fn new(on_end: Hub<Arc<Transaction>>, transaction: Weak<Transaction>) -> Self {
        Self {
            state: Mutex::new(SendState {
                headers: Vec::new(),
                envelope: None,
                sent: false,
            }),
            on_end,
            transaction,
        }
    }

    /// `200 OK`. Pass `()` for an empty body.
    pub fn ok(&self, payload: impl Into<Payload>) -> Result<()> {
        self.complete(Status::Ok, payload.into(), None)
    }

    /// `201 Created`.
    pub fn created(&self, payload: impl Into<Payload>) -> Result<()> {
        self.complete(Status::Created, payload.into(), None)
    }

    /// `202 Accepted`.
    pub fn accepted(&self, payload: impl Into<Payload>) -> Result<()> {
        self.complete(Status::Accepted, payload.into(), None)
    }

    /// `204 No Content`. Never carries a body.
    pub fn no_content(&self) -> Result<()> {
        self.complete(Status::NoContent, Payload::Empty, None)
    }

    /// `206 Partial Content`.
    pub fn partial_content(&self, payload: impl Into<Payload>) -> Result<()> {
        self.complete(Status::PartialContent, payload.into(), None)
    }

    /// `301 Moved Permanently` with a `location` header.
    pub fn moved_permanently(&self, location: &str) -> Result<()> {
        self.complete(Status::MovedPermanently, Payload::Empty, Some(location))
    }

    /// `302 Found` with a `location` header.
    pub fn found(&self, location: &str) -> Result<()> {
        self.complete(Status::Found, Payload::Empty, Some(location))
    }

    /// `304 Not Modified`.
    pub fn not_modified(&self) -> Result<()> {
        self.complete(Status::NotModified, Payload::Empty, None)
    }

    /// `400 Bad Request`.
    pub fn bad_request(&self, payload: impl Into<Payload>) -> Result<()> {
        self.complete(Status::BadRequest, payload.into(), None)
    }

    /// `401 Unauthorized`.
    pub fn unauthorized(&self) -> Result<()> {
        self.complete(Status::Unauthorized, Payload::Empty, None)
    }

    /// `403 Forbidden`.
    pub fn forbidden(&self) -> Result<()> {
        self.complete(Status::Forbidden, Payload::Empty, None)
    }

    /// `404 Not Found`.
    pub fn not_found(&self) -> Result<()> {
        self.complete(Status::NotFound, Payload::Empty, None)
    }

    /// `405 Method Not Allowed`.
    pub fn method_not_allowed(&self) -> Result<()> {
        self.complete(Status::MethodNotAllowed, Payload::Empty, None)
    }

    /// `500 Internal Server Error`.
    pub fn internal_server_error(&self) -> Result<()> {
        self.complete(Status::InternalServerError, Payload::Empty, None)
    }

    /// `501 Not Implemented`.
    pub fn not_implemented(&self) -> Result<()> {
        self.complete(Status::NotImplemented, Payload::Empty, None)
    }

    /// Whether a terminal method has already run.
    pub fn is_sent(&self) -> bool {
        self.lock().sent
    }

    /// Stages a response header; used by
    /// [`Transaction::set_cookie`](crate::Transaction::set_cookie).
    pub(crate) fn push_header(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        if state.sent {
            return Err(Error::AlreadySent);
        }
        state.headers.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    /// Every terminal method funnels here: freeze the envelope, then fire
    /// the end-of-transaction hub with the lock released.
    fn complete(&self, status: Status, payload: Payload, location: Option<&str>) -> Result<()> {
        {
            let mut state = self.lock();
            if state.sent {
                return Err(Error::AlreadySent);
            }
            state.sent = true;
            let mut headers = std::mem::take(&mut state.headers);
            if let Some(target) = location {
                headers.push(("location".to_owned(), target.to_owned()));
            }
            state.envelope = Some(Envelope { status, headers, payload });
        }
        if let Some(transaction) = self.transaction.upgrade() {
            self.on_end.fire(&transaction);
        }
        Ok(())
    }

    pub(crate) fn take_envelope(&self) -> Option<Envelope> {
        self.lock().envelope.take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
