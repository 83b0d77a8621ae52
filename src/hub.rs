//! Typed publish/subscribe hub for lifecycle notifications.
//!
//! A [`Hub`] is a named list of subscriber callbacks over one payload type.
//! The server exposes four of them (listen, endpoint registration,
//! transaction start, transaction end); nothing stops applications from
//! creating their own.
//!
//! # Delivery rules
//!
//! - Subscribers run synchronously, in subscription order.
//! - Every subscriber receives its own clone of the payload, so one
//!   subscriber mutating its copy is invisible to its siblings.
//! - A fire snapshots the subscriber list first and then invokes it with
//!   the lock released, so a subscriber may subscribe or unsubscribe
//!   during delivery without deadlocking. List changes take effect from
//!   the next fire.
//! - Subscribing the same callback [`Arc`] twice is a no-op that returns
//!   the original token.

use std::sync::{Arc, Mutex, PoisonError};

/// A subscriber callback. The same `Arc` can be held by the caller to
/// unsubscribe-by-identity or to prove idempotent subscription.
pub type Subscriber<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Token returned by [`Hub::subscribe`], accepted by [`Hub::unsubscribe`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionId(u64);

struct Inner<T> {
    next_id: u64,
    subscribers: Vec<(u64, Subscriber<T>)>,
}

/// A single-process publish/subscribe primitive.
///
/// `Hub` is a cheap handle: clones share the same subscriber list, which
/// is how the server hands its transaction hubs to the dispatch path
/// while application code keeps subscribing through the server.
pub struct Hub<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Hub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { next_id: 0, subscribers: Vec::new() })),
        }
    }

    /// Adds a subscriber and returns its token.
    ///
    /// Subscribing an `Arc` that is already present (by pointer identity)
    /// changes nothing and returns the token of the existing entry.
    pub fn subscribe(&self, callback: Subscriber<T>) -> SubscriptionId {
        let mut inner = self.lock();
        if let Some((id, _)) = inner
            .subscribers
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &callback))
        {
            return SubscriptionId(*id);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, callback));
        SubscriptionId(id)
    }

    /// Removes the subscriber behind `id`. Unknown tokens are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.retain(|(sid, _)| *sid != id.0);
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Invokes every current subscriber with its own clone of `payload`.
    pub fn fire(&self, payload: &T)
    where
        T: Clone,
    {
        // Snapshot, then deliver outside the lock.
        let snapshot: Vec<Subscriber<T>> = self
            .lock()
            .subscribers
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in snapshot {
            callback(payload.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}
