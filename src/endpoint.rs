//! The handler seam: what runs when a route matches.
//!
//! Handlers implement [`Endpoint`], usually through the [`endpoint_fn`]
//! adapter. Routes do not hold a handler instance; they hold an
//! [`EndpointFactory`] that builds one from the [`Container`] on every
//! request, so a handler sees the container's current bindings rather
//! than whatever was bound when the server started.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::container::Container;
use crate::error::Result;
use crate::transaction::Transaction;

/// A request handler. Terminate the transaction with one `send.*` call.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn handle(&self, txn: Arc<Transaction>) -> Result<()>;
}

/// Builds a handler from the container. Invoked once at startup to prove
/// its bindings resolve, then once per matching request.
pub type EndpointFactory = Arc<dyn Fn(&Container) -> Result<Arc<dyn Endpoint>> + Send + Sync>;

struct FnEndpoint<F>(F);

#[async_trait]
impl<F, Fut> Endpoint for FnEndpoint<F>
where
    F: Fn(Arc<Transaction>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, txn: Arc<Transaction>) -> Result<()> {
        (self.0)(txn).await
    }
}

/// Wraps an async closure as an [`Endpoint`].
///
/// ```
/// use canter::{endpoint_fn, Result, Transaction};
/// use std::sync::Arc;
///
/// let hello = endpoint_fn(|txn: Arc<Transaction>| async move {
///     txn.send().ok("hello")
/// });
/// # let _ = hello;
/// ```
pub fn endpoint_fn<F, Fut>(f: F) -> Arc<dyn Endpoint>
where
    F: Fn(Arc<Transaction>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnEndpoint(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::hub::Hub;

    fn txn() -> Arc<Transaction> {
        let (parts, ()) = http::Request::builder()
            .uri("/ping")
            .body(())
            .unwrap()
            .into_parts();
        Transaction::new(parts, Bytes::new(), "127.0.0.1:4000".parse().unwrap(), Hub::new())
    }

    #[tokio::test]
    async fn closure_adapter_runs_and_sends() {
        let endpoint = endpoint_fn(|txn: Arc<Transaction>| async move { txn.send().ok("pong") });
        let txn = txn();
        endpoint.handle(Arc::clone(&txn)).await.unwrap();
        assert!(txn.send().is_sent());
    }

    #[tokio::test]
    async fn factories_resolve_against_the_live_container() {
        struct Greeting(&'static str);

        let factory: EndpointFactory = Arc::new(|container: &Container| {
            let greeting = container.resolve::<Greeting>()?;
            Ok(endpoint_fn(move |txn: Arc<Transaction>| {
                let greeting = Arc::clone(&greeting);
                async move { txn.send().ok(greeting.0) }
            }))
        });

        let mut container = Container::new();
        assert!(factory(&container).is_err());

        container.bind(Greeting("howdy"));
        let endpoint = factory(&container).unwrap();
        let txn = txn();
        endpoint.handle(Arc::clone(&txn)).await.unwrap();
        assert!(txn.send().is_sent());
    }
}
