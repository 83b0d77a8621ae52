//! Middleware chain and the error stage.
//!
//! Every route runs a fixed chain frozen at startup: the engine-level
//! stages first, in registration order, then the route's own stages in
//! declaration order, then the endpoint. A stage either calls
//! [`Next::run`] to continue or terminates the transaction itself and
//! returns without calling it. Errors anywhere in the chain divert to
//! the [`ErrorHandler`] stage.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::container::Container;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transaction::Transaction;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        txn: Arc<Transaction>,
        container: Arc<Container>,
        next: Next,
    ) -> Result<()>;
}

/// Runs when the chain returns an error. The default stage logs and
/// answers 500; installing a custom one replaces it wholesale.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(
        &self,
        txn: Arc<Transaction>,
        container: Arc<Container>,
        error: Error,
    ) -> Result<()>;
}

/// The rest of the chain, handed to each stage exactly once.
///
/// Dropping it without calling [`run`](Next::run) short-circuits the
/// chain; the stage is then responsible for terminating the transaction.
pub struct Next {
    stages: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    terminal: Arc<dyn Endpoint>,
    txn: Arc<Transaction>,
    container: Arc<Container>,
}

impl Next {
    pub(crate) fn new(
        stages: Arc<[Arc<dyn Middleware>]>,
        terminal: Arc<dyn Endpoint>,
        txn: Arc<Transaction>,
        container: Arc<Container>,
    ) -> Self {
        Self { stages, index: 0, terminal, txn, container }
    }

    /// Advances to the next stage, or to the endpoint once the stages
    /// are exhausted.
    pub async fn run(self) -> Result<()> {
        match self.stages.get(self.index).cloned() {
            Some(stage) => {
                let next = Next { index: self.index + 1, ..self };
                let txn = Arc::clone(&next.txn);
                let container = Arc::clone(&next.container);
                stage.handle(txn, container, next).await
            }
            None => self.terminal.handle(self.txn).await,
        }
    }
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<Transaction>, Arc<Container>, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        txn: Arc<Transaction>,
        container: Arc<Container>,
        next: Next,
    ) -> Result<()> {
        (self.0)(txn, container, next).await
    }
}

/// Wraps an async closure as a [`Middleware`].
pub fn middleware_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Arc<Transaction>, Arc<Container>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnMiddleware(f))
}

struct FnErrorHandler<F>(F);

#[async_trait]
impl<F, Fut> ErrorHandler for FnErrorHandler<F>
where
    F: Fn(Arc<Transaction>, Arc<Container>, Error) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        txn: Arc<Transaction>,
        container: Arc<Container>,
        error: Error,
    ) -> Result<()> {
        (self.0)(txn, container, error).await
    }
}

/// Wraps an async closure as an [`ErrorHandler`].
pub fn error_handler_fn<F, Fut>(f: F) -> Arc<dyn ErrorHandler>
where
    F: Fn(Arc<Transaction>, Arc<Container>, Error) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnErrorHandler(f))
}
