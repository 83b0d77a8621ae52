//! # canter
//!
//! A declarative routing and request-lifecycle layer on top of hyper.
//! You declare endpoints; canter reconciles them into live routes and
//! wraps every request in a transaction.
//!
//! ## The contract
//!
//! hyper owns the wire: HTTP parsing, connection management, protocol
//! negotiation. canter owns everything an application declares on top of
//! it, and nothing else:
//!
//! - **Endpoint registry** — `(method, url)` declarations with duplicate
//!   detection before anything is mounted
//! - **Lifecycle state machine** — configure, start, listen, stop, with
//!   graceful connection draining
//! - **Transactions** — one per request, with normalized accessors, a
//!   correlation id, and a `send.*` builder that terminates the request
//!   exactly once
//! - **Middleware chains** — authentication ahead of declared stages,
//!   frozen at startup, radix-tree routing via [`matchit`]
//! - **Lifecycle hubs** — typed publish/subscribe for listen,
//!   registration, and transaction start/end events
//!
//! Handlers are built per request from a [`Container`] of application
//! services, so a handler never outlives the request it answers.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use canter::{endpoint_fn, EndpointDeclaration, EndpointRegistry, Method, Server, Transaction};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> canter::Result<()> {
//!     let mut registry = EndpointRegistry::new();
//!     registry.declare(
//!         EndpointDeclaration::new(Method::Get, "/horses/{horseId}", |_container| {
//!             Ok(endpoint_fn(|txn: Arc<Transaction>| async move {
//!                 let id = txn.param("horseId").unwrap_or("unknown").to_owned();
//!                 txn.send().ok(json!({ "id": id }))
//!             }))
//!         })
//!         .public(),
//!     )?;
//!
//!     let mut server = Server::new(registry);
//!     server.on_listen().subscribe(Arc::new(|port| println!("listening on {port}")));
//!     server.start(3000).await?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     server.stop().await
//! }
//! ```

mod container;
mod endpoint;
mod engine;
mod error;
mod hub;
mod method;
mod middleware;
mod payload;
mod registry;
mod send;
mod server;
mod status;
mod transaction;

pub use container::Container;
pub use endpoint::{endpoint_fn, Endpoint, EndpointFactory};
pub use engine::Engine;
pub use error::{Error, Result};
pub use hub::{Hub, Subscriber, SubscriptionId};
pub use method::Method;
pub use middleware::{error_handler_fn, middleware_fn, ErrorHandler, Middleware, Next};
pub use payload::Payload;
pub use registry::{EndpointDeclaration, EndpointRegistry, EndpointSettings};
pub use send::Send;
pub use server::{Lifecycle, RegisteredEndpoint, Server};
pub use status::Status;
pub use transaction::{Transaction, TransactionInfo};
