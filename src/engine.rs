//! Route table, engine-level middleware, and the per-request dispatch path.
//!
//! One radix tree per HTTP method, O(path-length) lookup. Routes are
//! mounted during server startup and the whole engine is frozen behind an
//! `Arc` before the listener accepts traffic, so dispatch reads a fully
//! immutable structure.
//!
//! Dispatch is also where the transaction lifecycle lives: build the
//! [`Transaction`], fire the start hub, walk the middleware chain, divert
//! errors to the error stage, then bridge the envelope onto the wire. A
//! request whose chain completes without a terminal send is left hanging,
//! with a warning carrying its correlation id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::Full;
use matchit::Router as MatchitRouter;
use tracing::{error, warn};

use crate::container::Container;
use crate::endpoint::{endpoint_fn, Endpoint, EndpointFactory};
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::method::Method;
use crate::middleware::{error_handler_fn, ErrorHandler, Middleware, Next};
use crate::send::Envelope;
use crate::transaction::Transaction;

struct Route {
    /// Engine stages, then authentication, then declared stages, frozen
    /// in that order at mount time.
    chain: Arc<[Arc<dyn Middleware>]>,
    factory: EndpointFactory,
}

struct Hooks {
    on_start: Hub<Arc<Transaction>>,
    on_end: Hub<Arc<Transaction>>,
}

/// The routing engine under a [`Server`](crate::Server).
///
/// Mutable only through the engine-configuration callback before startup;
/// [`use_middleware`](Engine::use_middleware) is the public surface there.
pub struct Engine {
    routes: HashMap<Method, MatchitRouter<usize>>,
    table: Vec<Route>,
    stages: Vec<Arc<dyn Middleware>>,
    base_chain: Arc<[Arc<dyn Middleware>]>,
    hooks: Hooks,
    not_found: Arc<dyn Endpoint>,
    error_stage: Arc<dyn ErrorHandler>,
}

impl Engine {
    pub(crate) fn new() -> Self {
        Self {
            routes: HashMap::new(),
            table: Vec::new(),
            stages: Vec::new(),
            base_chain: Vec::new().into(),
            hooks: Hooks { on_start: Hub::new(), on_end: Hub::new() },
            not_found: default_not_found(),
            error_stage: default_error_stage(),
        }
    }

    /// Appends an engine-level middleware stage. These run for every
    /// request, matched or not, before any route-specific stage.
    pub fn use_middleware(&mut self, stage: Arc<dyn Middleware>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Number of mounted routes.
    pub fn route_count(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn install_transaction_step(
        &mut self,
        on_start: Hub<Arc<Transaction>>,
        on_end: Hub<Arc<Transaction>>,
    ) {
        self.hooks = Hooks { on_start, on_end };
    }

    pub(crate) fn set_not_found(&mut self, endpoint: Arc<dyn Endpoint>) {
        self.not_found = endpoint;
    }

    pub(crate) fn set_error_stage(&mut self, stage: Arc<dyn ErrorHandler>) {
        self.error_stage = stage;
    }

    /// Mounts a route. `route_stages` is the authentication stage (when
    /// applicable) followed by the declared stages; the engine prepends
    /// its own stages.
    pub(crate) fn mount(
        &mut self,
        method: Method,
        url: &str,
        route_stages: Vec<Arc<dyn Middleware>>,
        factory: EndpointFactory,
    ) -> Result<()> {
        let chain: Vec<Arc<dyn Middleware>> = self
            .stages
            .iter()
            .cloned()
            .chain(route_stages)
            .collect();
        let index = self.table.len();
        self.routes
            .entry(method)
            .or_default()
            .insert(url, index)
            .map_err(|source| Error::InvalidRoute { url: url.to_owned(), source })?;
        self.table.push(Route { chain: chain.into(), factory });
        Ok(())
    }

    /// Freezes the engine-stage chain used for unmatched requests. Called
    /// once, after the last mount.
    pub(crate) fn seal(&mut self) {
        self.base_chain = self.stages.clone().into();
    }

    /// Runs one request end to end and produces the wire response.
    ///
    /// Never returns an error: failures become responses through the
    /// error stage, and a chain that terminates nothing leaves the
    /// request pending.
    pub(crate) async fn dispatch(
        &self,
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: SocketAddr,
        container: &Arc<Container>,
    ) -> http::Response<Full<Bytes>> {
        let txn = Transaction::new(parts, body, remote_addr, self.hooks.on_end.clone());
        self.hooks.on_start.fire(&txn);

        let route = Method::from_http(txn.method())
            .and_then(|method| self.routes.get(&method))
            .and_then(|tree| tree.at(txn.path()).ok())
            .map(|matched| {
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                txn.attach_params(params);
                &self.table[*matched.value]
            });

        let outcome = match route {
            Some(route) => match (route.factory)(container) {
                Ok(endpoint) => {
                    Next::new(
                        Arc::clone(&route.chain),
                        endpoint,
                        Arc::clone(&txn),
                        Arc::clone(container),
                    )
                    .run()
                    .await
                }
                Err(error) => Err(error),
            },
            None => {
                Next::new(
                    Arc::clone(&self.base_chain),
                    Arc::clone(&self.not_found),
                    Arc::clone(&txn),
                    Arc::clone(container),
                )
                .run()
                .await
            }
        };

        if let Err(error) = outcome {
            if let Err(stage_error) = self
                .error_stage
                .handle(Arc::clone(&txn), Arc::clone(container), error)
                .await
            {
                error!(
                    correlation_id = %txn.correlation_id(),
                    "error stage failed: {stage_error}"
                );
            }
        }

        match txn.take_envelope() {
            Some(envelope) => respond(envelope),
            None => {
                warn!(
                    correlation_id = %txn.correlation_id(),
                    method = %txn.method(),
                    path = txn.path(),
                    "no terminal send; request left pending"
                );
                std::future::pending().await
            }
        }
    }
}

fn default_not_found() -> Arc<dyn Endpoint> {
    endpoint_fn(|txn: Arc<Transaction>| async move { txn.send().not_found() })
}

fn default_error_stage() -> Arc<dyn ErrorHandler> {
    error_handler_fn(|txn: Arc<Transaction>, _container, error: Error| async move {
        error!(correlation_id = %txn.correlation_id(), %error, "request failed");
        txn.send().internal_server_error()
    })
}

/// Bridges a frozen envelope onto the wire.
fn respond(envelope: Envelope) -> http::Response<Full<Bytes>> {
    let mut builder = http::Response::builder().status(http::StatusCode::from(envelope.status));
    if let Some(content_type) = envelope.payload.content_type() {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    for (name, value) in &envelope.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(envelope.payload.into_body()))
        .unwrap_or_else(|e| {
            // Only reachable through an invalid staged header name or value.
            error!("dropping malformed response envelope: {e}");
            let mut response = http::Response::new(Full::new(Bytes::new()));
            *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}
