//! Server lifecycle: configure, start, serve, stop.
//!
//! A [`Server`] moves through `Configuring → Starting → Listening →
//! Stopping → Stopped`, strictly forward. Everything configurable
//! (container bindings, engine stages, authentication, fallback handlers)
//! happens before [`start`](Server::start); startup reconciles the
//! endpoint registry into mounted routes, freezes the engine and the
//! container behind `Arc`s, and only then binds the socket. Live traffic
//! never observes a mutation.
//!
//! Shutdown is graceful: [`stop`](Server::stop) closes the listener,
//! tells every in-flight connection to finish its current requests, and
//! resolves once the accept loop has drained.

use std::convert::Infallible;
use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::container::Container;
use crate::endpoint::Endpoint;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::method::Method;
use crate::middleware::{ErrorHandler, Middleware};
use crate::registry::EndpointRegistry;
use crate::transaction::Transaction;

/// Where a [`Server`] is in its life. Strictly forward; a stopped server
/// does not restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Configuring,
    Starting,
    Listening,
    Stopping,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifecycle::Configuring => "configuring",
            Lifecycle::Starting => "starting",
            Lifecycle::Listening => "listening",
            Lifecycle::Stopping => "stopping",
            Lifecycle::Stopped => "stopped",
        })
    }
}

/// Payload of the endpoint-registration hub: one fires per declaration
/// mounted during startup, with the normalized URL.
#[derive(Clone, Debug)]
pub struct RegisteredEndpoint {
    pub method: Method,
    pub url: String,
    pub is_public: bool,
}

enum EngineSlot {
    Open(Engine),
    Frozen(Arc<Engine>),
}

enum ContainerSlot {
    Open(Container),
    Frozen(Arc<Container>),
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

type ContainerConfigurer = Box<dyn FnOnce(&mut Container) + Send>;
type EngineConfigurer = Box<dyn FnOnce(&mut Engine, &mut Container) + Send>;

/// The orchestrator: owns the registry, the container, the engine, and
/// the four lifecycle hubs.
pub struct Server {
    state: Lifecycle,
    registry: EndpointRegistry,
    engine: EngineSlot,
    container: ContainerSlot,
    container_configurers: Vec<ContainerConfigurer>,
    engine_configurers: Vec<EngineConfigurer>,
    authentication: Option<Arc<dyn Middleware>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    not_found: Option<Arc<dyn Endpoint>>,
    on_listen: Hub<u16>,
    on_register_endpoint: Hub<RegisteredEndpoint>,
    on_transaction_start: Hub<Arc<Transaction>>,
    on_transaction_end: Hub<Arc<Transaction>>,
    running: Option<Running>,
}

impl Server {
    /// A server in the `Configuring` state, holding `registry`.
    pub fn new(registry: EndpointRegistry) -> Self {
        Self {
            state: Lifecycle::Configuring,
            registry,
            engine: EngineSlot::Open(Engine::new()),
            container: ContainerSlot::Open(Container::new()),
            container_configurers: Vec::new(),
            engine_configurers: Vec::new(),
            authentication: None,
            error_handler: None,
            not_found: None,
            on_listen: Hub::new(),
            on_register_endpoint: Hub::new(),
            on_transaction_start: Hub::new(),
            on_transaction_end: Hub::new(),
            running: None,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// The routing engine. Mutable only through
    /// [`configure_engine`](Server::configure_engine).
    pub fn engine(&self) -> &Engine {
        match &self.engine {
            EngineSlot::Open(engine) => engine,
            EngineSlot::Frozen(engine) => engine,
        }
    }

    /// The service container. Mutable only through
    /// [`configure_container`](Server::configure_container); the queued
    /// callbacks run at the top of [`start`](Server::start).
    pub fn container(&self) -> &Container {
        match &self.container {
            ContainerSlot::Open(container) => container,
            ContainerSlot::Frozen(container) => container,
        }
    }

    /// The bound address while listening. `None` before start and after
    /// stop. With port 0 this is where the actual port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Fires once per successful [`start`](Server::start), with the
    /// actually bound port.
    pub fn on_listen(&self) -> Hub<u16> {
        self.on_listen.clone()
    }

    /// Fires once per declaration as startup mounts it.
    pub fn on_register_endpoint(&self) -> Hub<RegisteredEndpoint> {
        self.on_register_endpoint.clone()
    }

    /// Fires when a request's transaction has been built, before routing.
    pub fn on_transaction_start(&self) -> Hub<Arc<Transaction>> {
        self.on_transaction_start.clone()
    }

    /// Fires when a transaction's terminal send runs. A request that
    /// never sends never fires this.
    pub fn on_transaction_end(&self) -> Hub<Arc<Transaction>> {
        self.on_transaction_end.clone()
    }

    /// Installs the stage that guards private endpoints.
    pub fn set_authentication_middleware(&mut self, stage: Arc<dyn Middleware>) -> Result<()> {
        self.configuring("set_authentication_middleware")?;
        self.authentication = Some(stage);
        Ok(())
    }

    /// Replaces the default error stage (log, then 500).
    pub fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) -> Result<()> {
        self.configuring("set_error_handler")?;
        self.error_handler = Some(handler);
        Ok(())
    }

    /// Replaces the default catch-all (empty 404).
    pub fn set_not_found_handler(&mut self, endpoint: Arc<dyn Endpoint>) -> Result<()> {
        self.configuring("set_not_found_handler")?;
        self.not_found = Some(endpoint);
        Ok(())
    }

    /// Queues a callback run against the container at the top of
    /// startup, before anything resolves from it.
    pub fn configure_container<F>(&mut self, configure: F) -> Result<()>
    where
        F: FnOnce(&mut Container) + Send + 'static,
    {
        self.configuring("configure_container")?;
        self.container_configurers.push(Box::new(configure));
        Ok(())
    }

    /// Queues a callback run against the engine (and container) after
    /// the container callbacks, before any route mounts.
    pub fn configure_engine<F>(&mut self, configure: F) -> Result<()>
    where
        F: FnOnce(&mut Engine, &mut Container) + Send + 'static,
    {
        self.configuring("configure_engine")?;
        self.engine_configurers.push(Box::new(configure));
        Ok(())
    }

    /// Reconciles the registry into live routes and binds the socket.
    ///
    /// Ordering within startup: container callbacks, engine callbacks,
    /// transaction step, one mount per declaration (probing each
    /// handler factory, so unresolvable dependencies abort here), the
    /// fallback stages, then the bind. On success the `on_listen` hub
    /// fires with the bound port and the server is `Listening`.
    ///
    /// # Errors
    ///
    /// [`Error::Lifecycle`] unless called while `Configuring`; any
    /// mount, probe, or bind failure leaves the server `Stopped`.
    pub async fn start(&mut self, port: u16) -> Result<()> {
        self.configuring("start")?;
        self.state = Lifecycle::Starting;

        let engine_slot = mem::replace(&mut self.engine, EngineSlot::Open(Engine::new()));
        let container_slot =
            mem::replace(&mut self.container, ContainerSlot::Open(Container::new()));
        let (EngineSlot::Open(mut engine), ContainerSlot::Open(mut container)) =
            (engine_slot, container_slot)
        else {
            // Unreachable: the slots stay open exactly as long as the
            // state is `Configuring`.
            self.state = Lifecycle::Stopped;
            return Err(Error::Lifecycle { operation: "start", state: Lifecycle::Stopped });
        };

        for configure in self.container_configurers.drain(..) {
            configure(&mut container);
        }
        for configure in self.engine_configurers.drain(..) {
            configure(&mut engine, &mut container);
        }
        engine.install_transaction_step(
            self.on_transaction_start.clone(),
            self.on_transaction_end.clone(),
        );

        let outcome = async {
            mount_registry(
                &self.registry,
                self.authentication.as_ref(),
                &self.on_register_endpoint,
                &mut engine,
                &container,
            )?;
            if let Some(endpoint) = self.not_found.take() {
                engine.set_not_found(endpoint);
            }
            if let Some(handler) = self.error_handler.take() {
                engine.set_error_stage(handler);
            }
            engine.seal();

            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
            let local_addr = listener.local_addr()?;

            let engine = Arc::new(engine);
            let container = Arc::new(container);
            self.engine = EngineSlot::Frozen(Arc::clone(&engine));
            self.container = ContainerSlot::Frozen(Arc::clone(&container));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let task = tokio::spawn(accept_loop(listener, engine, container, shutdown_rx));
            self.running = Some(Running { local_addr, shutdown: shutdown_tx, task });
            Ok(local_addr)
        }
        .await;

        match outcome {
            Ok(local_addr) => {
                info!(addr = %local_addr, routes = self.engine().route_count(), "listening");
                self.on_listen.fire(&local_addr.port());
                self.state = Lifecycle::Listening;
                Ok(())
            }
            Err(error) => {
                self.state = Lifecycle::Stopped;
                Err(error)
            }
        }
    }

    /// Stops accepting, drains in-flight connections, and resolves once
    /// the accept loop is gone. A server that never started resolves
    /// immediately and stays as it was.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            Lifecycle::Listening => {}
            Lifecycle::Configuring | Lifecycle::Stopped => return Ok(()),
            state => return Err(Error::Lifecycle { operation: "stop", state }),
        }

        self.state = Lifecycle::Stopping;
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            if let Err(join_error) = running.task.await {
                error!("accept loop did not shut down cleanly: {join_error}");
            }
        }
        self.state = Lifecycle::Stopped;
        info!("stopped");
        Ok(())
    }

    fn configuring(&self, operation: &'static str) -> Result<()> {
        if self.state == Lifecycle::Configuring {
            Ok(())
        } else {
            Err(Error::Lifecycle { operation, state: self.state })
        }
    }
}

/// One mount per declaration, in registry order: normalize the URL,
/// probe the factory, compose authentication (private endpoints only)
/// ahead of the declared stages, announce, mount.
fn mount_registry(
    registry: &EndpointRegistry,
    authentication: Option<&Arc<dyn Middleware>>,
    on_register: &Hub<RegisteredEndpoint>,
    engine: &mut Engine,
    container: &Container,
) -> Result<()> {
    for declaration in registry.all() {
        let url = normalize_url(declaration.url());
        let _probe = (declaration.factory())(container)?;

        let mut stages: Vec<Arc<dyn Middleware>> = Vec::new();
        if !declaration.is_public() {
            if let Some(auth) = authentication {
                stages.push(Arc::clone(auth));
            }
        }
        stages.extend(declaration.stages().iter().cloned());

        info!(
            method = %declaration.method(),
            url = %url,
            public = declaration.is_public(),
            "registering endpoint"
        );
        on_register.fire(&RegisteredEndpoint {
            method: declaration.method(),
            url: url.clone(),
            is_public: declaration.is_public(),
        });

        engine.mount(declaration.method(), &url, stages, Arc::clone(declaration.factory()))?;
    }
    Ok(())
}

fn normalize_url(url: &str) -> String {
    if url.starts_with('/') {
        url.to_owned()
    } else {
        format!("/{url}")
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    engine: Arc<Engine>,
    container: Arc<Container>,
    mut shutdown: watch::Receiver<bool>,
) {
    // JoinSet tracks every connection task so the drain below can wait
    // for all of them.
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            // `biased` checks arms top to bottom, so a stop request wins
            // over any queued connections.
            biased;

            _ = shutdown.changed() => {
                info!(in_flight = tasks.len(), "stop requested, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let engine = Arc::clone(&engine);
                let container = Arc::clone(&container);
                let shutdown = shutdown.clone();
                // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper
                // IO traits.
                let io = TokioIo::new(stream);

                tasks.spawn(serve_connection(io, engine, container, remote_addr, shutdown));
            }

            // Reap finished connection tasks so the JoinSet does not grow
            // without bound.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    // Close the port before draining so a restart elsewhere can claim it.
    drop(listener);
    while tasks.join_next().await.is_some() {}
}

async fn serve_connection(
    io: TokioIo<tokio::net::TcpStream>,
    engine: Arc<Engine>,
    container: Arc<Container>,
    remote_addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    // `service_fn` runs once per request on the connection, not once per
    // connection.
    let svc = service_fn(move |req| {
        let engine = Arc::clone(&engine);
        let container = Arc::clone(&container);
        async move { handle(engine, container, req, remote_addr).await }
    });

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2, whatever the
    // client negotiates. The connection borrows the builder, so the
    // builder must outlive the select loop below.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    error!(peer = %remote_addr, "connection error: {e}");
                }
                break;
            }
            _ = shutdown.changed(), if !draining => {
                draining = true;
                // Finish in-flight requests, then close.
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Core hot path: one request in, one response out.
///
/// The error type is [`Infallible`] — failures become responses (or a
/// deliberate hang) inside the engine, so hyper never sees an error.
async fn handle(
    engine: Arc<Engine>,
    container: Arc<Container>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> std::result::Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(peer = %remote_addr, "failed to read request body: {e}");
            let mut response = http::Response::new(Full::new(Bytes::new()));
            *response.status_mut() = http::StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };
    Ok(engine.dispatch(parts, body, remote_addr, &container).await)
}
