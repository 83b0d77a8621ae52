//! Horses demo: declarative endpoints over an in-memory repository.
//!
//! Two public read endpoints, two private write endpoints behind a
//! bearer-token authentication stage, and all four lifecycle hubs wired
//! to structured logs.
//!
//! ```sh
//! cargo run --example horses
//! curl localhost:8080/api/v1/horses
//! curl localhost:8080/api/v1/horse/1
//! curl -X POST localhost:8080/api/v1/horses \
//!     -H 'authorization: Bearer stable-key' \
//!     -d '{"name":"Windrunner","color":"grey","legCount":4,"weight":502}'
//! ```

use std::sync::{Arc, Mutex};

use canter::{
    endpoint_fn, middleware_fn, Container, EndpointDeclaration, EndpointRegistry, Method,
    Middleware, Next, Payload, RegisteredEndpoint, Result, Server, Transaction,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Horse {
    #[serde(default)]
    id: u64,
    name: String,
    color: String,
    leg_count: u32,
    weight: u32,
}

struct Inner {
    horses: Vec<Horse>,
    next_id: u64,
}

struct HorseRepository {
    inner: Mutex<Inner>,
}

impl HorseRepository {
    fn new() -> Self {
        Self { inner: Mutex::new(Inner { horses: Vec::new(), next_id: 1 }) }
    }

    fn get_one(&self, id: u64) -> Option<Horse> {
        let inner = self.inner.lock().unwrap();
        inner.horses.iter().find(|h| h.id == id).cloned()
    }

    fn get_all(&self) -> Vec<Horse> {
        self.inner.lock().unwrap().horses.clone()
    }

    fn insert(&self, mut horse: Horse) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        horse.id = inner.next_id;
        inner.next_id += 1;
        let id = horse.id;
        inner.horses.push(horse);
        id
    }

    fn delete(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.horses.len();
        inner.horses.retain(|h| h.id != id);
        inner.horses.len() < before
    }
}

// ── Endpoints ─────────────────────────────────────────────────────────────────

fn horses_get_all() -> EndpointDeclaration {
    EndpointDeclaration::new(Method::Get, "/api/v1/horses", |container: &Container| {
        let repository = container.resolve::<HorseRepository>()?;
        Ok(endpoint_fn(move |txn: Arc<Transaction>| {
            let repository = Arc::clone(&repository);
            async move { txn.send().ok(Payload::json(&repository.get_all())?) }
        }))
    })
    .public()
}

fn horses_get_one() -> EndpointDeclaration {
    EndpointDeclaration::new(Method::Get, "/api/v1/horse/{horseId}", |container: &Container| {
        let repository = container.resolve::<HorseRepository>()?;
        Ok(endpoint_fn(move |txn: Arc<Transaction>| {
            let repository = Arc::clone(&repository);
            async move {
                let raw = txn.param("horseId").unwrap_or_default();
                let Ok(id) = raw.parse::<u64>() else {
                    return txn.send().bad_request(json!([format!("`{raw}` is not a horse id.")]));
                };
                match repository.get_one(id) {
                    Some(horse) => txn.send().ok(Payload::json(&horse)?),
                    None => txn.send().not_found(),
                }
            }
        }))
    })
    .public()
}

fn horses_create() -> EndpointDeclaration {
    EndpointDeclaration::new(Method::Post, "/api/v1/horses", |container: &Container| {
        let repository = container.resolve::<HorseRepository>()?;
        Ok(endpoint_fn(move |txn: Arc<Transaction>| {
            let repository = Arc::clone(&repository);
            async move {
                let horse: Horse = match txn.body_json() {
                    Ok(horse) => horse,
                    Err(error) => return txn.send().bad_request(json!([error.to_string()])),
                };
                let id = repository.insert(horse);
                txn.send().created(json!({ "id": id }))
            }
        }))
    })
}

fn horses_delete() -> EndpointDeclaration {
    EndpointDeclaration::new(Method::Delete, "/api/v1/horse/{horseId}", |container: &Container| {
        let repository = container.resolve::<HorseRepository>()?;
        Ok(endpoint_fn(move |txn: Arc<Transaction>| {
            let repository = Arc::clone(&repository);
            async move {
                let raw = txn.param("horseId").unwrap_or_default();
                let Ok(id) = raw.parse::<u64>() else {
                    return txn.send().bad_request(json!([format!("`{raw}` is not a horse id.")]));
                };
                if repository.delete(id) {
                    txn.send().no_content()
                } else {
                    txn.send().not_found()
                }
            }
        }))
    })
}

/// Guards the private endpoints. Anything without the demo bearer token
/// is turned away before the declared stages run.
fn bearer_auth() -> Arc<dyn Middleware> {
    middleware_fn(|txn: Arc<Transaction>, _container, next: Next| async move {
        match txn.header("authorization") {
            Some("Bearer stable-key") => {
                txn.set_user(json!({ "sub": "stable-hand" }));
                next.run().await
            }
            _ => txn.send().unauthorized(),
        }
    })
}

// ── Bootstrap ─────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut registry = EndpointRegistry::new();
    registry.declare(horses_get_all())?;
    registry.declare(horses_get_one())?;
    registry.declare(horses_create())?;
    registry.declare(horses_delete())?;

    let mut server = Server::new(registry);
    server.set_authentication_middleware(bearer_auth())?;

    // Composition root: everything handlers resolve gets bound here.
    server.configure_container(|container| {
        let repository = HorseRepository::new();
        repository.insert(Horse {
            id: 0,
            name: "Cookiecharm".into(),
            color: "brown".into(),
            leg_count: 4,
            weight: 421,
        });
        repository.insert(Horse {
            id: 0,
            name: "Three-leg-hevone".into(),
            color: "white".into(),
            leg_count: 3,
            weight: 678,
        });
        container.bind(repository);
    })?;

    server.configure_engine(|engine, _container| {
        engine.use_middleware(middleware_fn(
            |txn: Arc<Transaction>, _container, next: Next| async move {
                info!(
                    correlation_id = %txn.correlation_id(),
                    method = %txn.method(),
                    path = txn.path(),
                    "request"
                );
                next.run().await
            },
        ));
    })?;

    server.on_listen().subscribe(Arc::new(|port| info!(port, "listening")));
    server
        .on_register_endpoint()
        .subscribe(Arc::new(|endpoint: RegisteredEndpoint| {
            info!(
                method = %endpoint.method,
                url = %endpoint.url,
                public = endpoint.is_public,
                "endpoint registered"
            );
        }));
    server
        .on_transaction_start()
        .subscribe(Arc::new(|txn: Arc<Transaction>| {
            info!(correlation_id = %txn.correlation_id(), "transaction started");
        }));
    server
        .on_transaction_end()
        .subscribe(Arc::new(|txn: Arc<Transaction>| {
            info!(correlation_id = %txn.correlation_id(), "transaction ended");
        }));

    server.start(8080).await?;

    shutdown_signal().await;
    server.stop().await
}

/// Resolves on the first shutdown signal the process receives: SIGTERM
/// (Kubernetes, systemd) or SIGINT (Ctrl-C) on Unix, Ctrl-C elsewhere.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
