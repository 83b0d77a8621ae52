//! Endpoint declarations and the registry that collects them.
//!
//! Handler modules build an [`EndpointDeclaration`] each and push them
//! into one [`EndpointRegistry`], which the [`Server`](crate::Server)
//! consumes once during startup. Duplicate `(method, url)` pairs are
//! rejected at declaration time, before any route is mounted, so a
//! collision surfaces while the registry is being assembled rather
//! than mid-startup.

use std::fmt;
use std::sync::Arc;

use crate::container::Container;
use crate::endpoint::{Endpoint, EndpointFactory};
use crate::error::{Error, Result};
use crate::method::Method;
use crate::middleware::Middleware;

/// One routable endpoint: where it mounts, how it is guarded, and the
/// factory that builds its handler.
pub struct EndpointDeclaration {
    method: Method,
    url: String,
    is_public: bool,
    middleware: Vec<Arc<dyn Middleware>>,
    factory: EndpointFactory,
}

/// Structured alternative to the positional [`EndpointDeclaration::new`]
/// constructor.
pub struct EndpointSettings {
    pub method: Method,
    pub url: String,
    pub public: bool,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl EndpointDeclaration {
    /// Declares a private endpoint with no extra middleware. Visibility
    /// and per-endpoint stages are added with [`public`](Self::public)
    /// and [`middleware`](Self::middleware).
    pub fn new<F>(method: Method, url: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Container) -> Result<Arc<dyn Endpoint>> + Send + Sync + 'static,
    {
        Self {
            method,
            url: url.into(),
            is_public: false,
            middleware: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Declares from an [`EndpointSettings`] bundle.
    pub fn with_settings<F>(settings: EndpointSettings, factory: F) -> Self
    where
        F: Fn(&Container) -> Result<Arc<dyn Endpoint>> + Send + Sync + 'static,
    {
        Self {
            method: settings.method,
            url: settings.url,
            is_public: settings.public,
            middleware: settings.middleware,
            factory: Arc::new(factory),
        }
    }

    /// Marks the endpoint public: the authentication stage is skipped.
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// Appends a middleware stage. Stages run in the order they were
    /// added, after the engine-level stages and the authentication
    /// stage.
    pub fn middleware(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.middleware.push(stage);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The URL exactly as declared; normalization happens at mount time.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub(crate) fn stages(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    pub(crate) fn factory(&self) -> &EndpointFactory {
        &self.factory
    }
}

impl fmt::Debug for EndpointDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDeclaration")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("is_public", &self.is_public)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// Ordered collection of declarations, consumed once by server startup.
#[derive(Default)]
pub struct EndpointRegistry {
    declarations: Vec<EndpointDeclaration>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a declaration.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateEndpoint`] when a declaration with the same
    /// `(method, url)` pair is already present. Comparison is an exact
    /// match on the declared strings, with no normalization. The
    /// earlier declaration stays registered.
    pub fn declare(&mut self, declaration: EndpointDeclaration) -> Result<()> {
        if self
            .declarations
            .iter()
            .any(|d| d.method == declaration.method && d.url == declaration.url)
        {
            return Err(Error::DuplicateEndpoint {
                method: declaration.method,
                url: declaration.url,
            });
        }
        self.declarations.push(declaration);
        Ok(())
    }

    /// Declarations in the order they were accepted.
    pub fn all(&self) -> &[EndpointDeclaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}
