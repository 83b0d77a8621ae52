//! Application-scoped service container.
//!
//! The container is the boundary between the endpoint layer and whatever
//! owns the application's services: it resolves a service by its type
//! identity, nothing more. Handlers never touch it directly; their
//! factories do, once per request, which is what keeps handler instances
//! request-scoped while the services they depend on stay application-
//! scoped.
//!
//! Bindings are made while the server is configuring (usually inside the
//! [`configure_container`](crate::Server::configure_container) callback)
//! and the whole container is frozen before the listening phase begins.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A service registry keyed by type identity.
pub struct Container {
    services: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl Container {
    pub fn new() -> Self {
        Self { services: HashMap::new() }
    }

    /// Binds `service` under its own type. Rebinding replaces the
    /// previous instance.
    pub fn bind<T: Send + Sync + 'static>(&mut self, service: T) -> &mut Self {
        self.services
            .insert(TypeId::of::<T>(), (type_name::<T>(), Arc::new(service)));
        self
    }

    /// Resolves a shared handle to the bound `T`.
    ///
    /// # Errors
    ///
    /// [`Error::Unresolved`] when nothing is bound under `T`. During
    /// startup this aborts `start()`; at request time it funnels to the
    /// error stage.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let (_, service) = self
            .services
            .get(&TypeId::of::<T>())
            .ok_or(Error::Unresolved { service: type_name::<T>() })?;
        Arc::clone(service)
            .downcast::<T>()
            .map_err(|_| Error::Unresolved { service: type_name::<T>() })
    }

    /// Removes the binding for `T`. Returns whether one existed.
    pub fn unbind<T: 'static>(&mut self) -> bool {
        self.services.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("Container").field("services", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Greeter {
        greeting: &'static str,
    }

    #[test]
    fn resolves_shared_handles() {
        let mut container = Container::new();
        container.bind(Greeter { greeting: "hei" });

        let first = container.resolve::<Greeter>().unwrap();
        let second = container.resolve::<Greeter>().unwrap();
        assert_eq!(first.greeting, "hei");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unresolved_service_names_the_type() {
        let container = Container::new();
        let err = container.resolve::<Greeter>().unwrap_err();
        assert!(err.to_string().contains("Greeter"), "got: {err}");
    }

    #[test]
    fn unbind_removes_the_binding() {
        let mut container = Container::new();
        container.bind(Greeter { greeting: "hei" });

        assert!(container.unbind::<Greeter>());
        assert!(!container.contains::<Greeter>());
        assert!(!container.unbind::<Greeter>());
    }

    #[test]
    fn rebinding_replaces_the_instance() {
        let mut container = Container::new();
        container.bind(Greeter { greeting: "hei" });
        container.bind(Greeter { greeting: "moro" });

        assert_eq!(container.resolve::<Greeter>().unwrap().greeting, "moro");
    }
}
