//! Capability modules, the service locator seam and the module registry.
//!
//! # Design
//! The set of capabilities a client carries is declared explicitly with
//! `ModuleRegistryBuilder::register::<T>()`. Every declared type is resolved
//! exactly once, through the injected `ServiceLocator`, when the registry is
//! built; lookups afterwards are a `TypeId` match over that fixed list and
//! never resolve lazily. Declaration order is kept and reused for lifecycle
//! ordering.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::ClientContext;
use crate::error::{RegistryError, ResolveError};

/// Type-erased instance handed out by a locator.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A unit of client functionality with a lifecycle.
///
/// Failures are reported with `anyhow`; the context catches, logs and
/// collects them without stopping the other modules.
pub trait Module: Any + Send + Sync {
    fn init(&self, ctx: &ClientContext) -> anyhow::Result<()>;

    fn destroy(&self, ctx: &ClientContext) -> anyhow::Result<()>;
}

/// Identifies a service or capability type for a locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// External dependency-resolution container.
pub trait ServiceLocator: Send + Sync {
    fn resolve(&self, key: ServiceKey) -> Result<Instance, ResolveError>;
}

/// Resolves `T` through `locator` and downcasts it.
pub fn resolve_as<T: Any + Send + Sync>(locator: &dyn ServiceLocator) -> Result<Arc<T>, ResolveError> {
    let key = ServiceKey::of::<T>();
    locator
        .resolve(key)?
        .downcast::<T>()
        .map_err(|_| ResolveError::TypeMismatch { service: key.name() })
}

/// Map-backed locator holding ready-made instances.
#[derive(Default)]
pub struct InstanceLocator {
    instances: HashMap<TypeId, Instance>,
}

impl InstanceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` as the one returned for `T`, replacing any earlier one.
    pub fn provide<T: Any + Send + Sync>(mut self, instance: Arc<T>) -> Self {
        self.instances.insert(TypeId::of::<T>(), instance);
        self
    }
}

impl ServiceLocator for InstanceLocator {
    fn resolve(&self, key: ServiceKey) -> Result<Instance, ResolveError> {
        self.instances
            .get(&key.id())
            .cloned()
            .ok_or(ResolveError::NotRegistered { service: key.name() })
    }
}

impl fmt::Debug for InstanceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLocator")
            .field("instances", &self.instances.len())
            .finish()
    }
}

type Loader = fn(&dyn ServiceLocator) -> Result<ModuleEntry, ResolveError>;

fn load_module<T: Module>(locator: &dyn ServiceLocator) -> Result<ModuleEntry, ResolveError> {
    let module = resolve_as::<T>(locator)?;
    Ok(ModuleEntry {
        key: ServiceKey::of::<T>(),
        instance: module.clone(),
        module,
    })
}

/// Declares the capability set of a client, in lifecycle order.
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    declared: Vec<(ServiceKey, Loader)>,
}

impl fmt::Debug for ModuleRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.declared.iter().map(|(key, _)| key.name()))
            .finish()
    }
}

impl ModuleRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Module>(mut self) -> Self {
        self.declared.push((ServiceKey::of::<T>(), load_module::<T> as Loader));
        self
    }

    /// Resolves every declared module. Declaring a type twice is an error.
    pub fn build(self, locator: &dyn ServiceLocator) -> Result<ModuleRegistry, RegistryError> {
        let mut entries: Vec<ModuleEntry> = Vec::with_capacity(self.declared.len());
        for (key, load) in self.declared {
            if entries.iter().any(|entry| entry.key == key) {
                return Err(RegistryError::DuplicateModule { module: key.name() });
            }
            entries.push(load(locator)?);
        }
        Ok(ModuleRegistry { entries })
    }
}

struct ModuleEntry {
    key: ServiceKey,
    module: Arc<dyn Module>,
    instance: Instance,
}

/// One instance per capability type, in registration order.
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::new()
    }

    pub fn get<T: Module>(&self) -> Result<Arc<T>, RegistryError> {
        let key = ServiceKey::of::<T>();
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.instance.clone().downcast::<T>().ok())
            .ok_or(RegistryError::MissingModule { module: key.name() })
    }

    pub fn contains<T: Module>(&self) -> bool {
        let key = ServiceKey::of::<T>();
        self.entries.iter().any(|entry| entry.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered modules with their names, in lifecycle order.
    pub fn modules(&self) -> impl Iterator<Item = (&'static str, &Arc<dyn Module>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key.name(), &entry.module))
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.key.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Login;
    #[derive(Debug)]
    struct Chat;
    #[derive(Debug)]
    struct Unregistered;

    impl Module for Login {
        fn init(&self, _ctx: &ClientContext) -> anyhow::Result<()> {
            Ok(())
        }
        fn destroy(&self, _ctx: &ClientContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Module for Chat {
        fn init(&self, _ctx: &ClientContext) -> anyhow::Result<()> {
            Ok(())
        }
        fn destroy(&self, _ctx: &ClientContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Module for Unregistered {
        fn init(&self, _ctx: &ClientContext) -> anyhow::Result<()> {
            Ok(())
        }
        fn destroy(&self, _ctx: &ClientContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn locator() -> InstanceLocator {
        InstanceLocator::new()
            .provide(Arc::new(Login))
            .provide(Arc::new(Chat))
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry = ModuleRegistry::builder()
            .register::<Chat>()
            .register::<Login>()
            .build(&locator())
            .unwrap();
        let names: Vec<_> = registry.modules().map(|(name, _)| name).collect();
        assert_eq!(names, vec![type_name::<Chat>(), type_name::<Login>()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_returns_the_resolved_instance() {
        let login = Arc::new(Login);
        let locator = InstanceLocator::new().provide(Arc::clone(&login));
        let registry = ModuleRegistry::builder()
            .register::<Login>()
            .build(&locator)
            .unwrap();
        assert!(Arc::ptr_eq(&registry.get::<Login>().unwrap(), &login));
        assert!(registry.contains::<Login>());
    }

    #[test]
    fn get_unregistered_fails_with_missing_module() {
        let registry = ModuleRegistry::builder()
            .register::<Login>()
            .build(&locator())
            .unwrap();
        let err = registry.get::<Unregistered>().unwrap_err();
        assert!(matches!(err, RegistryError::MissingModule { module } if module == type_name::<Unregistered>()));
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let err = ModuleRegistry::builder()
            .register::<Login>()
            .register::<Chat>()
            .register::<Login>()
            .build(&locator())
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateModule { .. }));
    }

    #[test]
    fn unresolvable_module_fails_construction() {
        let err = ModuleRegistry::builder()
            .register::<Unregistered>()
            .build(&locator())
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Resolve(ResolveError::NotRegistered { .. })
        ));
    }

    #[test]
    fn locator_type_mismatch_is_reported() {
        struct Wrong;
        impl ServiceLocator for Wrong {
            fn resolve(&self, _key: ServiceKey) -> Result<Instance, ResolveError> {
                Ok(Arc::new(42u32))
            }
        }
        let err = resolve_as::<Login>(&Wrong).unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn instance_locator_resolves_plain_services() {
        let locator = InstanceLocator::new().provide(Arc::new(String::from("svc")));
        let svc = resolve_as::<String>(&locator).unwrap();
        assert_eq!(svc.as_str(), "svc");
        assert!(matches!(
            resolve_as::<u8>(&locator),
            Err(ResolveError::NotRegistered { .. })
        ));
    }
}
