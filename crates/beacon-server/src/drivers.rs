//! Named driver resolution shared by the storage and context managers.
//!
//! A driver family maps names to factories. One name is the default; the
//! first resolution of a name runs its factory and the instance is cached
//! for the lifetime of the manager. Registering a factory under a name that
//! was already resolved drops the cached instance.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::errors::SubscriptionError;

/// Factory producing a driver instance.
pub type DriverFactory<D> = Arc<dyn Fn() -> Result<Arc<D>, SubscriptionError> + Send + Sync>;

/// Name → factory map with a default entry and an instance cache.
pub struct DriverRegistry<D: ?Sized> {
    kind: &'static str,
    default: RwLock<String>,
    factories: RwLock<HashMap<String, DriverFactory<D>>>,
    resolved: RwLock<HashMap<String, Arc<D>>>,
}

impl<D: ?Sized + Send + Sync> DriverRegistry<D> {
    /// Empty registry for the `kind` family (used in error messages).
    pub fn new(kind: &'static str, default: impl Into<String>) -> Self {
        Self {
            kind,
            default: RwLock::new(default.into()),
            factories: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the factory for `name`.
    pub fn extend<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<D>, SubscriptionError> + Send + Sync + 'static,
    {
        let name = name.into();
        let _ = self.resolved.write().remove(&name);
        debug!(kind = self.kind, driver = %name, "driver registered");
        let _ = self.factories.write().insert(name, Arc::new(factory));
    }

    /// Resolve `name`, running its factory on first use.
    pub fn driver(&self, name: &str) -> Result<Arc<D>, SubscriptionError> {
        if let Some(instance) = self.resolved.read().get(name) {
            return Ok(Arc::clone(instance));
        }
        let factory = self.factories.read().get(name).cloned().ok_or_else(|| {
            SubscriptionError::UnknownDriver {
                kind: self.kind,
                name: name.to_string(),
            }
        })?;
        let built = factory()?;
        let mut resolved = self.resolved.write();
        Ok(Arc::clone(
            resolved.entry(name.to_string()).or_insert(built),
        ))
    }

    /// Resolve the default driver.
    pub fn resolve_default(&self) -> Result<Arc<D>, SubscriptionError> {
        let name = self.default_driver();
        self.driver(&name)
    }

    /// Current default name.
    pub fn default_driver(&self) -> String {
        self.default.read().clone()
    }

    /// Change the default name. Does not validate that a factory exists.
    pub fn set_default_driver(&self, name: impl Into<String>) {
        *self.default.write() = name.into();
    }

    /// Whether a factory is registered under `name`.
    pub fn has_driver(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Sorted list of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixed(&'static str);
    impl Named for Fixed {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn fixed(name: &'static str) -> Result<Arc<dyn Named>, SubscriptionError> {
        let driver: Arc<dyn Named> = Arc::new(Fixed(name));
        Ok(driver)
    }

    #[test]
    fn resolves_default() {
        let registry: DriverRegistry<dyn Named> = DriverRegistry::new("test", "a");
        registry.extend("a", || fixed("a"));
        assert_eq!(registry.resolve_default().unwrap().name(), "a");
    }

    #[test]
    fn unknown_name_errors() {
        let registry: DriverRegistry<dyn Named> = DriverRegistry::new("test", "nope");
        let Err(err) = registry.resolve_default() else {
            panic!("expected error");
        };
        assert!(matches!(
            err,
            SubscriptionError::UnknownDriver { kind: "test", ref name } if name == "nope"
        ));
    }

    #[test]
    fn instances_are_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry: DriverRegistry<dyn Named> = DriverRegistry::new("test", "a");
        let counter = Arc::clone(&calls);
        registry.extend("a", move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            fixed("a")
        });
        let first = registry.driver("a").unwrap();
        let second = registry.driver("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extend_replaces_cached_instance() {
        let registry: DriverRegistry<dyn Named> = DriverRegistry::new("test", "a");
        registry.extend("a", || fixed("old"));
        assert_eq!(registry.driver("a").unwrap().name(), "old");
        registry.extend("a", || fixed("new"));
        assert_eq!(registry.driver("a").unwrap().name(), "new");
    }

    #[test]
    fn set_default_and_names() {
        let registry: DriverRegistry<dyn Named> = DriverRegistry::new("test", "a");
        registry.extend("b", || fixed("b"));
        registry.extend("a", || fixed("a"));
        registry.set_default_driver("b");
        assert_eq!(registry.default_driver(), "b");
        assert_eq!(registry.resolve_default().unwrap().name(), "b");
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.has_driver("a"));
        assert!(!registry.has_driver("c"));
    }

    #[test]
    fn factory_errors_are_not_cached() {
        let registry: DriverRegistry<dyn Named> = DriverRegistry::new("test", "a");
        registry.extend("a", || {
            Err(SubscriptionError::DriverNotConfigured { name: "a".into() })
        });
        assert!(registry.driver("a").is_err());
        registry.extend("a", || fixed("a"));
        assert!(registry.driver("a").is_ok());
    }
}
