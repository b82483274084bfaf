//! Named component registry.
//!
//! Lets the host swap implementations (audio backend, terrain provider,
//! weather model...) without plugins knowing the concrete type. A name maps
//! either to a factory building a fresh component from configuration or to
//! one shared instance.

use crate::error::RegistryError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration handed to component factories
pub type ComponentConfig = serde_json::Map<String, serde_json::Value>;

type Factory =
    Arc<dyn Fn(&ComponentConfig) -> Result<Box<dyn Any + Send + Sync>, String> + Send + Sync>;

enum Component {
    Factory {
        factory: Factory,
        type_name: &'static str,
    },
    Shared {
        instance: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    },
}

impl Component {
    fn type_name(&self) -> &'static str {
        match self {
            Component::Factory { type_name, .. } | Component::Shared { type_name, .. } => type_name,
        }
    }
}

/// Thread-safe name -> component mapping
#[derive(Default)]
pub struct ComponentRegistry {
    components: DashMap<String, Component>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, component: Component) -> Result<(), RegistryError> {
        match self.components.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => {
                info!("🧩 Registered component {} ({})", name, component.type_name());
                slot.insert(component);
                Ok(())
            }
        }
    }

    /// Register a factory under `name`. Fails if the name is taken.
    pub fn register<T, F>(&self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync,
        F: Fn(&ComponentConfig) -> Result<T, String> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |config: &ComponentConfig| {
            factory(config).map(|component| Box::new(component) as Box<dyn Any + Send + Sync>)
        });
        self.insert(
            name,
            Component::Factory {
                factory,
                type_name: type_name::<T>(),
            },
        )
    }

    /// Register a single shared instance under `name`. Fails if the name is taken.
    pub fn provide<T: Any + Send + Sync>(&self, name: &str, instance: T) -> Result<(), RegistryError> {
        self.insert(
            name,
            Component::Shared {
                instance: Arc::new(instance),
                type_name: type_name::<T>(),
            },
        )
    }

    /// Build a new component from the factory registered under `name`
    pub fn create<T: Any + Send + Sync>(
        &self,
        name: &str,
        config: &ComponentConfig,
    ) -> Result<T, RegistryError> {
        let factory = match self.components.get(name).as_deref() {
            Some(Component::Factory { factory, .. }) => factory.clone(),
            Some(Component::Shared { .. }) => {
                return Err(RegistryError::CreationFailed {
                    name: name.to_string(),
                    reason: "registered as a shared instance".to_string(),
                })
            }
            None => return Err(RegistryError::NotRegistered(name.to_string())),
        };

        debug!("🏭 Creating component {}", name);
        let built = factory(config).map_err(|reason| RegistryError::CreationFailed {
            name: name.to_string(),
            reason,
        })?;

        built
            .downcast::<T>()
            .map(|component| *component)
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Fetch the shared instance registered under `name`
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        let instance = match self.components.get(name).as_deref() {
            Some(Component::Shared { instance, .. }) => instance.clone(),
            Some(Component::Factory { .. }) => {
                return Err(RegistryError::TypeMismatch {
                    name: name.to_string(),
                    expected: type_name::<T>(),
                })
            }
            None => return Err(RegistryError::NotRegistered(name.to_string())),
        };

        instance.downcast::<T>().map_err(|_| RegistryError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
        })
    }

    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        self.components
            .remove(name)
            .map(|_| info!("🧩 Unregistered component {}", name))
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Registered names, sorted
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.components.clear();
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.list_components())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct AudioBackend {
        sample_rate: u64,
    }

    fn audio_factory(config: &ComponentConfig) -> Result<AudioBackend, String> {
        let sample_rate = config
            .get("sample_rate")
            .and_then(|v| v.as_u64())
            .unwrap_or(44_100);
        if sample_rate == 0 {
            return Err("sample_rate must be positive".to_string());
        }
        Ok(AudioBackend { sample_rate })
    }

    #[test]
    fn test_register_and_create() {
        let registry = ComponentRegistry::new();
        registry.register("audio", audio_factory).unwrap();

        let mut config = ComponentConfig::new();
        config.insert("sample_rate".into(), json!(48_000));

        let backend: AudioBackend = registry.create("audio", &config).unwrap();
        assert_eq!(backend, AudioBackend { sample_rate: 48_000 });

        let default_backend: AudioBackend = registry.create("audio", &ComponentConfig::new()).unwrap();
        assert_eq!(default_backend.sample_rate, 44_100);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ComponentRegistry::new();
        registry.register("audio", audio_factory).unwrap();
        let err = registry.register("audio", audio_factory).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(ref n) if n == "audio"));
        let err = registry.provide("audio", 5u32).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_unknown_name_fails() {
        let registry = ComponentRegistry::new();
        let err = registry
            .create::<AudioBackend>("terrain", &ComponentConfig::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered(ref n) if n == "terrain"));
        assert!(registry.unregister("terrain").is_err());
    }

    #[test]
    fn test_factory_failure_and_type_mismatch() {
        let registry = ComponentRegistry::new();
        registry.register("audio", audio_factory).unwrap();

        let mut config = ComponentConfig::new();
        config.insert("sample_rate".into(), json!(0));
        let err = registry.create::<AudioBackend>("audio", &config).unwrap_err();
        assert!(matches!(err, RegistryError::CreationFailed { .. }));

        let err = registry.create::<String>("audio", &ComponentConfig::new()).unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    }

    #[test]
    fn test_shared_instances() {
        let registry = ComponentRegistry::new();
        registry.provide("units", String::from("imperial")).unwrap();

        let units = registry.get::<String>("units").unwrap();
        assert_eq!(units.as_str(), "imperial");
        assert!(registry.get::<u32>("units").is_err());
        assert!(registry.create::<String>("units", &ComponentConfig::new()).is_err());
    }

    #[test]
    fn test_listing_and_removal() {
        let registry = ComponentRegistry::new();
        registry.register("weather", |_: &ComponentConfig| Ok(1u8)).unwrap();
        registry.register("audio", audio_factory).unwrap();

        assert_eq!(registry.list_components(), vec!["audio", "weather"]);
        assert!(registry.is_registered("weather"));

        registry.unregister("weather").unwrap();
        assert!(!registry.is_registered("weather"));

        registry.clear();
        assert!(registry.list_components().is_empty());
    }
}
