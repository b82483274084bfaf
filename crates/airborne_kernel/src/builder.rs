//! Assembling a simulation from plugin specs.
//!
//! A spec is the configuration boundary for one plugin instance:
//! `{ plugin, instance_id, optional?, config }`. The builder registers plugin
//! factories, loads every spec in dependency order and hands the result to a
//! [`GameLoop`].

use crate::context::{ConfigMap, Services};
use crate::error::ConfigError;
use crate::game_loop::{GameLoop, LoopSettings};
use crate::loader::{PluginFactory, PluginLoader, SimplePluginFactory};
use crate::plugin::Plugin;
use crate::utils::merge_config;
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Configuration of one plugin instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Factory name
    pub plugin: String,
    /// Unique id of this instance
    pub instance_id: String,
    /// Overrides the plugin's own `optional` flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    /// Plugin-specific values, merged over the global configuration
    #[serde(default)]
    pub config: ConfigMap,
}

impl PluginSpec {
    pub fn new(plugin: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            instance_id: instance_id.into(),
            optional: None,
            config: ConfigMap::new(),
        }
    }

    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    /// Parse a spec from an untyped value, naming the offending field on error
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let object = value.as_object().ok_or_else(|| ConfigError::InvalidField {
            plugin: "<unnamed>".to_string(),
            field: "spec".to_string(),
            reason: "expected a table".to_string(),
        })?;
        let label = object
            .get("instance_id")
            .or_else(|| object.get("plugin"))
            .and_then(|v| v.as_str())
            .unwrap_or("<unnamed>")
            .to_string();

        let text = |field: &'static str| -> Result<String, ConfigError> {
            match object.get(field) {
                None | Some(serde_json::Value::Null) => Err(ConfigError::MissingField {
                    plugin: label.clone(),
                    field,
                }),
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                Some(other) => Err(ConfigError::InvalidField {
                    plugin: label.clone(),
                    field: field.to_string(),
                    reason: format!("expected a string, got {other}"),
                }),
            }
        };

        let plugin = text("plugin")?;
        let instance_id = text("instance_id")?;

        let optional = match object.get("optional") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Bool(b)) => Some(*b),
            Some(other) => {
                return Err(ConfigError::InvalidField {
                    plugin: label,
                    field: "optional".to_string(),
                    reason: format!("expected a boolean, got {other}"),
                })
            }
        };

        let config = match object.get("config") {
            None | Some(serde_json::Value::Null) => ConfigMap::new(),
            Some(serde_json::Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(ConfigError::InvalidField {
                    plugin: label,
                    field: "config".to_string(),
                    reason: format!("expected a table, got {other}"),
                })
            }
        };

        let spec = Self {
            plugin,
            instance_id,
            optional,
            config,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Required fields must be non-empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let label = if self.instance_id.trim().is_empty() {
            self.plugin.clone()
        } else {
            self.instance_id.clone()
        };
        if self.plugin.trim().is_empty() {
            return Err(ConfigError::MissingField {
                plugin: label,
                field: "plugin",
            });
        }
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                plugin: label,
                field: "instance_id",
            });
        }
        Ok(())
    }
}

/// Collects factories, specs and settings, then builds a [`GameLoop`]
pub struct SimulationBuilder {
    services: Services,
    global_config: ConfigMap,
    specs: Vec<PluginSpec>,
    settings: LoopSettings,
    factories: Vec<Box<dyn PluginFactory>>,
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self {
            services: Services::new(),
            global_config: ConfigMap::new(),
            specs: Vec::new(),
            settings: LoopSettings::default(),
            factories: Vec::new(),
        }
    }

    /// Use existing shared services instead of fresh ones
    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Merge `config` into the global configuration
    pub fn global_config(mut self, config: &ConfigMap) -> Self {
        merge_config(&mut self.global_config, config);
        self
    }

    pub fn settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn plugin(mut self, spec: PluginSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn plugins(mut self, specs: impl IntoIterator<Item = PluginSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn factory(mut self, factory: impl PluginFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// Register a constructor closure under `name`
    pub fn register_fn<F>(self, name: &str, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factory(SimplePluginFactory::new(name, constructor))
    }

    /// Load every spec and return a loop ready to run.
    ///
    /// Fails on invalid settings, malformed specs, unresolvable dependencies
    /// or a required plugin failing to load.
    pub fn build(self) -> Result<GameLoop> {
        self.settings.validate()?;

        let mut loader = PluginLoader::new(self.services, self.global_config);
        for factory in self.factories {
            loader.register_factory(BoxedFactory(factory))?;
        }

        let loaded = loader.load_all(&self.specs)?;
        info!("🏗️ Simulation built with {} plugin(s)", loaded.len());
        Ok(GameLoop::new(loader, self.settings))
    }
}

struct BoxedFactory(Box<dyn PluginFactory>);

impl PluginFactory for BoxedFactory {
    fn create(&self) -> Result<Box<dyn Plugin>, crate::error::PluginError> {
        self.0.create()
    }

    fn plugin_name(&self) -> &str {
        self.0.plugin_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::loader::tests::{journal, meta, ScriptedPlugin};
    use crate::plugin::PluginState;
    use serde_json::json;

    #[test]
    fn test_spec_from_value() {
        let spec = PluginSpec::from_value(&json!({
            "plugin": "fuel_system",
            "instance_id": "fuel_main",
            "config": { "tanks": 3 }
        }))
        .unwrap();

        assert_eq!(spec.plugin, "fuel_system");
        assert_eq!(spec.instance_id, "fuel_main");
        assert_eq!(spec.optional, None);
        assert_eq!(spec.config["tanks"], 3);
    }

    #[test]
    fn test_spec_missing_fields_named() {
        let err = PluginSpec::from_value(&json!({ "instance_id": "fuel_main" })).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                plugin: "fuel_main".into(),
                field: "plugin"
            }
        );

        let err = PluginSpec::from_value(&json!({ "plugin": "fuel_system" })).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                plugin: "fuel_system".into(),
                field: "instance_id"
            }
        );
    }

    #[test]
    fn test_spec_invalid_fields_named() {
        let err = PluginSpec::from_value(&json!({
            "plugin": "fuel_system",
            "instance_id": "fuel_main",
            "config": [1, 2]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "config"));

        let err = PluginSpec::from_value(&json!({ "plugin": 7, "instance_id": "x" })).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "plugin"));
    }

    #[test]
    fn test_spec_deserializes_from_toml_shape() {
        let spec: PluginSpec = serde_json::from_value(json!({
            "plugin": "audio",
            "instance_id": "audio",
            "optional": true
        }))
        .unwrap();
        assert_eq!(spec.optional, Some(true));
        assert!(spec.config.is_empty());
    }

    #[test]
    fn test_build_loads_and_starts_plugins() {
        let j = journal();
        let fdm_journal = j.clone();
        let ap_journal = j.clone();

        let mut global = ConfigMap::new();
        global.insert("units".into(), json!("metric"));

        let game_loop = SimulationBuilder::new()
            .global_config(&global)
            .register_fn("fdm", move || {
                Box::new(ScriptedPlugin::new(meta("fdm").build().unwrap(), &fdm_journal))
            })
            .register_fn("autopilot", move || {
                Box::new(ScriptedPlugin::new(
                    meta("autopilot").dependency("fdm").build().unwrap(),
                    &ap_journal,
                ))
            })
            .plugin(PluginSpec::new("autopilot", "ap"))
            .plugin(PluginSpec::new("fdm", "fdm"))
            .build()
            .unwrap();

        assert_eq!(game_loop.loader().state("fdm"), Some(PluginState::Running));
        assert_eq!(game_loop.loader().state("ap"), Some(PluginState::Running));
        assert_eq!(*j.lock().unwrap(), vec!["init:fdm", "init:ap"]);
    }

    #[test]
    fn test_build_rejects_bad_settings() {
        let settings = LoopSettings {
            physics_hz: 0.0,
            ..LoopSettings::default()
        };
        let err = SimulationBuilder::new().settings(settings).build().unwrap_err();
        assert!(matches!(err, KernelError::Config(ConfigError::InvalidSetting { field: "physics_hz", .. })));
    }

    #[test]
    fn test_build_rejects_empty_spec_fields() {
        let err = SimulationBuilder::new()
            .plugin(PluginSpec::new("", "x"))
            .build()
            .unwrap_err();
        assert!(matches!(err, KernelError::Config(ConfigError::MissingField { field: "plugin", .. })));
    }

    #[test]
    fn test_build_errors_propagate_as_kernel_result() {
        fn build_with(physics_hz: f64) -> Result<GameLoop> {
            let settings = LoopSettings {
                physics_hz,
                ..LoopSettings::default()
            };
            let game_loop = SimulationBuilder::new().settings(settings).build()?;
            Ok(game_loop)
        }

        let mut game_loop = build_with(60.0).unwrap();
        game_loop.shutdown();
        assert!(matches!(build_with(-1.0), Err(KernelError::Config(_))));
    }
}
