//! Configuration management for the Airborne host.
//!
//! Loads the simulation settings, the plugin roster and the input bindings
//! from a TOML file.

use airborne_kernel::{ActionBinding, ActionBindingRegistry, ConfigMap, LoopSettings, PluginSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::info;

fn default_target_fps() -> f64 {
    60.0
}

fn default_physics_hz() -> f64 {
    60.0
}

fn default_message_budget() -> usize {
    airborne_kernel::DEFAULT_MESSAGE_BUDGET
}

fn default_max_catch_up_steps() -> u32 {
    5
}

/// Dispatch priority for input handlers missing from `[input.priorities]`
pub const UNCONFIGURED_HANDLER_PRIORITY: i32 = 999;

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Loop timing and budgets
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Input handler settings
    #[serde(default)]
    pub input: InputSettings,
    /// Values merged into every plugin's configuration
    #[serde(default)]
    pub global: ConfigMap,
    /// Plugin instances to load, in declaration order
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    /// Named actions for the cockpit input handler
    #[serde(default)]
    pub bindings: Vec<ActionBinding>,
}

/// Timing settings for the game loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Frame rate cap, `0` for uncapped
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
    /// Fixed physics rate in Hz
    #[serde(default = "default_physics_hz")]
    pub physics_hz: f64,
    /// Messages drained per frame
    #[serde(default = "default_message_budget")]
    pub message_budget: usize,
    /// Most physics steps a single frame may catch up on
    #[serde(default = "default_max_catch_up_steps")]
    pub max_catch_up_steps: u32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            physics_hz: default_physics_hz(),
            message_budget: default_message_budget(),
            max_catch_up_steps: default_max_catch_up_steps(),
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
    /// Write logs to this file instead of stdout
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

/// Input handler settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSettings {
    /// Handler name to dispatch priority, lower runs first
    #[serde(default)]
    pub priorities: BTreeMap<String, i32>,
}

impl InputSettings {
    /// Configured priority for `handler`, or [`UNCONFIGURED_HANDLER_PRIORITY`]
    pub fn handler_priority(&self, handler: &str) -> i32 {
        self.priorities
            .get(handler)
            .copied()
            .unwrap_or(UNCONFIGURED_HANDLER_PRIORITY)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut diagnostics = ConfigMap::new();
        diagnostics.insert("report_interval_s".into(), serde_json::json!(10.0));

        Self {
            simulation: SimulationSettings::default(),
            logging: LoggingSettings::default(),
            input: InputSettings::default(),
            global: ConfigMap::new(),
            plugins: vec![PluginSpec::new(crate::diagnostics::PLUGIN_NAME, "diagnostics")
                .with_optional(true)
                .with_config(diagnostics)],
            bindings: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// `path` and the defaults are returned.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Loop settings for the kernel.
    pub fn to_loop_settings(&self) -> LoopSettings {
        LoopSettings {
            target_fps: self.simulation.target_fps,
            physics_hz: self.simulation.physics_hz,
            message_budget: self.simulation.message_budget,
            max_catch_up_steps: self.simulation.max_catch_up_steps,
        }
    }

    /// Action bindings as a registry, rejecting duplicate action names.
    pub fn binding_registry(&self) -> Result<ActionBindingRegistry, String> {
        ActionBindingRegistry::from_bindings(self.bindings.iter().cloned()).map_err(|e| e.to_string())
    }

    /// Validates the configuration for correctness.
    pub fn validate(&self) -> Result<(), String> {
        self.to_loop_settings().validate().map_err(|e| e.to_string())?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        let mut instance_ids = HashSet::new();
        for spec in &self.plugins {
            spec.validate().map_err(|e| e.to_string())?;
            if !instance_ids.insert(spec.instance_id.as_str()) {
                return Err(format!("Duplicate plugin instance id: {}", spec.instance_id));
            }
        }

        self.binding_registry()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airborne_kernel::{AxisDirection, InputBinding, KeyModifiers};
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.simulation.target_fps, 60.0);
        assert_eq!(config.simulation.physics_hz, 60.0);
        assert_eq!(config.simulation.message_budget, 100);
        assert_eq!(config.simulation.max_catch_up_steps, 5);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.logging.file_path.is_none());
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].instance_id, "diagnostics");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("airborne.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The written file must load back to the same configuration
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[simulation]
target_fps = 30
physics_hz = 120.0
message_budget = 250

[logging]
level = "debug"
json_format = true

[input.priorities]
cockpit = 150
atc_menu = 0

[global]
units = "imperial"

[global.weather]
visibility_sm = 10

[[plugins]]
plugin = "engine"
instance_id = "engine_left"

[plugins.config]
position = "left"

[[plugins]]
plugin = "weather"
instance_id = "weather"
optional = true

[[bindings]]
name = "gear_toggle"

[[bindings.inputs]]
type = "key"
key = 71

[[bindings.inputs]]
type = "button"
button = 4

[[bindings]]
name = "elevator"
inputs = [{ type = "axis", axis = 1, threshold = 0.05 }]
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf()).await.unwrap();

        assert_eq!(config.simulation.target_fps, 30.0);
        assert_eq!(config.simulation.physics_hz, 120.0);
        assert_eq!(config.simulation.message_budget, 250);
        assert_eq!(config.simulation.max_catch_up_steps, 5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        assert_eq!(config.input.handler_priority("cockpit"), 150);
        assert_eq!(config.input.handler_priority("atc_menu"), 0);
        assert_eq!(config.input.handler_priority("checklist"), UNCONFIGURED_HANDLER_PRIORITY);

        assert_eq!(config.global["units"], "imperial");
        assert_eq!(config.global["weather"]["visibility_sm"], 10);

        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[0].config["position"], "left");
        assert_eq!(config.plugins[0].optional, None);
        assert_eq!(config.plugins[1].optional, Some(true));

        assert_eq!(config.bindings.len(), 2);
        assert_eq!(
            config.bindings[0].inputs[0],
            InputBinding::Key {
                key: 71,
                modifiers: KeyModifiers::NONE
            }
        );
        assert_eq!(
            config.bindings[1].inputs[0],
            InputBinding::Axis {
                axis: 1,
                threshold: 0.05,
                direction: AxisDirection::Both,
                device_id: None
            }
        );
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_malformed_file() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[simulation\ntarget_fps = ").await.unwrap();

        assert!(AppConfig::load_from_file(&temp_file.path().to_path_buf()).await.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.simulation.physics_hz = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.simulation.message_budget = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("verbose"));

        let mut config = AppConfig::default();
        config.plugins.push(PluginSpec::new("", "orphan"));
        assert!(config.validate().unwrap_err().contains("plugin"));

        let mut config = AppConfig::default();
        config.plugins.push(PluginSpec::new("engine", "diagnostics"));
        assert!(config.validate().unwrap_err().contains("Duplicate"));

        let mut config = AppConfig::default();
        config.bindings.push(ActionBinding::new("flaps_down"));
        config.bindings.push(ActionBinding::new("flaps_down"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_loop_settings() {
        let mut config = AppConfig::default();
        config.simulation.target_fps = 0.0;
        config.simulation.max_catch_up_steps = 8;

        let settings = config.to_loop_settings();
        assert_eq!(settings.target_fps, 0.0);
        assert_eq!(settings.max_catch_up_steps, 8);
        assert!(settings.frame_interval().is_none());
    }
}
