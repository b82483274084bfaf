//! Plugin contract, metadata and lifecycle states

use crate::context::{ConfigMap, PluginContext};
use crate::error::{MetadataError, PluginError};
use crate::messaging::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Highest accepted `update_priority`
pub const MAX_UPDATE_PRIORITY: u32 = 1000;

/// Default `update_priority`
pub const DEFAULT_UPDATE_PRIORITY: u32 = 100;

/// Broad category a plugin belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    #[default]
    Core,
    AircraftSystem,
    World,
    Cabin,
    Avionics,
    Network,
}

/// Static description of a plugin, validated at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPluginMetadata")]
pub struct PluginMetadata {
    name: String,
    version: String,
    author: String,
    plugin_type: PluginType,
    description: Option<String>,
    url: Option<String>,
    dependencies: Vec<String>,
    provides: Vec<String>,
    optional: bool,
    update_priority: u32,
    requires_physics: bool,
    requires_network: bool,
}

impl PluginMetadata {
    /// Start building metadata; `build` validates the result
    pub fn builder(
        name: impl Into<String>,
        version: impl Into<String>,
        author: impl Into<String>,
    ) -> PluginMetadataBuilder {
        PluginMetadataBuilder {
            metadata: PluginMetadata {
                name: name.into(),
                version: version.into(),
                author: author.into(),
                plugin_type: PluginType::default(),
                description: None,
                url: None,
                dependencies: Vec::new(),
                provides: Vec::new(),
                optional: false,
                update_priority: DEFAULT_UPDATE_PRIORITY,
                requires_physics: true,
                requires_network: false,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn plugin_type(&self) -> PluginType {
        self.plugin_type
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Names, instance ids or capabilities that must load first
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Capabilities other plugins may depend on
    pub fn provides(&self) -> &[String] {
        &self.provides
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    /// Lower runs earlier within a physics step
    pub fn update_priority(&self) -> u32 {
        self.update_priority
    }

    pub fn requires_physics(&self) -> bool {
        self.requires_physics
    }

    pub fn requires_network(&self) -> bool {
        self.requires_network
    }

    fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::EmptyField("name"));
        }
        if self.version.trim().is_empty() {
            return Err(MetadataError::EmptyField("version"));
        }
        if self.author.trim().is_empty() {
            return Err(MetadataError::EmptyField("author"));
        }
        if self.update_priority > MAX_UPDATE_PRIORITY {
            return Err(MetadataError::PriorityOutOfRange(self.update_priority));
        }
        Ok(())
    }
}

/// Unvalidated wire form of [`PluginMetadata`]
#[derive(Deserialize)]
struct RawPluginMetadata {
    name: String,
    version: String,
    author: String,
    #[serde(default)]
    plugin_type: PluginType,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    provides: Vec<String>,
    #[serde(default)]
    optional: bool,
    #[serde(default = "default_update_priority")]
    update_priority: u32,
    #[serde(default = "default_true")]
    requires_physics: bool,
    #[serde(default)]
    requires_network: bool,
}

fn default_update_priority() -> u32 {
    DEFAULT_UPDATE_PRIORITY
}

fn default_true() -> bool {
    true
}

impl TryFrom<RawPluginMetadata> for PluginMetadata {
    type Error = MetadataError;

    fn try_from(raw: RawPluginMetadata) -> Result<Self, Self::Error> {
        let metadata = PluginMetadata {
            name: raw.name,
            version: raw.version,
            author: raw.author,
            plugin_type: raw.plugin_type,
            description: raw.description,
            url: raw.url,
            dependencies: raw.dependencies,
            provides: raw.provides,
            optional: raw.optional,
            update_priority: raw.update_priority,
            requires_physics: raw.requires_physics,
            requires_network: raw.requires_network,
        };
        PluginMetadataBuilder { metadata }.build()
    }
}

/// Builder for [`PluginMetadata`]
#[derive(Debug, Clone)]
pub struct PluginMetadataBuilder {
    metadata: PluginMetadata,
}

impl PluginMetadataBuilder {
    pub fn plugin_type(mut self, plugin_type: PluginType) -> Self {
        self.metadata.plugin_type = plugin_type;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.metadata.url = Some(url.into());
        self
    }

    pub fn dependency(mut self, dependency: impl Into<String>) -> Self {
        self.metadata.dependencies.push(dependency.into());
        self
    }

    pub fn provides(mut self, capability: impl Into<String>) -> Self {
        self.metadata.provides.push(capability.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.metadata.optional = optional;
        self
    }

    pub fn update_priority(mut self, priority: u32) -> Self {
        self.metadata.update_priority = priority;
        self
    }

    pub fn requires_physics(mut self, requires: bool) -> Self {
        self.metadata.requires_physics = requires;
        self
    }

    pub fn requires_network(mut self, requires: bool) -> Self {
        self.metadata.requires_network = requires;
        self
    }

    pub fn build(self) -> Result<PluginMetadata, MetadataError> {
        self.metadata.validate()?;
        Ok(self.metadata)
    }
}

/// Contract every simulation plugin implements.
///
/// All calls come from the thread driving the game loop. Returning an error
/// (or panicking) from `update` or `handle_message` moves a non-optional
/// plugin to [`PluginState::Error`]; optional plugins keep running.
pub trait Plugin: Send {
    fn metadata(&self) -> &PluginMetadata;

    /// Called once while loading. The context stays valid for the plugin's lifetime.
    fn initialize(&mut self, context: Arc<PluginContext>) -> Result<(), PluginError>;

    /// Advance by one fixed physics step of `dt` seconds
    fn update(&mut self, dt: f64) -> Result<(), PluginError>;

    fn shutdown(&mut self) -> Result<(), PluginError>;

    /// Called for messages on topics the plugin subscribed to through its context
    fn handle_message(&mut self, _message: &Message) -> Result<(), PluginError> {
        Ok(())
    }

    /// Notified after the kernel caught a failure from this plugin
    fn on_error(&mut self, _error: &PluginError) {}

    fn on_config_changed(&mut self, _config: &ConfigMap) {}
}

/// Lifecycle state of a loaded plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Running,
    Unloading,
    Error,
    /// Retired after running; never restarts
    UnloadedAfterRun,
}

impl PluginState {
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Unloaded, Loading)
                | (Loading, Loaded)
                | (Loading, Error)
                | (Loaded, Running)
                | (Loaded, Unloading)
                | (Running, Unloading)
                | (Running, Error)
                | (Running, UnloadedAfterRun)
                | (Unloading, Unloaded)
                | (Unloading, Error)
                | (Error, Unloading)
        )
    }

    /// Whether the instance can still be updated or receive messages
    pub fn is_active(self) -> bool {
        self == PluginState::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Loading => "loading",
            PluginState::Loaded => "loaded",
            PluginState::Running => "running",
            PluginState::Unloading => "unloading",
            PluginState::Error => "error",
            PluginState::UnloadedAfterRun => "unloaded_after_run",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime record binding a plugin instance to its metadata and state
pub struct PluginInfo {
    plugin: Box<dyn Plugin>,
    metadata: PluginMetadata,
    factory: String,
    instance_id: String,
    optional: bool,
    state: PluginState,
    error: Option<String>,
    load_order: usize,
}

impl PluginInfo {
    pub(crate) fn new(
        plugin: Box<dyn Plugin>,
        factory: String,
        instance_id: String,
        optional: bool,
        load_order: usize,
    ) -> Self {
        let metadata = plugin.metadata().clone();
        Self {
            plugin,
            metadata,
            factory,
            instance_id,
            optional,
            state: PluginState::Unloaded,
            error: None,
            load_order,
        }
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Factory name the instance was built from
    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Effective optional flag (spec override or metadata)
    pub fn optional(&self) -> bool {
        self.optional
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Last captured failure
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn load_order(&self) -> usize {
        self.load_order
    }

    pub(crate) fn plugin_mut(&mut self) -> &mut dyn Plugin {
        self.plugin.as_mut()
    }

    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub(crate) fn transition(&mut self, next: PluginState) -> Result<PluginState, PluginError> {
        if !self.state.can_transition_to(next) {
            return Err(PluginError::InvalidTransition {
                plugin: self.instance_id.clone(),
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// Serializable summary of this record
    pub fn status(&self) -> PluginStatus {
        PluginStatus {
            instance_id: self.instance_id.clone(),
            factory: self.factory.clone(),
            metadata: self.metadata.clone(),
            optional: self.optional,
            state: self.state,
            error: self.error.clone(),
            load_order: self.load_order,
        }
    }
}

impl fmt::Debug for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInfo")
            .field("instance_id", &self.instance_id)
            .field("factory", &self.factory)
            .field("state", &self.state)
            .field("error", &self.error)
            .finish()
    }
}

/// Owned snapshot of a [`PluginInfo`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub instance_id: String,
    pub factory: String,
    pub metadata: PluginMetadata,
    pub optional: bool,
    pub state: PluginState,
    pub error: Option<String>,
    pub load_order: usize,
}
