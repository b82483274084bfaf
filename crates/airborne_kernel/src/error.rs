//! Error types for the simulation kernel

/// Main error type for the kernel
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Plugin metadata was rejected at construction
    #[error("Invalid plugin metadata: {0}")]
    Metadata(#[from] MetadataError),

    /// Plugin lifecycle error
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Dependency resolution failed
    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    /// Component registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Plugin configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Event dispatch error
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Input dispatch error
    #[error("Input error: {0}")]
    Input(#[from] InputError),
}

/// Rejections raised while building [`crate::PluginMetadata`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// A required text field was empty
    #[error("Plugin {0} cannot be empty")]
    EmptyField(&'static str),

    /// `update_priority` outside 0..=1000
    #[error("Update priority must be between 0 and 1000, got {0}")]
    PriorityOutOfRange(u32),
}

/// Errors raised by plugins or by the loader while driving them
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No constructor registered under this name
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Constructor registered twice
    #[error("Plugin factory already registered: {0}")]
    FactoryAlreadyRegistered(String),

    /// Instance id not loaded
    #[error("Plugin instance not loaded: {0}")]
    NotLoaded(String),

    /// `initialize` returned an error
    #[error("Plugin initialization failed for {plugin}: {reason}")]
    InitializationFailed { plugin: String, reason: String },

    /// Plugin reported a runtime failure
    #[error("Plugin runtime error: {0}")]
    RuntimeError(String),

    /// Plugin code panicked
    #[error("Plugin panicked: {0}")]
    Panicked(String),

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid state transition for {plugin}: {from} -> {to}")]
    InvalidTransition {
        plugin: String,
        from: crate::PluginState,
        to: crate::PluginState,
    },
}

/// Dependency resolution failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    /// A plugin depends on something no plugin provides
    #[error("Plugin {plugin} depends on missing {dependency}")]
    Missing { plugin: String, dependency: String },

    /// Plugins that depend on each other in a cycle
    #[error("Circular dependency detected between: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Errors raised by the [`crate::ComponentRegistry`]
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Name already registered
    #[error("Component already registered: {0}")]
    AlreadyRegistered(String),

    /// Name unknown
    #[error("Component not registered: {0}")]
    NotRegistered(String),

    /// Component exists but is a different type than requested
    #[error("Component {name} is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    /// Factory refused to build the component
    #[error("Component {name} could not be created: {reason}")]
    CreationFailed { name: String, reason: String },
}

/// Malformed plugin configuration, reported with the offending field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required field is absent or empty
    #[error("Plugin spec {plugin}: missing required field '{field}'")]
    MissingField { plugin: String, field: &'static str },

    /// A field holds an unusable value
    #[error("Plugin spec {plugin}: invalid field '{field}': {reason}")]
    InvalidField {
        plugin: String,
        field: String,
        reason: String,
    },

    /// Two specs share an instance id
    #[error("Duplicate plugin instance id: {0}")]
    DuplicateInstance(String),

    /// Loop or kernel setting out of range
    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Errors that can occur during event handling
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Handler execution failed
    #[error("Handler execution failed: {0}")]
    HandlerExecutionFailed(String),
}

/// Errors raised by input handlers and action bindings
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// Handler name already registered
    #[error("Input handler already registered: {0}")]
    DuplicateHandler(String),

    /// Action name already registered
    #[error("Action binding already registered: {0}")]
    DuplicateAction(String),

    /// Handler failed while processing an event
    #[error("Input handler {handler} failed: {reason}")]
    HandlerFailed { handler: String, reason: String },

    /// Handler panicked while processing an event
    #[error("Input handler {handler} panicked: {reason}")]
    Panicked { handler: String, reason: String },
}
