//! # Airborne Kernel
//!
//! Real-time, plugin-hosted simulation kernel for a flight simulator. Aircraft
//! systems, world services, cabin and avionics are independent plugins that
//! only talk to each other through events, messages and a shared update cycle.
//!
//! ## Architecture
//!
//! - **EventBus**: synchronous, priority-ordered typed events
//! - **MessageQueue**: buffered topic messages drained with a per-frame budget
//! - **ComponentRegistry**: named factories and shared instances
//! - **PluginLoader**: name -> constructor registry, dependency-ordered
//!   loading and the plugin lifecycle state machine
//! - **GameLoop**: fixed-timestep physics decoupled from the frame rate
//! - **InputHandlerManager**: priority chain for device input, first consumer wins
//!
//! ## Usage
//!
//! ```rust,no_run
//! use airborne_kernel::*;
//! use std::sync::Arc;
//!
//! struct FuelSystem {
//!     metadata: PluginMetadata,
//!     context: Option<Arc<PluginContext>>,
//!     fuel_kg: f64,
//! }
//!
//! impl Plugin for FuelSystem {
//!     fn metadata(&self) -> &PluginMetadata {
//!         &self.metadata
//!     }
//!
//!     fn initialize(&mut self, context: Arc<PluginContext>) -> Result<(), PluginError> {
//!         self.context = Some(context);
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, dt: f64) -> Result<(), PluginError> {
//!         self.fuel_kg -= 0.8 * dt;
//!         Ok(())
//!     }
//!
//!     fn shutdown(&mut self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), KernelError> {
//! let mut game_loop = SimulationBuilder::new()
//!     .register_fn("fuel_system", || {
//!         Box::new(FuelSystem {
//!             metadata: PluginMetadata::builder("fuel_system", "1.0.0", "Airborne Team")
//!                 .plugin_type(PluginType::AircraftSystem)
//!                 .build()
//!                 .expect("valid metadata"),
//!             context: None,
//!             fuel_kg: 5_000.0,
//!         })
//!     })
//!     .plugin(PluginSpec::new("fuel_system", "fuel_main"))
//!     .build()?;
//!
//! game_loop.run_for(Some(600));
//! game_loop.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod context;
pub mod dependency;
pub mod error;
pub mod event;
pub mod game_loop;
pub mod input;
pub mod loader;
pub mod messaging;
pub mod plugin;
pub mod registry;
pub mod utils;

pub use builder::{PluginSpec, SimulationBuilder};
pub use context::{ConfigMap, PluginContext, Services};
pub use dependency::{resolve_load_order, DependencyNode};
pub use error::{
    ConfigError, DependencyError, EventError, InputError, KernelError, MetadataError, PluginError, RegistryError,
};
pub use event::{Event, EventBus, EventPriority, SubscriptionId};
pub use game_loop::{FrameReport, GameLoop, LoopHandle, LoopSettings};
pub use input::{
    ActionBinding, ActionBindingRegistry, ActionInputHandler, AxisDirection, InputBinding, InputEvent, InputHandler,
    InputHandlerInfo, InputHandlerManager, InputSource, KeyModifiers,
};
pub use loader::{PluginFactory, PluginLoader, PluginStateChanged, SimplePluginFactory, KERNEL_SENDER};
pub use messaging::{
    Message, MessageData, MessageHandler, MessagePriority, MessageQueue, MessageSink, MessageTopic, NullSink,
    Recipients, BROADCAST, DEFAULT_MESSAGE_BUDGET,
};
pub use plugin::{
    Plugin, PluginInfo, PluginMetadata, PluginMetadataBuilder, PluginState, PluginStatus, PluginType,
    DEFAULT_UPDATE_PRIORITY, MAX_UPDATE_PRIORITY,
};
pub use registry::{ComponentConfig, ComponentRegistry};

/// Result type used throughout the kernel
pub type Result<T, E = KernelError> = std::result::Result<T, E>;
