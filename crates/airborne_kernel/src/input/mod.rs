//! Input events and the priority-ordered dispatch chain

pub mod binding;
pub mod event;
pub mod handler;
pub mod manager;

pub use binding::{ActionBinding, ActionBindingRegistry, ActionInputHandler, AxisDirection, InputBinding};
pub use event::{InputEvent, InputSource, KeyModifiers, DEFAULT_AXIS_THRESHOLD};
pub use handler::{InputHandler, DEFAULT_CONTROLS_PRIORITY, MODAL_PRIORITY, PANEL_PRIORITY};
pub use manager::{InputHandlerInfo, InputHandlerManager};
