use crate::error::InputError;
use crate::input::event::InputEvent;

/// Priority band for modal overlays (menus, dialogs)
pub const MODAL_PRIORITY: i32 = 0;

/// Priority band for contextual panels
pub const PANEL_PRIORITY: i32 = 100;

/// Priority band for default flight controls
pub const DEFAULT_CONTROLS_PRIORITY: i32 = 200;

/// A link in the input dispatch chain.
///
/// Handlers are asked in ascending `priority`; the first one returning
/// `Ok(true)` from `handle_input` consumes the event.
pub trait InputHandler: Send {
    /// Unique name within a manager
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn can_handle_input(&self, event: &InputEvent) -> bool;

    /// Returns `true` when the event was consumed
    fn handle_input(&mut self, event: &InputEvent) -> Result<bool, InputError>;

    fn is_active(&self) -> bool {
        true
    }
}
