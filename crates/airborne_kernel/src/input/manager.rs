//! Priority-ordered input dispatch

use crate::error::InputError;
use crate::input::event::InputEvent;
use crate::input::handler::InputHandler;
use crate::utils::panic_message;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info};

/// Introspection record for one registered handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputHandlerInfo {
    pub name: String,
    pub priority: i32,
    pub active: bool,
}

/// Ordered chain of input handlers. The first handler to consume an event
/// ends its dispatch.
#[derive(Default)]
pub struct InputHandlerManager {
    handlers: Vec<Box<dyn InputHandler>>,
}

impl InputHandlerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; names must be unique. Equal priorities keep
    /// registration order.
    pub fn register(&mut self, handler: Box<dyn InputHandler>) -> Result<(), InputError> {
        if self.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(InputError::DuplicateHandler(handler.name().to_string()));
        }
        info!("🎮 Registered input handler {} (priority {})", handler.name(), handler.priority());
        self.handlers.push(handler);
        self.handlers.sort_by_key(|h| h.priority());
        Ok(())
    }

    /// Remove and return the handler called `name`
    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn InputHandler>> {
        let index = self.handlers.iter().position(|h| h.name() == name)?;
        info!("🎮 Unregistered input handler {}", name);
        Some(self.handlers.remove(index))
    }

    pub fn get_handler(&self, name: &str) -> Option<&dyn InputHandler> {
        self.handlers
            .iter()
            .find(|h| h.name() == name)
            .map(|h| h.as_ref())
    }

    pub fn get_handler_mut(&mut self, name: &str) -> Option<&mut (dyn InputHandler + 'static)> {
        self.handlers
            .iter_mut()
            .find(|h| h.name() == name)
            .map(|h| h.as_mut())
    }

    /// Offer `event` to each active, interested handler in priority order.
    ///
    /// Returns whether a handler consumed it. A handler that errors or panics
    /// is logged and treated as not consuming.
    pub fn process_input(&mut self, event: &InputEvent) -> bool {
        for handler in self.handlers.iter_mut() {
            if !handler.is_active() || !handler.can_handle_input(event) {
                continue;
            }

            let outcome = match catch_unwind(AssertUnwindSafe(|| handler.handle_input(event))) {
                Ok(result) => result,
                Err(panic_info) => Err(InputError::Panicked {
                    handler: handler.name().to_string(),
                    reason: panic_message(panic_info.as_ref()),
                }),
            };

            match outcome {
                Ok(true) => {
                    debug!("🎮 {:?} consumed by {}", event.source(), handler.name());
                    return true;
                }
                Ok(false) => {}
                Err(e) => error!("❌ Input handler {} failed: {}", handler.name(), e),
            }
        }
        false
    }

    /// Handler names in dispatch order
    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn active_handler_count(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_active()).count()
    }

    pub fn handler_info(&self) -> Vec<InputHandlerInfo> {
        self.handlers
            .iter()
            .map(|h| InputHandlerInfo {
                name: h.name().to_string(),
                priority: h.priority(),
                active: h.is_active(),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl std::fmt::Debug for InputHandlerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputHandlerManager")
            .field("handlers", &self.handler_names())
            .finish()
    }
}
