//! Named actions bound to raw inputs.
//!
//! An [`ActionBinding`] maps an action name (`gear_toggle`, `elevator`...) to
//! one or more [`InputBinding`]s. [`ActionInputHandler`] plugs a registry of
//! actions into the input chain and turns every matched action into a
//! `flight.control_input` message.

use crate::error::InputError;
use crate::input::event::{InputEvent, KeyModifiers, DEFAULT_AXIS_THRESHOLD};
use crate::input::handler::{InputHandler, DEFAULT_CONTROLS_PRIORITY};
use crate::messaging::{Message, MessageData, MessageQueue, MessageTopic};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

fn default_threshold() -> f64 {
    DEFAULT_AXIS_THRESHOLD
}

fn default_enabled() -> bool {
    true
}

/// Which way an axis must be deflected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisDirection {
    Positive,
    Negative,
    #[default]
    Both,
}

/// One raw input that can trigger an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputBinding {
    Key {
        key: u32,
        #[serde(default)]
        modifiers: KeyModifiers,
    },
    Button {
        button: u32,
        #[serde(default)]
        device_id: Option<u32>,
    },
    Axis {
        axis: u32,
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default)]
        direction: AxisDirection,
        #[serde(default)]
        device_id: Option<u32>,
    },
    Hat {
        hat: u32,
        position: (i8, i8),
        #[serde(default)]
        device_id: Option<u32>,
    },
    Network {
        command: String,
    },
}

impl InputBinding {
    pub fn matches(&self, event: &InputEvent) -> bool {
        match self {
            InputBinding::Key { key, modifiers } => event.matches_keyboard(*key, *modifiers),
            InputBinding::Button { button, device_id } => event.matches_button(*button, *device_id),
            InputBinding::Axis {
                axis,
                threshold,
                direction,
                device_id,
            } => {
                if !event.matches_axis(*axis, *threshold, *device_id) {
                    return false;
                }
                let value = event.axis_value().unwrap_or(0.0);
                match direction {
                    AxisDirection::Both => true,
                    AxisDirection::Positive => value > 0.0,
                    AxisDirection::Negative => value < 0.0,
                }
            }
            InputBinding::Hat {
                hat,
                position,
                device_id,
            } => event.matches_hat(*hat, *position, *device_id),
            InputBinding::Network { command } => event.matches_network_command(command),
        }
    }
}

/// A named action and the inputs that trigger it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<InputBinding>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ActionBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_input(mut self, input: InputBinding) -> Self {
        self.inputs.push(input);
        self
    }

    /// Enabled and at least one input matches
    pub fn matches(&self, event: &InputEvent) -> bool {
        self.enabled && self.inputs.iter().any(|input| input.matches(event))
    }
}

/// Action bindings in registration order
#[derive(Debug, Clone, Default)]
pub struct ActionBindingRegistry {
    actions: Vec<ActionBinding>,
}

impl ActionBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, rejecting duplicate names
    pub fn from_bindings(bindings: impl IntoIterator<Item = ActionBinding>) -> Result<Self, InputError> {
        let mut registry = Self::new();
        for binding in bindings {
            registry.register(binding)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, binding: ActionBinding) -> Result<(), InputError> {
        if self.get_binding(&binding.name).is_some() {
            return Err(InputError::DuplicateAction(binding.name));
        }
        self.actions.push(binding);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<ActionBinding> {
        let index = self.actions.iter().position(|a| a.name == name)?;
        Some(self.actions.remove(index))
    }

    pub fn get_binding(&self, name: &str) -> Option<&ActionBinding> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Returns `false` if no action has that name
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.actions.iter_mut().find(|a| a.name == name) {
            Some(action) => {
                action.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Names of enabled actions triggered by `event`
    pub fn matching_actions(&self, event: &InputEvent) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| a.matches(event))
            .map(|a| a.name.as_str())
            .collect()
    }

    pub fn actions(&self) -> &[ActionBinding] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

/// Input handler that publishes a control message for each matched action
pub struct ActionInputHandler {
    name: String,
    priority: i32,
    active: bool,
    bindings: ActionBindingRegistry,
    queue: Arc<MessageQueue>,
}

impl ActionInputHandler {
    pub fn new(name: impl Into<String>, bindings: ActionBindingRegistry, queue: Arc<MessageQueue>) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_CONTROLS_PRIORITY,
            active: true,
            bindings,
            queue,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn bindings(&self) -> &ActionBindingRegistry {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut ActionBindingRegistry {
        &mut self.bindings
    }
}

impl InputHandler for ActionInputHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle_input(&self, event: &InputEvent) -> bool {
        self.bindings.actions().iter().any(|a| a.matches(event))
    }

    fn handle_input(&mut self, event: &InputEvent) -> Result<bool, InputError> {
        let actions = self.bindings.matching_actions(event);
        if actions.is_empty() {
            return Ok(false);
        }

        let value = event.axis_value().unwrap_or(1.0);
        for action in actions {
            debug!("🕹️ Action {} = {:.3}", action, value);
            self.queue.publish(Message::new(
                self.name.clone(),
                MessageTopic::ControlInput,
                MessageData::ControlInput {
                    control: action.to_string(),
                    value,
                },
            ));
        }
        Ok(true)
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
