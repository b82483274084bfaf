//! Device-independent input events

use crate::context::ConfigMap;
use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Threshold used when an axis binding does not specify one
pub const DEFAULT_AXIS_THRESHOLD: f64 = 0.5;

/// Kind of device or channel an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Keyboard,
    JoystickButton,
    JoystickAxis,
    JoystickHat,
    ControllerButton,
    ControllerAxis,
    Network,
}

/// Keyboard modifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyModifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyModifiers {
    pub const NONE: KeyModifiers = KeyModifiers {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };
    pub const SHIFT: KeyModifiers = KeyModifiers { shift: true, ..Self::NONE };
    pub const CTRL: KeyModifiers = KeyModifiers { ctrl: true, ..Self::NONE };
    pub const ALT: KeyModifiers = KeyModifiers { alt: true, ..Self::NONE };
    pub const META: KeyModifiers = KeyModifiers { meta: true, ..Self::NONE };

    /// Whether any modifier set in `other` is also set here
    pub fn intersects(self, other: KeyModifiers) -> bool {
        (self.shift && other.shift) || (self.ctrl && other.ctrl) || (self.alt && other.alt) || (self.meta && other.meta)
    }

    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }
}

impl BitOr for KeyModifiers {
    type Output = KeyModifiers;

    fn bitor(self, rhs: Self) -> Self::Output {
        KeyModifiers {
            shift: self.shift || rhs.shift,
            ctrl: self.ctrl || rhs.ctrl,
            alt: self.alt || rhs.alt,
            meta: self.meta || rhs.meta,
        }
    }
}

/// One input occurrence, carrying only the fields its source needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputEvent {
    Keyboard {
        key: u32,
        modifiers: KeyModifiers,
    },
    JoystickButton {
        device_id: u32,
        button: u32,
    },
    JoystickAxis {
        device_id: u32,
        axis: u32,
        value: f64,
    },
    JoystickHat {
        device_id: u32,
        hat: u32,
        position: (i8, i8),
    },
    ControllerButton {
        device_id: u32,
        button: u32,
    },
    ControllerAxis {
        device_id: u32,
        axis: u32,
        value: f64,
    },
    Network {
        command: String,
        metadata: ConfigMap,
    },
}

fn clamp_axis(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

fn clamp_hat((x, y): (i8, i8)) -> (i8, i8) {
    (x.signum(), y.signum())
}

impl InputEvent {
    pub fn keyboard(key: u32, modifiers: KeyModifiers) -> Self {
        InputEvent::Keyboard { key, modifiers }
    }

    pub fn joystick_button(device_id: u32, button: u32) -> Self {
        InputEvent::JoystickButton { device_id, button }
    }

    /// `value` is clamped to [-1, 1]
    pub fn joystick_axis(device_id: u32, axis: u32, value: f64) -> Self {
        InputEvent::JoystickAxis {
            device_id,
            axis,
            value: clamp_axis(value),
        }
    }

    /// Each component of `position` is reduced to -1, 0 or 1
    pub fn joystick_hat(device_id: u32, hat: u32, position: (i8, i8)) -> Self {
        InputEvent::JoystickHat {
            device_id,
            hat,
            position: clamp_hat(position),
        }
    }

    pub fn controller_button(device_id: u32, button: u32) -> Self {
        InputEvent::ControllerButton { device_id, button }
    }

    /// `value` is clamped to [-1, 1]
    pub fn controller_axis(device_id: u32, axis: u32, value: f64) -> Self {
        InputEvent::ControllerAxis {
            device_id,
            axis,
            value: clamp_axis(value),
        }
    }

    pub fn network(command: impl Into<String>, metadata: ConfigMap) -> Self {
        InputEvent::Network {
            command: command.into(),
            metadata,
        }
    }

    pub fn source(&self) -> InputSource {
        match self {
            InputEvent::Keyboard { .. } => InputSource::Keyboard,
            InputEvent::JoystickButton { .. } => InputSource::JoystickButton,
            InputEvent::JoystickAxis { .. } => InputSource::JoystickAxis,
            InputEvent::JoystickHat { .. } => InputSource::JoystickHat,
            InputEvent::ControllerButton { .. } => InputSource::ControllerButton,
            InputEvent::ControllerAxis { .. } => InputSource::ControllerAxis,
            InputEvent::Network { .. } => InputSource::Network,
        }
    }

    /// Originating device, `None` for keyboard and network events
    pub fn device_id(&self) -> Option<u32> {
        match self {
            InputEvent::JoystickButton { device_id, .. }
            | InputEvent::JoystickAxis { device_id, .. }
            | InputEvent::JoystickHat { device_id, .. }
            | InputEvent::ControllerButton { device_id, .. }
            | InputEvent::ControllerAxis { device_id, .. } => Some(*device_id),
            InputEvent::Keyboard { .. } | InputEvent::Network { .. } => None,
        }
    }

    /// Axis deflection for axis events
    pub fn axis_value(&self) -> Option<f64> {
        match self {
            InputEvent::JoystickAxis { value, .. } | InputEvent::ControllerAxis { value, .. } => Some(*value),
            _ => None,
        }
    }

    fn device_matches(&self, device_id: Option<u32>) -> bool {
        device_id.is_none() || self.device_id() == device_id
    }

    /// Keyboard event for `key`; a non-empty `modifiers` set needs any one of them held
    pub fn matches_keyboard(&self, key: u32, modifiers: KeyModifiers) -> bool {
        match self {
            InputEvent::Keyboard {
                key: pressed,
                modifiers: held,
            } => *pressed == key && (modifiers.is_empty() || held.intersects(modifiers)),
            _ => false,
        }
    }

    /// Joystick or controller button, optionally from one device only
    pub fn matches_button(&self, button: u32, device_id: Option<u32>) -> bool {
        match self {
            InputEvent::JoystickButton { button: b, .. } | InputEvent::ControllerButton { button: b, .. } => {
                *b == button && self.device_matches(device_id)
            }
            _ => false,
        }
    }

    /// Joystick or controller axis deflected at least `threshold` either way
    pub fn matches_axis(&self, axis: u32, threshold: f64, device_id: Option<u32>) -> bool {
        match self {
            InputEvent::JoystickAxis { axis: a, value, .. } | InputEvent::ControllerAxis { axis: a, value, .. } => {
                *a == axis && value.abs() >= threshold && self.device_matches(device_id)
            }
            _ => false,
        }
    }

    /// Hat switch in exactly `position`
    pub fn matches_hat(&self, hat: u32, position: (i8, i8), device_id: Option<u32>) -> bool {
        match self {
            InputEvent::JoystickHat {
                hat: h,
                position: p,
                ..
            } => *h == hat && *p == clamp_hat(position) && self.device_matches(device_id),
            _ => false,
        }
    }

    pub fn matches_network_command(&self, command: &str) -> bool {
        matches!(self, InputEvent::Network { command: c, .. } if c == command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_G: u32 = 71;
    const KEY_P: u32 = 80;

    #[test]
    fn test_keyboard_matching() {
        let event = InputEvent::keyboard(KEY_G, KeyModifiers::CTRL | KeyModifiers::SHIFT);

        assert!(event.matches_keyboard(KEY_G, KeyModifiers::NONE));
        assert!(event.matches_keyboard(KEY_G, KeyModifiers::CTRL));
        assert!(event.matches_keyboard(KEY_G, KeyModifiers::CTRL | KeyModifiers::SHIFT));
        assert!(!event.matches_keyboard(KEY_G, KeyModifiers::ALT));
        assert!(!event.matches_keyboard(KEY_P, KeyModifiers::NONE));

        let plain = InputEvent::keyboard(KEY_G, KeyModifiers::NONE);
        assert!(!plain.matches_keyboard(KEY_G, KeyModifiers::CTRL));
    }

    #[test]
    fn test_keyboard_any_requested_modifier_matches() {
        let ctrl_only = InputEvent::keyboard(KEY_G, KeyModifiers::CTRL);

        assert!(ctrl_only.matches_keyboard(KEY_G, KeyModifiers::CTRL | KeyModifiers::SHIFT));
        assert!(!ctrl_only.matches_keyboard(KEY_G, KeyModifiers::ALT | KeyModifiers::META));
        assert!(KeyModifiers::CTRL.intersects(KeyModifiers::CTRL | KeyModifiers::ALT));
        assert!(!KeyModifiers::NONE.intersects(KeyModifiers::SHIFT));
    }

    #[test]
    fn test_button_matching_with_device_filter() {
        let event = InputEvent::joystick_button(2, 5);

        assert!(event.matches_button(5, None));
        assert!(event.matches_button(5, Some(2)));
        assert!(!event.matches_button(5, Some(3)));
        assert!(!event.matches_button(6, None));
        assert!(InputEvent::controller_button(0, 5).matches_button(5, None));
    }

    #[test]
    fn test_axis_threshold() {
        let event = InputEvent::joystick_axis(1, 0, -0.8);
        assert!(event.matches_axis(0, DEFAULT_AXIS_THRESHOLD, None));
        assert!(event.matches_axis(0, 0.8, Some(1)));

        let small = InputEvent::controller_axis(1, 0, 0.3);
        assert!(!small.matches_axis(0, DEFAULT_AXIS_THRESHOLD, None));
        assert!(!small.matches_axis(1, 0.1, None));
    }

    #[test]
    fn test_values_are_clamped() {
        assert_eq!(InputEvent::joystick_axis(0, 0, 4.0).axis_value(), Some(1.0));
        assert_eq!(InputEvent::controller_axis(0, 0, -9.0).axis_value(), Some(-1.0));
        assert_eq!(InputEvent::joystick_axis(0, 0, f64::NAN).axis_value(), Some(0.0));

        let hat = InputEvent::joystick_hat(0, 0, (5, -3));
        assert!(hat.matches_hat(0, (1, -1), None));
        assert!(!hat.matches_hat(0, (0, -1), None));
    }

    #[test]
    fn test_wrong_source_never_matches() {
        let key = InputEvent::keyboard(KEY_G, KeyModifiers::NONE);
        assert!(!key.matches_button(KEY_G, None));
        assert!(!key.matches_axis(0, 0.0, None));
        assert!(!key.matches_network_command("gear_down"));

        let network = InputEvent::network("gear_down", ConfigMap::new());
        assert!(network.matches_network_command("gear_down"));
        assert!(!network.matches_keyboard(KEY_G, KeyModifiers::NONE));
        assert_eq!(network.source(), InputSource::Network);
        assert_eq!(network.device_id(), None);
    }
}
