//! Utility functions and helpers

use std::any::Any;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Extract a readable message from a caught panic payload
pub fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Deep-merge `overlay` into `base`. Nested objects merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn merge_config(
    base: &mut serde_json::Map<String, serde_json::Value>,
    overlay: &serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(incoming)) => {
                merge_config(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_timestamp_nonzero() {
        assert!(current_timestamp() > 0);
    }

    #[test]
    fn test_panic_message_variants() {
        let static_payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(static_payload.as_ref()), "boom");

        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(owned_payload.as_ref()), "owned boom");

        let other_payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other_payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_merge_config_nested() {
        let mut base = as_map(json!({
            "units": "metric",
            "weather": { "wind": 10, "visibility": 9999 }
        }));
        let overlay = as_map(json!({
            "weather": { "wind": 25 },
            "livery": "classic"
        }));

        merge_config(&mut base, &overlay);

        assert_eq!(base["units"], "metric");
        assert_eq!(base["weather"]["wind"], 25);
        assert_eq!(base["weather"]["visibility"], 9999);
        assert_eq!(base["livery"], "classic");
    }

    #[test]
    fn test_merge_config_scalar_replaces_object() {
        let mut base = as_map(json!({ "weather": { "wind": 10 } }));
        let overlay = as_map(json!({ "weather": "off" }));
        merge_config(&mut base, &overlay);
        assert_eq!(base["weather"], "off");
    }
}
