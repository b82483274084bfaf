//! Shared kernel services and the per-plugin context built from them

use crate::error::ConfigError;
use crate::event::{EventBus, SubscriptionId};
use crate::messaging::{Message, MessageData, MessagePriority, MessageQueue, MessageTopic, Recipients};
use crate::registry::ComponentRegistry;
use crate::utils::merge_config;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Free-form configuration table
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// The services every plugin shares, constructed once by the host
#[derive(Debug, Clone, Default)]
pub struct Services {
    pub event_bus: Arc<EventBus>,
    pub message_queue: Arc<MessageQueue>,
    pub registry: Arc<ComponentRegistry>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What a plugin sees of the kernel
#[derive(Debug)]
pub struct PluginContext {
    instance_id: String,
    services: Services,
    config: ConfigMap,
}

impl PluginContext {
    /// Build a context whose configuration is `global` deep-merged with
    /// `plugin`, plugin values winning
    pub fn new(instance_id: impl Into<String>, services: Services, global: &ConfigMap, plugin: &ConfigMap) -> Self {
        let mut config = global.clone();
        merge_config(&mut config, plugin);
        Self {
            instance_id: instance_id.into(),
            services,
            config,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.services.event_bus
    }

    pub fn message_queue(&self) -> &Arc<MessageQueue> {
        &self.services.message_queue
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.services.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Merged configuration
    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn config_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.get(key)
    }

    /// Deserialize `key` from the merged configuration.
    /// Returns `Ok(None)` when the key is absent.
    pub fn config_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.config.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ConfigError::InvalidField {
                    plugin: self.instance_id.clone(),
                    field: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Queue a broadcast message sent by this plugin
    pub fn publish(&self, topic: MessageTopic, data: MessageData) {
        self.send(topic, Recipients::All, data, MessagePriority::Normal);
    }

    /// Queue a message sent by this plugin
    pub fn send(&self, topic: MessageTopic, recipients: Recipients, data: MessageData, priority: MessagePriority) {
        let message = Message::new(self.instance_id.clone(), topic, data)
            .with_recipients(recipients)
            .with_priority(priority);
        self.services.message_queue.publish(message);
    }

    /// Receive messages on `topic` through `Plugin::handle_message`
    pub fn subscribe_messages(&self, topic: MessageTopic) -> SubscriptionId {
        self.services.message_queue.subscribe_sink(topic, &self.instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ConfigMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_config_merge_plugin_wins() {
        let global = map(json!({ "units": "metric", "sim_rate": 1.0 }));
        let plugin = map(json!({ "units": "imperial", "tank_count": 3 }));

        let context = PluginContext::new("fuel_main", Services::new(), &global, &plugin);

        assert_eq!(context.config_value("units"), Some(&json!("imperial")));
        assert_eq!(context.config_value("sim_rate"), Some(&json!(1.0)));
        assert_eq!(context.config_as::<u32>("tank_count").unwrap(), Some(3));
        assert_eq!(context.config_as::<u32>("missing").unwrap(), None);
    }

    #[test]
    fn test_config_as_reports_field() {
        let plugin = map(json!({ "tank_count": "three" }));
        let context = PluginContext::new("fuel_main", Services::new(), &ConfigMap::new(), &plugin);

        let err = context.config_as::<u32>("tank_count").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref plugin, ref field, .. }
            if plugin == "fuel_main" && field == "tank_count"));
    }

    #[test]
    fn test_publish_sets_sender() {
        let services = Services::new();
        let context = PluginContext::new("gear", services.clone(), &ConfigMap::new(), &ConfigMap::new());

        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        services.message_queue.subscribe(MessageTopic::GearPosition, "panel", move |m| {
            *sink.lock().unwrap() = Some(m.sender.clone());
            Ok(())
        });

        context.publish(MessageTopic::GearPosition, MessageData::Empty);
        services.message_queue.process(10);

        assert_eq!(seen.lock().unwrap().as_deref(), Some("gear"));
    }
}
