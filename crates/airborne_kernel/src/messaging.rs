//! Buffered topic messaging.
//!
//! `publish` only enqueues. Messages reach subscribers when the owner of the
//! queue calls [`MessageQueue::process`] (or [`MessageQueue::process_with`]),
//! which drains at most `max_messages` in FIFO order. Priority is carried on
//! the message for consumers but does not reorder the queue.

use crate::error::EventError;
use crate::event::{SubscriptionId, SubscriptionIds};
use crate::utils::{current_timestamp, panic_message};
use compact_str::CompactString;
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};
use uuid::Uuid;

/// Default number of messages drained per frame
pub const DEFAULT_MESSAGE_BUDGET: usize = 100;

/// Recipient wildcard accepted in configuration and topic routing
pub const BROADCAST: &str = "*";

/// Informational urgency of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

/// Topic vocabulary shared by plugins
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTopic {
    TemperatureChanged,
    PressureChanged,
    AltitudeChanged,
    ElectricalState,
    FuelState,
    EngineState,
    HydraulicState,
    PositionUpdated,
    FlightModeChanged,
    AutopilotEngaged,
    GearPosition,
    ControlInput,
    DoorState,
    BoardingProgress,
    PassengerEvent,
    TrafficUpdate,
    AtcMessage,
    CollisionDetected,
    TerrainElevation,
    TerrainUpdated,
    NearbyCities,
    KernelWarning,
    KernelFailure,
    /// Topic outside the standard vocabulary
    Custom(CompactString),
}

impl MessageTopic {
    const STANDARD: [MessageTopic; 23] = [
        MessageTopic::TemperatureChanged,
        MessageTopic::PressureChanged,
        MessageTopic::AltitudeChanged,
        MessageTopic::ElectricalState,
        MessageTopic::FuelState,
        MessageTopic::EngineState,
        MessageTopic::HydraulicState,
        MessageTopic::PositionUpdated,
        MessageTopic::FlightModeChanged,
        MessageTopic::AutopilotEngaged,
        MessageTopic::GearPosition,
        MessageTopic::ControlInput,
        MessageTopic::DoorState,
        MessageTopic::BoardingProgress,
        MessageTopic::PassengerEvent,
        MessageTopic::TrafficUpdate,
        MessageTopic::AtcMessage,
        MessageTopic::CollisionDetected,
        MessageTopic::TerrainElevation,
        MessageTopic::TerrainUpdated,
        MessageTopic::NearbyCities,
        MessageTopic::KernelWarning,
        MessageTopic::KernelFailure,
    ];

    /// Build a topic from its dotted name, mapping known names to their variant
    pub fn custom(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self::STANDARD
            .iter()
            .find(|topic| topic.as_str() == name)
            .cloned()
            .unwrap_or_else(|| MessageTopic::Custom(CompactString::from(name)))
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageTopic::TemperatureChanged => "env.temperature_changed",
            MessageTopic::PressureChanged => "env.pressure_changed",
            MessageTopic::AltitudeChanged => "env.altitude_changed",
            MessageTopic::ElectricalState => "system.electrical.state",
            MessageTopic::FuelState => "system.fuel.state",
            MessageTopic::EngineState => "system.engine.state",
            MessageTopic::HydraulicState => "system.hydraulic.state",
            MessageTopic::PositionUpdated => "flight.position_updated",
            MessageTopic::FlightModeChanged => "flight.mode_changed",
            MessageTopic::AutopilotEngaged => "flight.autopilot.engaged",
            MessageTopic::GearPosition => "flight.gear.position",
            MessageTopic::ControlInput => "flight.control_input",
            MessageTopic::DoorState => "cabin.door.state",
            MessageTopic::BoardingProgress => "cabin.boarding.progress",
            MessageTopic::PassengerEvent => "cabin.passenger.event",
            MessageTopic::TrafficUpdate => "network.traffic.update",
            MessageTopic::AtcMessage => "network.atc.message",
            MessageTopic::CollisionDetected => "physics.collision_detected",
            MessageTopic::TerrainElevation => "terrain.elevation",
            MessageTopic::TerrainUpdated => "terrain.updated",
            MessageTopic::NearbyCities => "terrain.nearby_cities",
            MessageTopic::KernelWarning => "kernel.warning",
            MessageTopic::KernelFailure => "kernel.failure",
            MessageTopic::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for MessageTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageTopic {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MessageTopic::custom(s))
    }
}

impl Serialize for MessageTopic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageTopic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(MessageTopic::custom(name))
    }
}

/// Who a message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Recipients {
    /// Every subscriber of the topic
    #[default]
    All,
    /// Only the listed subscriber ids
    Only(Vec<String>),
}

impl Recipients {
    /// Build from an id list; a list containing `"*"` means everyone
    pub fn from_list<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.iter().any(|id| id == BROADCAST) {
            Recipients::All
        } else {
            Recipients::Only(ids)
        }
    }

    pub fn includes(&self, subscriber: &str) -> bool {
        match self {
            Recipients::All => true,
            Recipients::Only(ids) => ids.iter().any(|id| id == subscriber),
        }
    }
}

/// Message payload: a tagged variant per well-known topic plus a generic map
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageData {
    #[default]
    Empty,
    /// Control surface or action input, `value` normalised to [-1, 1]
    ControlInput { control: String, value: f64 },
    Position {
        latitude: f64,
        longitude: f64,
        altitude_ft: f64,
        heading_deg: f64,
    },
    Traffic {
        callsign: String,
        latitude: f64,
        longitude: f64,
        altitude_ft: f64,
    },
    /// Kernel warning or failure report about a plugin
    Alert {
        plugin: String,
        state: String,
        reason: String,
    },
    Map(serde_json::Map<String, serde_json::Value>),
}

impl MessageData {
    /// Look up a key in a [`MessageData::Map`] payload
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            MessageData::Map(map) => map.get(key),
            _ => None,
        }
    }
}

/// A queued notification
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub recipients: Recipients,
    pub topic: MessageTopic,
    pub data: MessageData,
    pub priority: MessagePriority,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl Message {
    /// Broadcast message with normal priority
    pub fn new(sender: impl Into<String>, topic: MessageTopic, data: MessageData) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipients: Recipients::All,
            topic,
            data,
            priority: MessagePriority::Normal,
            timestamp: current_timestamp(),
        }
    }

    pub fn with_recipients(mut self, recipients: Recipients) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Callback subscribed to a topic
pub type MessageHandler = Arc<dyn Fn(&Message) -> Result<(), EventError> + Send + Sync>;

/// Receiver for subscriptions registered with [`MessageQueue::subscribe_sink`].
///
/// The loader implements this to route messages into `Plugin::handle_message`
/// while it keeps exclusive ownership of the plugins.
pub trait MessageSink {
    fn deliver(&mut self, subscriber: &str, message: &Message);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn deliver(&mut self, subscriber: &str, message: &Message) {
        debug!("🗑️ No sink for {} on {}", subscriber, message.topic);
    }
}

#[derive(Clone)]
enum Delivery {
    Handler(MessageHandler),
    Sink,
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    name: CompactString,
    delivery: Delivery,
}

/// Topic-based buffered message queue
#[derive(Default)]
pub struct MessageQueue {
    pending: Mutex<VecDeque<Message>>,
    subscribers: DashMap<MessageTopic, SmallVec<[Subscriber; 4]>>,
    ids: SubscriptionIds,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add_subscriber(&self, topic: MessageTopic, name: &str, delivery: Delivery) -> SubscriptionId {
        let id = self.ids.next();
        debug!("📝 {} subscribed to {} ({})", name, topic, id);
        self.subscribers.entry(topic).or_default().push(Subscriber {
            id,
            name: CompactString::from(name),
            delivery,
        });
        id
    }

    /// Subscribe a callback under `subscriber` to `topic`
    pub fn subscribe<F>(&self, topic: MessageTopic, subscriber: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.add_subscriber(topic, subscriber, Delivery::Handler(Arc::new(handler)))
    }

    /// Subscribe `subscriber` to `topic` with delivery through the
    /// [`MessageSink`] given to `process_with`
    pub fn subscribe_sink(&self, topic: MessageTopic, subscriber: &str) -> SubscriptionId {
        self.add_subscriber(topic, subscriber, Delivery::Sink)
    }

    /// Remove one subscription. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, topic: &MessageTopic, id: SubscriptionId) -> bool {
        let removed = match self.subscribers.get_mut(topic) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|sub| sub.id != id);
                before != list.len()
            }
            None => false,
        };
        self.subscribers.remove_if(topic, |_, list| list.is_empty());
        removed
    }

    /// Remove every subscription held by `subscriber`, returning how many
    pub fn unsubscribe_all(&self, subscriber: &str) -> usize {
        let mut removed = 0;
        for mut entry in self.subscribers.iter_mut() {
            let before = entry.len();
            entry.retain(|sub| sub.name != subscriber);
            removed += before - entry.len();
        }
        self.subscribers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Enqueue a message. Never invokes handlers.
    pub fn publish(&self, message: Message) {
        debug!("📥 Queued {} from {}", message.topic, message.sender);
        self.pending().push_back(message);
    }

    /// Drain up to `max_messages`, dropping sink deliveries
    pub fn process(&self, max_messages: usize) -> usize {
        self.process_with(max_messages, &mut NullSink)
    }

    /// Drain up to `max_messages` in FIFO order and return how many were taken.
    ///
    /// The queue lock is not held while subscribers run, so they may publish;
    /// anything they enqueue lands behind the current backlog. Handler errors
    /// and panics are logged and the drain continues.
    pub fn process_with(&self, max_messages: usize, sink: &mut dyn MessageSink) -> usize {
        let mut processed = 0;
        while processed < max_messages {
            let Some(message) = self.pending().pop_front() else {
                break;
            };
            processed += 1;
            self.dispatch(&message, sink);
        }
        processed
    }

    fn dispatch(&self, message: &Message, sink: &mut dyn MessageSink) {
        let targets: SmallVec<[Subscriber; 4]> = match self.subscribers.get(&message.topic) {
            Some(list) => list
                .iter()
                .filter(|sub| message.recipients.includes(&sub.name))
                .cloned()
                .collect(),
            None => SmallVec::new(),
        };

        if targets.is_empty() {
            debug!("📭 No recipients for {} from {}", message.topic, message.sender);
            return;
        }

        for target in targets {
            match &target.delivery {
                Delivery::Sink => sink.deliver(&target.name, message),
                Delivery::Handler(handler) => {
                    match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(
                                "❌ Message handler {} failed on {}: {}",
                                target.name, message.topic, e
                            );
                        }
                        Err(panic_info) => {
                            error!(
                                "❌ Message handler {} panicked on {}: {}",
                                target.name,
                                message.topic,
                                panic_message(panic_info.as_ref())
                            );
                        }
                    }
                }
            }
        }
    }

    /// Messages waiting to be processed
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    pub fn subscriber_count(&self, topic: &MessageTopic) -> usize {
        self.subscribers.get(topic).map(|list| list.len()).unwrap_or(0)
    }

    /// Discard queued messages, keeping subscriptions
    pub fn clear_pending(&self) {
        self.pending().clear();
    }

    /// Discard queued messages and every subscription
    pub fn clear(&self) {
        self.clear_pending();
        self.subscribers.clear();
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("pending", &self.pending_count())
            .field("topics", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_handler(counter: &Arc<AtomicUsize>) -> impl Fn(&Message) -> Result<(), EventError> {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fuel_message(sender: &str) -> Message {
        Message::new(sender, MessageTopic::FuelState, MessageData::Empty)
    }

    #[test]
    fn test_topic_names_round_trip() {
        assert_eq!(MessageTopic::ControlInput.to_string(), "flight.control_input");
        assert_eq!("system.fuel.state".parse::<MessageTopic>().unwrap(), MessageTopic::FuelState);
        assert_eq!(
            MessageTopic::custom("weather.cloud_layer"),
            MessageTopic::Custom(CompactString::from("weather.cloud_layer"))
        );
        let json = serde_json::to_string(&MessageTopic::GearPosition).unwrap();
        assert_eq!(json, "\"flight.gear.position\"");
    }

    #[test]
    fn test_publish_does_not_dispatch() {
        let queue = MessageQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        queue.subscribe(MessageTopic::FuelState, "fuel", counter_handler(&counter));

        queue.publish(fuel_message("engine"));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_process_respects_budget_and_carries_over() {
        let queue = MessageQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        queue.subscribe(MessageTopic::FuelState, "fuel", counter_handler(&counter));

        for _ in 0..250 {
            queue.publish(fuel_message("engine"));
        }

        assert_eq!(queue.process(DEFAULT_MESSAGE_BUDGET), 100);
        assert_eq!(queue.pending_count(), 150);
        assert_eq!(queue.process(DEFAULT_MESSAGE_BUDGET), 100);
        assert_eq!(queue.process(DEFAULT_MESSAGE_BUDGET), 50);
        assert_eq!(queue.process(DEFAULT_MESSAGE_BUDGET), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 250);
    }

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        queue.subscribe(MessageTopic::FuelState, "fuel", move |m| {
            sink.lock().unwrap().push(m.sender.clone());
            Ok(())
        });

        queue.publish(fuel_message("a").with_priority(MessagePriority::Low));
        queue.publish(fuel_message("b").with_priority(MessagePriority::Critical));
        queue.publish(fuel_message("c"));
        queue.process(10);

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_recipient_filter() {
        let queue = MessageQueue::new();
        let engine = Arc::new(AtomicUsize::new(0));
        let cabin = Arc::new(AtomicUsize::new(0));
        queue.subscribe(MessageTopic::FuelState, "engine", counter_handler(&engine));
        queue.subscribe(MessageTopic::FuelState, "cabin", counter_handler(&cabin));

        queue.publish(fuel_message("fuel").with_recipients(Recipients::from_list(["engine"])));
        queue.publish(fuel_message("fuel").with_recipients(Recipients::from_list(["*"])));
        queue.process(10);

        assert_eq!(engine.load(Ordering::SeqCst), 2);
        assert_eq!(cabin.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_do_not_stop_drain() {
        let queue = MessageQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        queue.subscribe(MessageTopic::FuelState, "broken", |_| {
            Err(EventError::HandlerExecutionFailed("sensor offline".into()))
        });
        queue.subscribe(MessageTopic::FuelState, "panicky", |_| panic!("gauge exploded"));
        queue.subscribe(MessageTopic::FuelState, "healthy", counter_handler(&counter));

        queue.publish(fuel_message("a"));
        queue.publish(fuel_message("b"));

        assert_eq!(queue.process(10), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_publishing_during_drain() {
        let queue = Arc::new(MessageQueue::new());
        let inner = queue.clone();
        queue.subscribe(MessageTopic::FuelState, "relay", move |_| {
            inner.publish(Message::new("relay", MessageTopic::EngineState, MessageData::Empty));
            Ok(())
        });

        queue.publish(fuel_message("a"));
        assert_eq!(queue.process(10), 2);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_unsubscribe_and_counts() {
        let queue = MessageQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = queue.subscribe(MessageTopic::FuelState, "fuel", counter_handler(&counter));
        queue.subscribe(MessageTopic::EngineState, "fuel", counter_handler(&counter));
        assert_eq!(queue.subscriber_count(&MessageTopic::FuelState), 1);

        assert!(queue.unsubscribe(&MessageTopic::FuelState, id));
        assert!(!queue.unsubscribe(&MessageTopic::FuelState, id));
        assert_eq!(queue.subscriber_count(&MessageTopic::FuelState), 0);

        assert_eq!(queue.unsubscribe_all("fuel"), 1);
        assert_eq!(queue.subscriber_count(&MessageTopic::EngineState), 0);
    }

    #[test]
    fn test_sink_delivery() {
        struct Recorder(Vec<String>);
        impl MessageSink for Recorder {
            fn deliver(&mut self, subscriber: &str, message: &Message) {
                self.0.push(format!("{subscriber}:{}", message.topic));
            }
        }

        let queue = MessageQueue::new();
        queue.subscribe_sink(MessageTopic::GearPosition, "gear");
        queue.publish(Message::new("cockpit", MessageTopic::GearPosition, MessageData::Empty));

        let mut recorder = Recorder(Vec::new());
        queue.process_with(5, &mut recorder);

        assert_eq!(recorder.0, vec!["gear:flight.gear.position"]);
    }

    #[test]
    fn test_payload_serde_shape() {
        let data = MessageData::ControlInput {
            control: "elevator".into(),
            value: -0.25,
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["kind"], "control_input");
        assert_eq!(value["control"], "elevator");
    }

    #[test]
    fn test_clear() {
        let queue = MessageQueue::new();
        queue.subscribe_sink(MessageTopic::FuelState, "fuel");
        queue.publish(fuel_message("a"));
        queue.clear();
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.subscriber_count(&MessageTopic::FuelState), 0);
    }
}
