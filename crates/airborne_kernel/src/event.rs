//! Synchronous, priority-ordered event bus.
//!
//! Handlers are keyed by the concrete event type and run in the publisher's
//! stack. Within one type they run CRITICAL first, LOW last, and handlers of
//! equal priority keep their registration order. A handler error stops the
//! dispatch and is returned to the publisher.

use crate::error::EventError;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Immutable notification carried by the [`EventBus`]
pub trait Event: Any + Send + Sync {
    /// Creation time in milliseconds since the Unix epoch
    fn timestamp(&self) -> u64;
}

/// Dispatch priority of an event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EventPriority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

/// Opaque handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Shared id source for the bus and the message queue
#[derive(Debug, Default)]
pub(crate) struct SubscriptionIds(AtomicU64);

impl SubscriptionIds {
    pub(crate) fn next(&self) -> SubscriptionId {
        SubscriptionId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

type ErasedHandler = Arc<dyn Fn(&dyn Any) -> Result<(), EventError> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    priority: EventPriority,
    handler: ErasedHandler,
}

/// Typed publish/subscribe hub
#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<TypeId, SmallVec<[Subscription; 4]>>,
    ids: SubscriptionIds,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of type `E`.
    ///
    /// The handler is placed after every existing handler whose priority is
    /// less than or equal to `priority`, which keeps ties in registration order.
    pub fn subscribe<E, F>(&self, handler: F, priority: EventPriority) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let id = self.ids.next();
        let erased: ErasedHandler = Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(event) => handler(event),
            None => Ok(()),
        });

        let mut list = self.handlers.entry(TypeId::of::<E>()).or_default();
        let position = list
            .iter()
            .position(|existing| existing.priority > priority)
            .unwrap_or(list.len());
        list.insert(
            position,
            Subscription {
                id,
                priority,
                handler: erased,
            },
        );

        debug!(
            "📝 Registered {} handler {} for {}",
            format!("{priority:?}").to_lowercase(),
            id,
            std::any::type_name::<E>()
        );
        id
    }

    /// Remove a handler. Returns `false` when it was not registered.
    pub fn unsubscribe<E: Event>(&self, id: SubscriptionId) -> bool {
        let type_id = TypeId::of::<E>();
        let removed = match self.handlers.get_mut(&type_id) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|sub| sub.id != id);
                before != list.len()
            }
            None => false,
        };

        self.handlers.remove_if(&type_id, |_, list| list.is_empty());
        removed
    }

    /// Deliver `event` to every handler of its type, in priority order.
    ///
    /// Handlers are snapshotted first, so a handler may subscribe, unsubscribe
    /// or publish again without deadlocking; such changes apply to the next
    /// publish. The first handler error is returned and later handlers are
    /// skipped. Panics unwind through the caller.
    pub fn publish<E: Event>(&self, event: &E) -> Result<(), EventError> {
        let snapshot: SmallVec<[ErasedHandler; 4]> = match self.handlers.get(&TypeId::of::<E>()) {
            Some(list) => list.iter().map(|sub| sub.handler.clone()).collect(),
            None => return Ok(()),
        };

        debug!(
            "📤 Publishing {} to {} handlers",
            std::any::type_name::<E>(),
            snapshot.len()
        );

        for handler in snapshot {
            handler(event as &dyn Any)?;
        }
        Ok(())
    }

    /// Number of handlers registered for `E`
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Number of event types with at least one handler
    pub fn event_type_count(&self) -> usize {
        self.handlers.len()
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.handlers.clear();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct GearLowered {
        timestamp: u64,
    }

    impl Event for GearLowered {
        fn timestamp(&self) -> u64 {
            self.timestamp
        }
    }

    #[derive(Debug)]
    struct EngineStarted;

    impl Event for EngineStarted {
        fn timestamp(&self) -> u64 {
            0
        }
    }

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> impl Fn(&GearLowered) -> Result<(), EventError> {
        let log = log.clone();
        move |_| {
            log.lock().unwrap().push(label);
            Ok(())
        }
    }

    #[test]
    fn test_priority_and_registration_order() {
        let bus = EventBus::new();
        let log = recorder();

        bus.subscribe(push(&log, "low"), EventPriority::Low);
        bus.subscribe(push(&log, "normal-a"), EventPriority::Normal);
        bus.subscribe(push(&log, "critical"), EventPriority::Critical);
        bus.subscribe(push(&log, "normal-b"), EventPriority::Normal);
        bus.subscribe(push(&log, "high"), EventPriority::High);

        bus.publish(&GearLowered { timestamp: 1 }).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["critical", "high", "normal-a", "normal-b", "low"]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_prunes() {
        let bus = EventBus::new();
        let log = recorder();

        let id = bus.subscribe(push(&log, "only"), EventPriority::Normal);
        assert_eq!(bus.subscriber_count::<GearLowered>(), 1);

        assert!(bus.unsubscribe::<GearLowered>(id));
        assert!(!bus.unsubscribe::<GearLowered>(id));
        assert_eq!(bus.subscriber_count::<GearLowered>(), 0);
        assert_eq!(bus.event_type_count(), 0);

        bus.publish(&GearLowered { timestamp: 2 }).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_error_is_fail_fast() {
        let bus = EventBus::new();
        let log = recorder();

        bus.subscribe(push(&log, "first"), EventPriority::High);
        bus.subscribe(
            |_: &GearLowered| Err(EventError::HandlerExecutionFailed("gear jammed".into())),
            EventPriority::Normal,
        );
        bus.subscribe(push(&log, "never"), EventPriority::Low);

        let result = bus.publish(&GearLowered { timestamp: 3 });

        assert!(matches!(result, Err(EventError::HandlerExecutionFailed(ref m)) if m == "gear jammed"));
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_types_are_isolated() {
        let bus = EventBus::new();
        let log = recorder();
        bus.subscribe(push(&log, "gear"), EventPriority::Normal);

        bus.publish(&EngineStarted).unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count::<EngineStarted>(), 0);
    }

    #[test]
    fn test_reentrant_subscribe_applies_next_publish() {
        let bus = Arc::new(EventBus::new());
        let counter = Arc::new(AtomicU64::new(0));

        let inner_bus = bus.clone();
        let inner_counter = counter.clone();
        bus.subscribe(
            move |_: &GearLowered| {
                let c = inner_counter.clone();
                inner_bus.subscribe(
                    move |_: &GearLowered| {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                    EventPriority::Low,
                );
                Ok(())
            },
            EventPriority::Normal,
        );

        bus.publish(&GearLowered { timestamp: 4 }).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count::<GearLowered>(), 2);

        bus.publish(&GearLowered { timestamp: 5 }).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        let log = recorder();
        bus.subscribe(push(&log, "a"), EventPriority::Normal);
        bus.clear();
        assert_eq!(bus.subscriber_count::<GearLowered>(), 0);
    }
}
