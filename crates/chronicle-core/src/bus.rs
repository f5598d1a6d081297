//! Notification bus abstraction.
//!
//! Committed events leave a repository as type-erased [`Notification`]s so
//! one bus can carry events for every aggregate type. Subscriptions are RAII
//! values: dropping a [`Subscription`] removes its handler.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::DomainEvent;

/// A committed event as seen by bus subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Type tag of the aggregate that produced the event.
    pub aggregate_kind: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Version within the aggregate stream.
    pub version: i64,
    /// Event type name.
    pub event_type: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

impl Notification {
    /// Builds the notification for a domain event.
    #[must_use]
    pub fn from_event<E: DomainEvent>(aggregate_kind: &str, event: &E) -> Self {
        let meta = event.metadata();
        Self {
            aggregate_kind: aggregate_kind.to_owned(),
            aggregate_id: meta.aggregate_id,
            event_id: meta.event_id,
            version: meta.sequence_number,
            event_type: event.event_type().to_owned(),
            payload: event.to_payload(),
        }
    }
}

/// Callback invoked for every published notification.
pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Publish/subscribe channel for notifications.
pub trait NotificationBus: Send + Sync {
    /// Delivers `notification` to every current subscriber, in subscription
    /// order.
    fn publish(&self, notification: &Notification);

    /// Registers `handler` until the returned subscription is dropped.
    fn subscribe(&self, handler: Handler) -> Subscription;
}

/// Handle for a registered handler; unsubscribes on drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when released.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Removes the handler now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: BTreeMap<u64, Handler>,
}

/// In-process notification bus.
///
/// Handlers run synchronously on the publishing thread. The subscriber list
/// is copied before delivery, so a handler may publish or subscribe
/// re-entrantly.
#[derive(Clone, Default)]
pub struct InMemoryNotificationBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl InMemoryNotificationBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }
}

impl NotificationBus for InMemoryNotificationBus {
    fn publish(&self, notification: &Notification) {
        let handlers: Vec<Handler> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler(notification);
        }
    }

    fn subscribe(&self, handler: Handler) -> Subscription {
        let id = {
            let mut subscribers = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.handlers.insert(id, handler);
            id
        };
        let inner: Weak<Mutex<Subscribers>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .handlers
                    .remove(&id);
            }
        })
    }
}

impl fmt::Debug for InMemoryNotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryNotificationBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
