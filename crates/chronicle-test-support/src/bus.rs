//! Test buses and read-model builders.

use std::sync::{Arc, Mutex};

use chronicle_core::bus::{
    Handler, InMemoryNotificationBus, Notification, NotificationBus, Subscription,
};
use chronicle_core::error::DomainError;
use chronicle_core::read_model::ReadModelBuilder;

use crate::store::CallLog;

/// A bus that records every published notification and forwards it to an
/// inner in-memory bus so subscriptions still work.
#[derive(Debug, Default)]
pub struct RecordingBus {
    inner: InMemoryNotificationBus,
    published: Mutex<Vec<Notification>>,
    log: CallLog,
}

impl RecordingBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that writes to `log` on every publish.
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Returns every notification published so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<Notification> {
        self.published.lock().unwrap().clone()
    }

    /// Number of live subscriptions on the inner bus.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }
}

impl NotificationBus for RecordingBus {
    fn publish(&self, notification: &Notification) {
        self.log.record(format!("publish v{}", notification.version));
        self.published.lock().unwrap().push(notification.clone());
        self.inner.publish(notification);
    }

    fn subscribe(&self, handler: Handler) -> Subscription {
        self.inner.subscribe(handler)
    }
}

/// A read-model builder that records the notifications it handles.
///
/// Clones share the same record, so a test can keep one clone while the
/// registered factory hands out others.
#[derive(Debug, Clone)]
pub struct RecordingReadModelBuilder {
    name: String,
    handled: Arc<Mutex<Vec<Notification>>>,
    log: CallLog,
}

impl RecordingReadModelBuilder {
    /// Creates a builder with the given name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            handled: Arc::default(),
            log: CallLog::default(),
        }
    }

    /// Creates a builder that writes to `log` on every notification.
    #[must_use]
    pub fn with_log(name: &str, log: CallLog) -> Self {
        Self {
            log,
            ..Self::new(name)
        }
    }

    /// Returns every notification handled so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn handled(&self) -> Vec<Notification> {
        self.handled.lock().unwrap().clone()
    }
}

impl ReadModelBuilder for RecordingReadModelBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, notification: &Notification) -> Result<(), DomainError> {
        self.log
            .record(format!("{} v{}", self.name, notification.version));
        self.handled.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A read-model builder that rejects every notification.
#[derive(Debug)]
pub struct FailingReadModelBuilder;

impl ReadModelBuilder for FailingReadModelBuilder {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn handle(&self, _notification: &Notification) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("read model store offline".into()))
    }
}

/// A read-model builder that reports a change on its own feed for every
/// notification it handles.
#[derive(Debug, Default)]
pub struct ObservableReadModelBuilder {
    changes: InMemoryNotificationBus,
}

impl ObservableReadModelBuilder {
    /// Creates a builder with an empty change feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadModelBuilder for ObservableReadModelBuilder {
    fn name(&self) -> &'static str {
        "observable"
    }

    fn handle(&self, notification: &Notification) -> Result<(), DomainError> {
        let mut change = notification.clone();
        change.event_type = format!("{}.projected", notification.event_type);
        self.changes.publish(&change);
        Ok(())
    }

    fn changes(&self) -> Option<&dyn NotificationBus> {
        Some(&self.changes)
    }
}
