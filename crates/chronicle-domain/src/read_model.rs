//! Read-model fan-out for one aggregate type.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::bus::{Handler, Notification, NotificationBus, Subscription};
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::read_model::ReadModelBuilder;

use crate::context::DomainContext;

/// An instantiated read-model builder plus the subscription that republishes
/// its change feed.
pub struct BuilderHandle {
    builder: Box<dyn ReadModelBuilder>,
    changes: Mutex<Option<Subscription>>,
}

impl BuilderHandle {
    /// Wraps `builder`, subscribing to its change feed (if any) so every
    /// change is republished on `bus`.
    #[must_use]
    pub fn new(builder: Box<dyn ReadModelBuilder>, bus: &Arc<dyn NotificationBus>) -> Self {
        let changes = builder.changes().map(|feed| {
            let bus = Arc::clone(bus);
            let republish: Handler = Arc::new(move |change: &Notification| bus.publish(change));
            feed.subscribe(republish)
        });
        Self {
            builder,
            changes: Mutex::new(changes),
        }
    }

    /// Whether the builder's change feed is being republished.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stops republishing the builder's changes.
    pub fn release(&self) {
        let subscription = self
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(subscription);
    }
}

impl ReadModelBuilder for BuilderHandle {
    fn name(&self) -> &str {
        self.builder.name()
    }

    fn handle(&self, notification: &Notification) -> Result<(), DomainError> {
        self.builder.handle(notification)
    }

    fn changes(&self) -> Option<&dyn NotificationBus> {
        self.builder.changes()
    }
}

impl fmt::Debug for BuilderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderHandle")
            .field("name", &self.builder.name())
            .field("observed", &self.is_observed())
            .finish()
    }
}

/// Fan-out bus for one aggregate type.
///
/// Each published notification goes to every registered read-model builder,
/// in registration order, and then to the wrapped bus. A builder failure is
/// logged and does not stop delivery to the others.
pub struct ReadModelBuildingEventBus {
    aggregate_kind: &'static str,
    builders: Vec<BuilderHandle>,
    bus: Arc<dyn NotificationBus>,
}

impl ReadModelBuildingEventBus {
    /// Instantiates the builders registered for `T` and wraps `bus`.
    #[must_use]
    pub fn new<T: AggregateRoot>(context: &DomainContext, bus: Arc<dyn NotificationBus>) -> Self {
        let builders = context.get_read_model_builders::<T>(&bus);
        Self {
            aggregate_kind: T::KIND,
            builders,
            bus,
        }
    }

    /// Type tag stamped on every notification.
    #[must_use]
    pub fn aggregate_kind(&self) -> &'static str {
        self.aggregate_kind
    }

    /// The builders events are fanned out to.
    #[must_use]
    pub fn builders(&self) -> &[BuilderHandle] {
        &self.builders
    }

    /// Publishes committed events in their original order.
    pub fn publish_events<E: DomainEvent>(&self, events: &[E]) {
        for event in events {
            self.publish(&Notification::from_event(self.aggregate_kind, event));
        }
    }

    /// Releases every builder's change subscription.
    pub fn release(&self) {
        for builder in &self.builders {
            builder.release();
        }
    }
}

impl NotificationBus for ReadModelBuildingEventBus {
    fn publish(&self, notification: &Notification) {
        for builder in &self.builders {
            if let Err(err) = builder.handle(notification) {
                tracing::error!(
                    builder = builder.name(),
                    aggregate_kind = self.aggregate_kind,
                    aggregate_id = %notification.aggregate_id,
                    version = notification.version,
                    error = %err,
                    "read model builder failed to handle event"
                );
            }
        }
        self.bus.publish(notification);
    }

    fn subscribe(&self, handler: Handler) -> Subscription {
        self.bus.subscribe(handler)
    }
}

impl fmt::Debug for ReadModelBuildingEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadModelBuildingEventBus")
            .field("aggregate_kind", &self.aggregate_kind)
            .field("builders", &self.builders)
            .finish_non_exhaustive()
    }
}
