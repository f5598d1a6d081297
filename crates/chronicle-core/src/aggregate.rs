//! Aggregate root abstraction.

use uuid::Uuid;

use crate::event::DomainEvent;

/// How an aggregate type is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// State is a fold over the aggregate's event stream.
    EventSourced,
    /// State is stored as a current-value snapshot.
    Snapshot,
}

/// Trait for aggregate roots.
///
/// `Default` is the zero-argument factory used before hydration. The
/// version of the Nth uncommitted event must equal the version at load time
/// plus N.
pub trait AggregateRoot: Default + Send + Sync + 'static {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Stable type tag used to key registrations and notifications.
    const KIND: &'static str;

    /// Persistence strategy for this aggregate type.
    const PERSISTENCE: Persistence = Persistence::EventSourced;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of events applied).
    fn version(&self) -> i64;

    /// Apply an event to mutate internal state (used during reconstitution).
    ///
    /// Must touch nothing but the aggregate's own state.
    fn apply(&mut self, event: &Self::Event);

    /// Folds an ordered history into this instance.
    fn load_from_events(&mut self, history: &[Self::Event]) {
        for event in history {
            self.apply(event);
        }
    }

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);
}
