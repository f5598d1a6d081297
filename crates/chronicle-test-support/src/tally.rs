//! Test aggregates: a minimal counter in both persistence strategies.

use chronicle_core::aggregate::{AggregateRoot, Persistence};
use chronicle_core::command::{Command, Handles};
use chronicle_core::error::DomainError;
use chronicle_core::event::{Clock, DomainEvent, EventMetadata};
use chronicle_core::serializer::EventSerializer;
use chronicle_core::store::StoredEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload variants for [`TallyEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TallyEventKind {
    /// The tally was opened.
    Opened,
    /// An amount was added.
    Added {
        /// Amount added.
        amount: i64,
    },
}

/// Event envelope for [`Tally`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: TallyEventKind,
}

impl DomainEvent for TallyEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            TallyEventKind::Opened => "tally.opened",
            TallyEventKind::Added { .. } => "tally.added",
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or_default()
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut EventMetadata {
        &mut self.metadata
    }
}

/// Event-sourced counter.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Current version (event count).
    pub version: i64,
    /// Running total.
    pub total: i64,
    #[serde(skip)]
    uncommitted_events: Vec<TallyEvent>,
}

impl Tally {
    /// Opens the tally under `id`.
    pub fn open(&mut self, id: Uuid, clock: &dyn Clock) {
        self.id = id;
        self.record(TallyEventKind::Opened, clock);
    }

    /// Adds `amount` to the total.
    pub fn add(&mut self, amount: i64, clock: &dyn Clock) {
        self.record(TallyEventKind::Added { amount }, clock);
    }

    fn record(&mut self, kind: TallyEventKind, clock: &dyn Clock) {
        let correlation_id = Uuid::new_v4();
        let mut event = TallyEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: String::new(),
                aggregate_id: self.id,
                sequence_number: self.version + 1,
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        event.event_type().clone_into(&mut event.metadata.event_type);
        self.apply(&event);
        self.uncommitted_events.push(event);
    }
}

impl AggregateRoot for Tally {
    type Event = TallyEvent;

    const KIND: &'static str = "tally";

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        self.id = event.metadata.aggregate_id;
        if let TallyEventKind::Added { amount } = event.kind {
            self.total += amount;
        }
        self.version = event.metadata.sequence_number;
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }
}

/// Snapshot-strategy counter sharing [`Tally`]'s behaviour.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTally(pub Tally);

impl AggregateRoot for SnapshotTally {
    type Event = TallyEvent;

    const KIND: &'static str = "snapshot_tally";
    const PERSISTENCE: Persistence = Persistence::Snapshot;

    fn aggregate_id(&self) -> Uuid {
        self.0.aggregate_id()
    }

    fn version(&self) -> i64 {
        self.0.version()
    }

    fn apply(&mut self, event: &Self::Event) {
        self.0.apply(event);
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        self.0.uncommitted_events()
    }

    fn clear_uncommitted_events(&mut self) {
        self.0.clear_uncommitted_events();
    }
}

/// Command adding an amount to a tally, opening it first if needed.
#[derive(Debug, Clone)]
pub struct AddToTally {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The tally identifier.
    pub tally_id: Uuid,
    /// The amount to add.
    pub amount: i64,
}

impl Command for AddToTally {
    fn command_type(&self) -> &'static str {
        "tally.add"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.tally_id
    }
}

impl Handles<AddToTally> for Tally {
    fn handle(&mut self, command: &AddToTally, clock: &dyn Clock) -> Result<(), DomainError> {
        if command.amount == 0 {
            return Err(DomainError::Validation(
                "amount must not be zero".into(),
            ));
        }
        if self.version == 0 {
            self.open(command.tally_id, clock);
        }
        self.add(command.amount, clock);
        Ok(())
    }
}

impl Handles<AddToTally> for SnapshotTally {
    fn handle(&mut self, command: &AddToTally, clock: &dyn Clock) -> Result<(), DomainError> {
        self.0.handle(command, clock)
    }
}

/// Encodes events the way the event-sourced repository stores them.
///
/// # Panics
///
/// Panics if an event cannot be encoded.
#[must_use]
pub fn stored_events(events: &[TallyEvent], serializer: &dyn EventSerializer) -> Vec<StoredEvent> {
    events
        .iter()
        .map(|event| {
            let value = serde_json::to_value(event).unwrap();
            StoredEvent::new(
                event.metadata.aggregate_id,
                event.metadata.event_id,
                event.metadata.sequence_number,
                serializer.serialize_to_string(&value).unwrap(),
            )
        })
        .collect()
}
