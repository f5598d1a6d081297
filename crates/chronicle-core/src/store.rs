//! Event store gateway abstraction.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DomainError;

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Version within the aggregate stream.
    pub version: i64,
    /// Serialized event, as produced by the event serializer.
    pub payload: String,
}

impl StoredEvent {
    /// Creates a stored record.
    #[must_use]
    pub fn new(aggregate_id: Uuid, event_id: Uuid, version: i64, payload: String) -> Self {
        Self {
            aggregate_id,
            event_id,
            version,
            payload,
        }
    }
}

/// Append-only, per-aggregate event log.
///
/// Implementations must reject an append whose version is already taken for
/// the aggregate with `DomainError::ConcurrencyConflict`; that check is what
/// makes concurrent saves safe.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Load all events for a given aggregate, ordered by version.
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError>;

    /// Load the most recent event for a given aggregate.
    async fn last_event(&self, aggregate_id: Uuid) -> Result<Option<StoredEvent>, DomainError> {
        Ok(self.load_events(aggregate_id).await?.pop())
    }

    /// Durably append one record.
    async fn append(&self, event: StoredEvent) -> Result<(), DomainError>;

    /// Append records in order.
    async fn append_events(&self, events: Vec<StoredEvent>) -> Result<(), DomainError> {
        for event in events {
            self.append(event).await?;
        }
        Ok(())
    }

    /// Release resources held on behalf of one repository.
    async fn dispose(&self) {}
}
