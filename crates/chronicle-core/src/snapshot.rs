//! Snapshot repository abstraction for non-event-sourced aggregates.

use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::NotificationBus;
use crate::error::DomainError;

/// Current-state record of a snapshot-strategy aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Aggregate identifier.
    pub aggregate_id: Uuid,
    /// Version of the last event folded into `state`.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
}

/// Storage for aggregate snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Loads the snapshot for `aggregate_id`.
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError>;

    /// Loads every stored snapshot.
    async fn get_all(&self) -> Result<Vec<Snapshot>, DomainError>;

    /// Inserts or replaces a snapshot.
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError>;

    /// Removes the snapshot for `aggregate_id`, if any.
    async fn delete(&self, aggregate_id: Uuid) -> Result<(), DomainError>;

    /// Feed of changes made through this repository, if it reports them.
    fn changes(&self) -> Option<&dyn NotificationBus> {
        None
    }
}
