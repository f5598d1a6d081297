//! Test snapshot repository.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::bus::{InMemoryNotificationBus, Notification, NotificationBus};
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotRepository};
use uuid::Uuid;

/// A snapshot repository backed by a map. When built with
/// [`RecordingSnapshotRepository::observable`] it reports every save and
/// delete on its change feed.
#[derive(Debug, Default)]
pub struct RecordingSnapshotRepository {
    snapshots: Mutex<BTreeMap<Uuid, Snapshot>>,
    changes: Option<InMemoryNotificationBus>,
}

impl RecordingSnapshotRepository {
    /// Creates a repository without a change feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository that reports changes.
    #[must_use]
    pub fn observable() -> Self {
        Self {
            snapshots: Mutex::default(),
            changes: Some(InMemoryNotificationBus::new()),
        }
    }

    fn report(&self, aggregate_id: Uuid, version: i64, event_type: &str) {
        if let Some(changes) = &self.changes {
            changes.publish(&Notification {
                aggregate_kind: "snapshot".to_owned(),
                aggregate_id,
                event_id: Uuid::new_v4(),
                version,
                event_type: event_type.to_owned(),
                payload: serde_json::Value::Null,
            });
        }
    }
}

#[async_trait]
impl SnapshotRepository for RecordingSnapshotRepository {
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(self.snapshots.lock().unwrap().get(&aggregate_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Snapshot>, DomainError> {
        Ok(self.snapshots.lock().unwrap().values().cloned().collect())
    }

    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let (aggregate_id, version) = (snapshot.aggregate_id, snapshot.version);
        self.snapshots
            .lock()
            .unwrap()
            .insert(aggregate_id, snapshot);
        self.report(aggregate_id, version, "snapshot.saved");
        Ok(())
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), DomainError> {
        let removed = self.snapshots.lock().unwrap().remove(&aggregate_id);
        if let Some(snapshot) = removed {
            self.report(aggregate_id, snapshot.version, "snapshot.deleted");
        }
        Ok(())
    }

    fn changes(&self) -> Option<&dyn NotificationBus> {
        self.changes.as_ref().map(|bus| bus as &dyn NotificationBus)
    }
}
