//! In-memory event store, manifest and snapshot repository.
//!
//! Suitable for tests and single-process deployments. State lives for as long
//! as the value does; nothing is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chronicle_core::bus::{InMemoryNotificationBus, Notification, NotificationBus};
use chronicle_core::error::DomainError;
use chronicle_core::manifest::Manifest;
use chronicle_core::snapshot::{Snapshot, SnapshotRepository};
use chronicle_core::store::{EventStore, StoredEvent};
use uuid::Uuid;

/// Event store keeping each aggregate's stream in a vector.
///
/// An append must continue its stream: a record whose version is not exactly
/// one past the stream's last version is rejected with
/// `DomainError::ConcurrencyConflict`.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<Uuid, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for `aggregate_id`.
    #[must_use]
    pub fn stream_len(&self, aggregate_id: Uuid) -> usize {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&aggregate_id)
            .map_or(0, Vec::len)
    }
}

fn current_version(stream: &[StoredEvent]) -> i64 {
    stream.last().map_or(0, |event| event.version)
}

fn check_next(stream: &[StoredEvent], event: &StoredEvent, offset: i64) -> Result<(), DomainError> {
    let actual = current_version(stream) + offset;
    if event.version == actual + 1 {
        Ok(())
    } else {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id: event.aggregate_id,
            expected: event.version - 1,
            actual,
        })
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_event(&self, aggregate_id: Uuid) -> Result<Option<StoredEvent>, DomainError> {
        Ok(self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&aggregate_id)
            .and_then(|stream| stream.last().cloned()))
    }

    async fn append(&self, event: StoredEvent) -> Result<(), DomainError> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let stream = streams.entry(event.aggregate_id).or_default();
        check_next(stream, &event, 0)?;
        stream.push(event);
        Ok(())
    }

    /// Appends the whole batch or nothing.
    async fn append_events(&self, events: Vec<StoredEvent>) -> Result<(), DomainError> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending: HashMap<Uuid, i64> = HashMap::new();
        for event in &events {
            let offset = pending.entry(event.aggregate_id).or_insert(0);
            let stream = streams.get(&event.aggregate_id).map_or(&[][..], Vec::as_slice);
            check_next(stream, event, *offset)?;
            *offset += 1;
        }
        for event in events {
            streams.entry(event.aggregate_id).or_default().push(event);
        }
        Ok(())
    }
}

/// Manifest holding one version per aggregate in a map.
#[derive(Debug, Default)]
pub struct InMemoryManifest {
    versions: Mutex<HashMap<Uuid, i64>>,
}

impl InMemoryManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Manifest for InMemoryManifest {
    async fn version(&self, aggregate_id: Uuid) -> Result<Option<i64>, DomainError> {
        Ok(self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&aggregate_id)
            .copied())
    }

    async fn update_manifest(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), DomainError> {
        let mut versions = self.versions.lock().unwrap_or_else(PoisonError::into_inner);
        let current = versions.get(&aggregate_id).copied().unwrap_or(0);
        if current > expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }
        if current < expected_version {
            tracing::warn!(
                %aggregate_id,
                current,
                expected_version,
                "manifest behind event log, advancing"
            );
        }
        versions.insert(aggregate_id, new_version);
        Ok(())
    }

    async fn remove(&self, aggregate_id: Uuid) -> Result<(), DomainError> {
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&aggregate_id);
        Ok(())
    }
}

/// Snapshot repository backed by an ordered map.
///
/// Created with [`InMemorySnapshotRepository::with_change_feed`], it reports
/// `snapshot.saved` and `snapshot.deleted` notifications for every change.
#[derive(Debug, Default)]
pub struct InMemorySnapshotRepository {
    snapshots: Mutex<BTreeMap<Uuid, Snapshot>>,
    changes: Option<InMemoryNotificationBus>,
}

impl InMemorySnapshotRepository {
    /// Creates an empty repository without a change feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty repository that reports its changes.
    #[must_use]
    pub fn with_change_feed() -> Self {
        Self {
            snapshots: Mutex::default(),
            changes: Some(InMemoryNotificationBus::new()),
        }
    }

    fn report(&self, snapshot: &Snapshot, event_type: &str) {
        let Some(changes) = &self.changes else {
            return;
        };
        changes.publish(&Notification {
            aggregate_kind: String::new(),
            aggregate_id: snapshot.aggregate_id,
            event_id: Uuid::now_v7(),
            version: snapshot.version,
            event_type: event_type.to_owned(),
            payload: snapshot.state.clone(),
        });
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&aggregate_id)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<Snapshot>, DomainError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.aggregate_id, snapshot.clone());
        self.report(&snapshot, "snapshot.saved");
        Ok(())
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), DomainError> {
        let removed = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&aggregate_id);
        if let Some(snapshot) = removed {
            self.report(&snapshot, "snapshot.deleted");
        }
        Ok(())
    }

    fn changes(&self) -> Option<&dyn NotificationBus> {
        self.changes.as_ref().map(|bus| bus as &dyn NotificationBus)
    }
}
