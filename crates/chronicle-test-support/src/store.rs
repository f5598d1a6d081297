//! Test stores: mock `EventStore` and `Manifest` implementations for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::manifest::Manifest;
use chronicle_core::store::{EventStore, StoredEvent};
use uuid::Uuid;

/// Shared, ordered record of calls made against several mocks.
///
/// Lets a test assert the relative order of store, manifest and bus calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    /// Returns a copy of every entry so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// An event store that keeps appended records in memory and records every
/// append. Does not enforce version contiguity, so tests can seed arbitrary
/// histories.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    streams: Mutex<HashMap<Uuid, Vec<StoredEvent>>>,
    appended: Mutex<Vec<StoredEvent>>,
    disposals: AtomicUsize,
    log: CallLog,
}

impl RecordingEventStore {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that writes to `log` on every append.
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Pre-populates the store without recording the records as appended.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn seeded(self, events: Vec<StoredEvent>) -> Self {
        {
            let mut streams = self.streams.lock().unwrap();
            for event in events {
                streams.entry(event.aggregate_id).or_default().push(event);
            }
        }
        self
    }

    /// Returns a snapshot of all records appended through the trait.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_events(&self) -> Vec<StoredEvent> {
        self.appended.lock().unwrap().clone()
    }

    /// Number of `dispose` calls received.
    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, event: StoredEvent) -> Result<(), DomainError> {
        self.log.record(format!("append v{}", event.version));
        self.appended.lock().unwrap().push(event.clone());
        self.streams
            .lock()
            .unwrap()
            .entry(event.aggregate_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn load_events(&self, _aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn append(&self, _event: StoredEvent) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}

/// A manifest that records every update and applies the compare-and-set
/// rule of the `Manifest` contract.
#[derive(Debug, Default)]
pub struct RecordingManifest {
    entries: Mutex<HashMap<Uuid, i64>>,
    updates: Mutex<Vec<(Uuid, i64, i64)>>,
    log: CallLog,
}

impl RecordingManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manifest that writes to `log` on every update.
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Returns every `(aggregate_id, expected, new)` update received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn updates(&self) -> Vec<(Uuid, i64, i64)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Manifest for RecordingManifest {
    async fn version(&self, aggregate_id: Uuid) -> Result<Option<i64>, DomainError> {
        Ok(self.entries.lock().unwrap().get(&aggregate_id).copied())
    }

    async fn update_manifest(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), DomainError> {
        self.log.record(format!("manifest v{new_version}"));
        self.updates
            .lock()
            .unwrap()
            .push((aggregate_id, expected_version, new_version));
        let mut entries = self.entries.lock().unwrap();
        let current = entries.get(&aggregate_id).copied().unwrap_or(0);
        if current > expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }
        entries.insert(aggregate_id, new_version);
        Ok(())
    }

    async fn remove(&self, aggregate_id: Uuid) -> Result<(), DomainError> {
        self.log.record("manifest remove");
        self.entries.lock().unwrap().remove(&aggregate_id);
        Ok(())
    }
}

/// A manifest that always returns an infrastructure error.
#[derive(Debug)]
pub struct FailingManifest;

#[async_trait]
impl Manifest for FailingManifest {
    async fn version(&self, _aggregate_id: Uuid) -> Result<Option<i64>, DomainError> {
        Err(DomainError::Infrastructure("manifest unavailable".into()))
    }

    async fn update_manifest(
        &self,
        _aggregate_id: Uuid,
        _expected_version: i64,
        _new_version: i64,
    ) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("manifest unavailable".into()))
    }

    async fn remove(&self, _aggregate_id: Uuid) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("manifest unavailable".into()))
    }
}
