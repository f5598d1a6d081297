//! Event-sourced aggregate repository.
//!
//! Aggregates are rehydrated by replaying their stored events and saved by
//! appending their uncommitted events under an optimistic concurrency check.
//!
//! A save runs these steps in order:
//!
//! 1. return if there is nothing to commit;
//! 2. compare the version the changes were made against with the last stored
//!    event (`ConcurrencyConflict` on mismatch);
//! 3. append every uncommitted event;
//! 4. advance the manifest;
//! 5. publish every event to the read-model building bus;
//! 6. clear the aggregate's uncommitted events.
//!
//! Events are appended before the manifest moves. The event log is the
//! source of truth for the check in step 2, and the manifest only advances,
//! so a crash between steps 3 and 4 leaves a lagging manifest that the next
//! save brings up to date.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::manifest::Manifest;
use chronicle_core::repository::AggregateRepository;
use chronicle_core::serializer::EventSerializer;
use chronicle_core::store::{EventStore, StoredEvent};
use uuid::Uuid;

use crate::read_model::ReadModelBuildingEventBus;

/// Repository persisting `T` as an append-only event stream.
pub struct EventSourcedAggregateRepository<T: AggregateRoot> {
    serializer: Arc<dyn EventSerializer>,
    store: Arc<dyn EventStore>,
    manifest: Arc<dyn Manifest>,
    bus: ReadModelBuildingEventBus,
    disposed: AtomicBool,
    _aggregate: PhantomData<fn() -> T>,
}

impl<T: AggregateRoot> EventSourcedAggregateRepository<T> {
    /// Creates a repository over the given collaborators.
    #[must_use]
    pub fn new(
        serializer: Arc<dyn EventSerializer>,
        store: Arc<dyn EventStore>,
        manifest: Arc<dyn Manifest>,
        bus: ReadModelBuildingEventBus,
    ) -> Self {
        Self {
            serializer,
            store,
            manifest,
            bus,
            disposed: AtomicBool::new(false),
            _aggregate: PhantomData,
        }
    }

    /// The bus committed events are published to.
    #[must_use]
    pub fn bus(&self) -> &ReadModelBuildingEventBus {
        &self.bus
    }

    fn decode(&self, aggregate_id: Uuid, stored: &StoredEvent) -> Result<T::Event, DomainError> {
        let value = self.serializer.deserialize_from_string(&stored.payload)?;
        let mut event: T::Event = serde_json::from_value(value)?;
        // Serializers are not trusted to restore the identity faithfully.
        event.metadata_mut().aggregate_id = aggregate_id;
        Ok(event)
    }

    fn encode(&self, aggregate_id: Uuid, event: &T::Event) -> Result<StoredEvent, DomainError> {
        let value = serde_json::to_value(event)?;
        let meta = event.metadata();
        Ok(StoredEvent::new(
            aggregate_id,
            meta.event_id,
            meta.sequence_number,
            self.serializer.serialize_to_string(&value)?,
        ))
    }

    fn unsupported(operation: &'static str) -> DomainError {
        DomainError::Unsupported {
            operation,
            aggregate_kind: T::KIND,
        }
    }
}

#[async_trait]
impl<T: AggregateRoot> AggregateRepository<T> for EventSourcedAggregateRepository<T> {
    async fn get_by_id(&self, aggregate_id: Uuid) -> Result<Option<T>, DomainError> {
        let stored = self.store.load_events(aggregate_id).await?;
        if stored.is_empty() {
            tracing::debug!(aggregate_kind = T::KIND, %aggregate_id, "no events stored");
            return Ok(None);
        }

        let history = stored
            .iter()
            .map(|record| self.decode(aggregate_id, record))
            .collect::<Result<Vec<_>, _>>()?;

        let mut aggregate = self.new_instance();
        aggregate.load_from_events(&history);
        tracing::debug!(
            aggregate_kind = T::KIND,
            %aggregate_id,
            version = aggregate.version(),
            "aggregate rehydrated"
        );
        Ok(Some(aggregate))
    }

    async fn get_all(&self) -> Result<Vec<T>, DomainError> {
        Err(Self::unsupported("get_all"))
    }

    async fn save(&self, instance: &mut T) -> Result<(), DomainError> {
        let aggregate_id = instance.aggregate_id();
        let events = instance.uncommitted_events();
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(());
        };
        let expected_version = first.version() - 1;
        let new_version = last.version();

        let last_stored = self.store.last_event(aggregate_id).await?;
        let conflict = match &last_stored {
            None => (expected_version != 0).then_some(0),
            Some(record) => (record.version != expected_version).then_some(record.version),
        };
        if let Some(actual) = conflict {
            tracing::warn!(
                aggregate_kind = T::KIND,
                %aggregate_id,
                expected_version,
                actual_version = actual,
                "concurrency conflict"
            );
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let records = events
            .iter()
            .map(|event| self.encode(aggregate_id, event))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.append_events(records).await?;

        if let Err(err) = self
            .manifest
            .update_manifest(aggregate_id, expected_version, new_version)
            .await
        {
            tracing::warn!(
                aggregate_kind = T::KIND,
                %aggregate_id,
                new_version,
                error = %err,
                "events committed but manifest update failed"
            );
        }

        self.bus.publish_events(events);
        tracing::debug!(
            aggregate_kind = T::KIND,
            %aggregate_id,
            from_version = expected_version,
            to_version = new_version,
            "aggregate saved"
        );

        instance.clear_uncommitted_events();
        Ok(())
    }

    async fn delete(&self, _instance: &T) -> Result<(), DomainError> {
        Err(Self::unsupported("delete"))
    }

    async fn delete_id(&self, _aggregate_id: Uuid) -> Result<(), DomainError> {
        Err(Self::unsupported("delete_id"))
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.release();
        self.store.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chronicle_core::aggregate::AggregateRoot;
    use chronicle_core::error::DomainError;
    use chronicle_core::repository::AggregateRepository;
    use chronicle_core::serializer::JsonEventSerializer;
    use chronicle_test_support::{
        CallLog, FailingEventStore, FailingManifest, FixedClock, ObservableReadModelBuilder,
        RecordingBus, RecordingEventStore, RecordingManifest, RecordingReadModelBuilder, Tally,
        stored_events,
    };
    use uuid::Uuid;

    use crate::context::DomainContext;

    use super::EventSourcedAggregateRepository;

    struct Harness {
        store: Arc<RecordingEventStore>,
        manifest: Arc<RecordingManifest>,
        bus: Arc<RecordingBus>,
        projection: RecordingReadModelBuilder,
        repository: EventSourcedAggregateRepository<Tally>,
    }

    fn harness_with(
        store: RecordingEventStore,
        manifest: RecordingManifest,
        log: &CallLog,
    ) -> Harness {
        let store = Arc::new(store);
        let manifest = Arc::new(manifest);
        let bus = Arc::new(RecordingBus::with_log(log.clone()));
        let projection = RecordingReadModelBuilder::with_log("projection", log.clone());
        let mut context = DomainContext::new(store.clone(), manifest.clone());
        let registered = projection.clone();
        context.register_builder::<Tally>(move |_, _| Box::new(registered.clone()));
        let repository = context.event_sourced_repository::<Tally>(bus.clone());
        Harness {
            store,
            manifest,
            bus,
            projection,
            repository,
        }
    }

    fn harness() -> Harness {
        harness_with(
            RecordingEventStore::new(),
            RecordingManifest::new(),
            &CallLog::new(),
        )
    }

    fn new_tally(amounts: &[i64]) -> Tally {
        let clock = FixedClock::default();
        let mut tally = Tally::default();
        tally.open(Uuid::new_v4(), &clock);
        for amount in amounts {
            tally.add(*amount, &clock);
        }
        tally
    }

    #[test]
    fn test_new_instance_is_unhydrated() {
        let h = harness();

        let tally = h.repository.new_instance();

        assert_eq!(tally, Tally::default());
        assert_eq!(tally.version(), 0);
    }

    #[tokio::test]
    async fn test_get_by_id_returns_none_when_no_events() {
        let h = harness();

        let loaded = h.repository.get_by_id(Uuid::new_v4()).await.unwrap();

        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_replays_history_in_order() {
        // Arrange
        let source = new_tally(&[2, 3]);
        let records = stored_events(source.uncommitted_events(), &JsonEventSerializer);
        let h = harness_with(
            RecordingEventStore::new().seeded(records),
            RecordingManifest::new(),
            &CallLog::new(),
        );

        // Act
        let loaded = h.repository.get_by_id(source.id).await.unwrap().unwrap();

        // Assert
        assert_eq!(loaded.id, source.id);
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.total, 5);
        assert!(loaded.uncommitted_events().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id_forces_requested_identity_onto_events() {
        // Arrange
        let source = new_tally(&[7]);
        let requested = Uuid::new_v4();
        let records = stored_events(source.uncommitted_events(), &JsonEventSerializer)
            .into_iter()
            .map(|mut record| {
                record.aggregate_id = requested;
                record
            })
            .collect();
        let h = harness_with(
            RecordingEventStore::new().seeded(records),
            RecordingManifest::new(),
            &CallLog::new(),
        );

        // Act
        let loaded = h.repository.get_by_id(requested).await.unwrap().unwrap();

        // Assert
        assert_eq!(loaded.id, requested);
        assert_eq!(loaded.total, 7);
    }

    #[tokio::test]
    async fn test_get_by_id_surfaces_undecodable_payload() {
        // Arrange
        let aggregate_id = Uuid::new_v4();
        let record = chronicle_core::store::StoredEvent::new(
            aggregate_id,
            Uuid::new_v4(),
            1,
            "{\"unexpected\":true}".to_owned(),
        );
        let h = harness_with(
            RecordingEventStore::new().seeded(vec![record]),
            RecordingManifest::new(),
            &CallLog::new(),
        );

        // Act
        let result = h.repository.get_by_id(aggregate_id).await;

        // Assert
        match result {
            Err(DomainError::Serialization(_)) => {}
            other => panic!("expected Serialization, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_save_without_uncommitted_events_is_noop() {
        // Arrange
        let h = harness();
        let mut tally = Tally::default();

        // Act
        h.repository.save(&mut tally).await.unwrap();

        // Assert
        assert!(h.store.appended_events().is_empty());
        assert!(h.manifest.updates().is_empty());
        assert!(h.bus.published().is_empty());
        assert!(h.projection.handled().is_empty());
    }

    #[tokio::test]
    async fn test_save_appends_updates_manifest_publishes_and_commits() {
        // Arrange
        let log = CallLog::new();
        let h = harness_with(
            RecordingEventStore::with_log(log.clone()),
            RecordingManifest::with_log(log.clone()),
            &log,
        );
        let mut tally = new_tally(&[4]);
        let expected_ids: Vec<Uuid> = tally
            .uncommitted_events()
            .iter()
            .map(|e| e.metadata.event_id)
            .collect();

        // Act
        h.repository.save(&mut tally).await.unwrap();

        // Assert
        assert_eq!(
            log.entries(),
            vec![
                "append v1",
                "append v2",
                "manifest v2",
                "projection v1",
                "publish v1",
                "projection v2",
                "publish v2"
            ]
        );
        let appended = h.store.appended_events();
        let appended_ids: Vec<Uuid> = appended.iter().map(|r| r.event_id).collect();
        assert_eq!(appended_ids, expected_ids);
        assert!(appended.iter().all(|r| r.aggregate_id == tally.id));
        assert_eq!(h.manifest.updates(), vec![(tally.id, 0, 2)]);
        assert!(tally.uncommitted_events().is_empty());
        assert_eq!(tally.version, 2);
    }

    #[tokio::test]
    async fn test_save_then_get_by_id_round_trips_state() {
        let h = harness();
        let mut tally = new_tally(&[1, 2, 3]);

        h.repository.save(&mut tally).await.unwrap();
        let loaded = h.repository.get_by_id(tally.id).await.unwrap().unwrap();

        assert_eq!(loaded, tally);
    }

    #[tokio::test]
    async fn test_second_save_only_submits_new_events() {
        // Arrange
        let h = harness();
        let mut tally = new_tally(&[]);
        h.repository.save(&mut tally).await.unwrap();

        // Act
        tally.add(9, &FixedClock::default());
        h.repository.save(&mut tally).await.unwrap();

        // Assert
        let versions: Vec<i64> = h.store.appended_events().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(h.manifest.updates()[1], (tally.id, 1, 2));
    }

    #[tokio::test]
    async fn test_save_rejects_stale_copy() {
        // Arrange
        let h = harness();
        let mut original = new_tally(&[]);
        h.repository.save(&mut original).await.unwrap();
        let mut first = h.repository.get_by_id(original.id).await.unwrap().unwrap();
        let mut stale = h.repository.get_by_id(original.id).await.unwrap().unwrap();
        first.add(1, &FixedClock::default());
        h.repository.save(&mut first).await.unwrap();

        // Act
        stale.add(2, &FixedClock::default());
        let result = h.repository.save(&mut stale).await;

        // Assert
        match result {
            Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            }) => {
                assert_eq!(aggregate_id, original.id);
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert_eq!(stale.uncommitted_events().len(), 1);
        assert_eq!(h.store.appended_events().len(), 2);
        assert_eq!(h.bus.published().len(), 2);
    }

    #[tokio::test]
    async fn test_save_rejects_nonzero_expected_version_on_empty_stream() {
        // Arrange
        let h = harness();
        let source = new_tally(&[5]);
        let mut detached = Tally::default();
        detached.load_from_events(&source.uncommitted_events()[..1]);
        detached.add(5, &FixedClock::default());

        // Act
        let result = h.repository.save(&mut detached).await;

        // Assert
        match result {
            Err(DomainError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 0);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert!(h.store.appended_events().is_empty());
    }

    #[tokio::test]
    async fn test_manifest_failure_does_not_undo_commit() {
        // Arrange
        let store = Arc::new(RecordingEventStore::new());
        let bus = Arc::new(RecordingBus::new());
        let context = DomainContext::new(store.clone(), Arc::new(FailingManifest));
        let repository = context.event_sourced_repository::<Tally>(bus.clone());
        let mut tally = new_tally(&[]);

        // Act
        let result = repository.save(&mut tally).await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(store.appended_events().len(), 1);
        assert_eq!(bus.published().len(), 1);
        assert!(tally.uncommitted_events().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_events_uncommitted() {
        let context = DomainContext::new(
            Arc::new(FailingEventStore),
            Arc::new(RecordingManifest::new()),
        );
        let bus = Arc::new(RecordingBus::new());
        let repository = context.event_sourced_repository::<Tally>(bus.clone());
        let mut tally = new_tally(&[]);

        let result = repository.save(&mut tally).await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(tally.uncommitted_events().len(), 1);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_enumeration_and_deletion_are_unsupported() {
        let h = harness();
        let tally = new_tally(&[]);

        let results = [
            h.repository.get_all().await.map(|_| ()),
            h.repository.delete(&tally).await,
            h.repository.delete_id(tally.id).await,
        ];

        let operations: Vec<&str> = results
            .iter()
            .map(|result| match result {
                Err(DomainError::Unsupported {
                    operation,
                    aggregate_kind,
                }) => {
                    assert_eq!(*aggregate_kind, "tally");
                    *operation
                }
                other => panic!("expected Unsupported, got {other:?}"),
            })
            .collect();
        assert_eq!(operations, vec!["get_all", "delete", "delete_id"]);
    }

    #[tokio::test]
    async fn test_dispose_releases_store_once_and_drops_subscriptions() {
        // Arrange
        let store = Arc::new(RecordingEventStore::new());
        let bus = Arc::new(RecordingBus::new());
        let mut context = DomainContext::new(store.clone(), Arc::new(RecordingManifest::new()));
        context.register_builder::<Tally>(|_, _| Box::new(ObservableReadModelBuilder::new()));
        let repository = context.event_sourced_repository::<Tally>(bus.clone());
        assert!(repository.bus().builders()[0].is_observed());

        // Act
        repository.dispose().await;
        repository.dispose().await;

        // Assert
        assert_eq!(store.disposals(), 1);
        assert!(!repository.bus().builders()[0].is_observed());
    }

    #[tokio::test]
    async fn test_published_notifications_carry_kind_and_payload() {
        let h = harness();
        let mut tally = new_tally(&[6]);

        h.repository.save(&mut tally).await.unwrap();

        let published = h.bus.published();
        assert_eq!(published[1].aggregate_kind, "tally");
        assert_eq!(published[1].event_type, "tally.added");
        assert_eq!(published[1].payload, serde_json::json!({"Added": {"amount": 6}}));
        assert_eq!(h.projection.handled(), published);
    }
}
