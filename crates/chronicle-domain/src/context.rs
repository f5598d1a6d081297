//! Domain context: registry and factory for repositories, read-model
//! builders, command executors and unit-of-work scopes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chronicle_core::aggregate::{AggregateRoot, Persistence};
use chronicle_core::bus::{InMemoryNotificationBus, NotificationBus};
use chronicle_core::event::{Clock, SystemClock};
use chronicle_core::manifest::Manifest;
use chronicle_core::read_model::ReadModelBuilder;
use chronicle_core::repository::AggregateRepository;
use chronicle_core::serializer::{EventSerializer, JsonEventSerializer};
use chronicle_core::snapshot::SnapshotRepository;
use chronicle_core::store::EventStore;
use chronicle_core::unit_of_work::{NoopUnitOfWork, UnitOfWork, UnitOfWorkScope};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event_sourced::EventSourcedAggregateRepository;
use crate::executor::DomainCommandExecutor;
use crate::read_model::{BuilderHandle, ReadModelBuildingEventBus};
use crate::snapshot::SnapshotAggregateRepository;

/// Creates the snapshot repository for one aggregate type.
pub type SnapshotFactory = Arc<dyn Fn(&DomainContext) -> Arc<dyn SnapshotRepository> + Send + Sync>;

/// Creates one read-model builder for an aggregate type.
pub type BuilderFactory = Arc<
    dyn Fn(&DomainContext, Arc<dyn NotificationBus>) -> Box<dyn ReadModelBuilder> + Send + Sync,
>;

/// Registry of persistence and projection configuration per aggregate type.
///
/// Registrations are keyed by `AggregateRoot::KIND`. Configure the context
/// with `&mut` access, then share it behind an `Arc`.
pub struct DomainContext {
    event_store: Arc<dyn EventStore>,
    manifest: Arc<dyn Manifest>,
    serializer: Arc<dyn EventSerializer>,
    event_bus: Arc<dyn NotificationBus>,
    clock: Arc<dyn Clock>,
    unit_of_work: Arc<dyn UnitOfWork>,
    snapshot_factories: HashMap<&'static str, SnapshotFactory>,
    builder_factories: HashMap<&'static str, Vec<BuilderFactory>>,
}

impl DomainContext {
    /// Creates a context over the given event store and manifest, with a JSON
    /// serializer, an in-memory notification bus, the system clock and a
    /// no-op unit of work.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>, manifest: Arc<dyn Manifest>) -> Self {
        Self {
            event_store,
            manifest,
            serializer: Arc::new(JsonEventSerializer),
            event_bus: Arc::new(InMemoryNotificationBus::new()),
            clock: Arc::new(SystemClock),
            unit_of_work: Arc::new(NoopUnitOfWork),
            snapshot_factories: HashMap::new(),
            builder_factories: HashMap::new(),
        }
    }

    /// Replaces the event serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn EventSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Replaces the default notification bus.
    #[must_use]
    pub fn with_event_bus(mut self, event_bus: Arc<dyn NotificationBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Replaces the clock handed to command handlers.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the unit-of-work factory.
    #[must_use]
    pub fn with_unit_of_work(mut self, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        self.unit_of_work = unit_of_work;
        self
    }

    /// The event store gateway.
    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.event_store
    }

    /// The aggregate manifest.
    #[must_use]
    pub fn manifest(&self) -> &Arc<dyn Manifest> {
        &self.manifest
    }

    /// The event serializer.
    #[must_use]
    pub fn serializer(&self) -> &Arc<dyn EventSerializer> {
        &self.serializer
    }

    /// The default notification bus.
    #[must_use]
    pub fn event_bus(&self) -> &Arc<dyn NotificationBus> {
        &self.event_bus
    }

    /// The clock handed to command handlers.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Registers the snapshot repository factory for `T`, replacing any
    /// earlier registration.
    pub fn register_snapshot<T: AggregateRoot>(
        &mut self,
        factory: impl Fn(&DomainContext) -> Arc<dyn SnapshotRepository> + Send + Sync + 'static,
    ) {
        if self
            .snapshot_factories
            .insert(T::KIND, Arc::new(factory))
            .is_some()
        {
            tracing::debug!(
                aggregate_kind = T::KIND,
                "replaced snapshot repository registration"
            );
        }
    }

    /// Adds a read-model builder factory for `T`. Every registered builder is
    /// invoked, in registration order.
    pub fn register_builder<T: AggregateRoot>(
        &mut self,
        factory: impl Fn(&DomainContext, Arc<dyn NotificationBus>) -> Box<dyn ReadModelBuilder>
        + Send
        + Sync
        + 'static,
    ) {
        self.builder_factories
            .entry(T::KIND)
            .or_default()
            .push(Arc::new(factory));
    }

    /// Number of builder factories registered for `T`.
    #[must_use]
    pub fn builder_count<T: AggregateRoot>(&self) -> usize {
        self.builder_factories.get(T::KIND).map_or(0, Vec::len)
    }

    /// Instantiates the snapshot repository registered under `aggregate_kind`,
    /// or `None` if there is none.
    #[must_use]
    pub fn get_snapshot_repository(&self, aggregate_kind: &str) -> Option<Arc<dyn SnapshotRepository>> {
        self.snapshot_factories
            .get(aggregate_kind)
            .map(|factory| factory(self))
    }

    /// Instantiates every read-model builder registered for `T`.
    ///
    /// Builders that expose a change feed are subscribed so their changes are
    /// republished on `bus`. Returns an empty list when nothing is
    /// registered.
    #[must_use]
    pub fn get_read_model_builders<T: AggregateRoot>(
        &self,
        bus: &Arc<dyn NotificationBus>,
    ) -> Vec<BuilderHandle> {
        self.builder_factories
            .get(T::KIND)
            .map(|factories| {
                factories
                    .iter()
                    .map(|factory| BuilderHandle::new(factory(self, Arc::clone(bus)), bus))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Builds the repository for `T` according to `T::PERSISTENCE`.
    ///
    /// Committed events are fanned out to `T`'s read-model builders and then
    /// published on `bus`. A snapshot-strategy type without a registered
    /// snapshot repository still gets a repository; its operations fail with
    /// `DomainError::SnapshotRepositoryNotRegistered`.
    ///
    /// The strategy is chosen at run time, so `T` must be serializable even
    /// when it is event-sourced. Types that never use snapshots and do not
    /// implement serde can call [`Self::event_sourced_repository`] instead.
    #[must_use]
    pub fn get_aggregate_repository<T>(
        &self,
        bus: Arc<dyn NotificationBus>,
    ) -> Box<dyn AggregateRepository<T>>
    where
        T: AggregateRoot + Serialize + DeserializeOwned,
    {
        match T::PERSISTENCE {
            Persistence::EventSourced => Box::new(self.event_sourced_repository::<T>(bus)),
            Persistence::Snapshot => Box::new(self.snapshot_aggregate_repository::<T>(bus)),
        }
    }

    /// Builds an event-sourced repository for `T`.
    #[must_use]
    pub fn event_sourced_repository<T: AggregateRoot>(
        &self,
        bus: Arc<dyn NotificationBus>,
    ) -> EventSourcedAggregateRepository<T> {
        EventSourcedAggregateRepository::new(
            Arc::clone(&self.serializer),
            Arc::clone(&self.event_store),
            Arc::clone(&self.manifest),
            ReadModelBuildingEventBus::new::<T>(self, bus),
        )
    }

    /// Builds a snapshot-based repository for `T`.
    #[must_use]
    pub fn snapshot_aggregate_repository<T>(
        &self,
        bus: Arc<dyn NotificationBus>,
    ) -> SnapshotAggregateRepository<T>
    where
        T: AggregateRoot + Serialize + DeserializeOwned,
    {
        let snapshots = self.get_snapshot_repository(T::KIND);
        if snapshots.is_none() {
            tracing::debug!(
                aggregate_kind = T::KIND,
                "no snapshot repository registered; failing on first use"
            );
        }
        let events = ReadModelBuildingEventBus::new::<T>(self, Arc::clone(&bus));
        SnapshotAggregateRepository::new(snapshots, Arc::clone(&self.manifest), events, &bus)
    }

    /// Opens a unit-of-work scope.
    #[must_use]
    pub fn begin_unit_of_work(&self) -> Box<dyn UnitOfWorkScope> {
        self.unit_of_work.begin()
    }

    /// Returns a command executor for `T` publishing on the context's bus.
    #[must_use]
    pub fn new_command_executor<T>(self: &Arc<Self>) -> DomainCommandExecutor<T>
    where
        T: AggregateRoot + Serialize + DeserializeOwned,
    {
        DomainCommandExecutor::new(Arc::clone(self))
    }
}

impl fmt::Debug for DomainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut snapshot_kinds: Vec<_> = self.snapshot_factories.keys().collect();
        snapshot_kinds.sort();
        let mut builder_kinds: Vec<_> = self
            .builder_factories
            .iter()
            .map(|(kind, factories)| (*kind, factories.len()))
            .collect();
        builder_kinds.sort_unstable();
        f.debug_struct("DomainContext")
            .field("snapshot_kinds", &snapshot_kinds)
            .field("builder_kinds", &builder_kinds)
            .finish_non_exhaustive()
    }
}
