//! Command execution against a single aggregate type.
//!
//! Each attempt opens a unit-of-work scope, builds a fresh repository for `T`
//! from the domain context, loads (or creates) the target aggregate, lets it
//! handle the command and saves the result. Concurrency conflicts are retried
//! from a fresh load up to the configured limit.

use std::marker::PhantomData;
use std::sync::Arc;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::bus::NotificationBus;
use chronicle_core::command::{Command, Handles};
use chronicle_core::error::DomainError;
use chronicle_core::event::Clock;
use chronicle_core::repository::AggregateRepository;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::context::DomainContext;

/// Executes commands against aggregates of type `T`.
pub struct DomainCommandExecutor<T> {
    context: Arc<DomainContext>,
    bus: Arc<dyn NotificationBus>,
    max_retries: usize,
    _aggregate: PhantomData<fn() -> T>,
}

impl<T> DomainCommandExecutor<T>
where
    T: AggregateRoot + Serialize + DeserializeOwned,
{
    /// Creates an executor publishing on the context's event bus. Conflicts
    /// are not retried.
    #[must_use]
    pub fn new(context: Arc<DomainContext>) -> Self {
        let bus = Arc::clone(context.event_bus());
        Self {
            context,
            bus,
            max_retries: 0,
            _aggregate: PhantomData,
        }
    }

    /// Publishes committed events on `bus` instead of the context's bus.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Retries a command up to `max_retries` times after a concurrency
    /// conflict.
    #[must_use]
    pub fn with_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Executes `command`, creating the aggregate if it does not exist yet.
    /// Returns the aggregate as saved.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or any error from loading or saving. A
    /// `DomainError::ConcurrencyConflict` is returned once retries run out.
    #[instrument(
        skip(self, command),
        fields(
            aggregate_kind = T::KIND,
            command_type = command.command_type(),
            aggregate_id = %command.aggregate_id(),
        )
    )]
    pub async fn execute<C>(&self, command: &C) -> Result<T, DomainError>
    where
        C: Command,
        T: Handles<C>,
    {
        self.run(command, false).await
    }

    /// Executes `command` against an aggregate that must already exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if nothing is stored under
    /// the command's aggregate id, and otherwise behaves like
    /// [`DomainCommandExecutor::execute`].
    #[instrument(
        skip(self, command),
        fields(
            aggregate_kind = T::KIND,
            command_type = command.command_type(),
            aggregate_id = %command.aggregate_id(),
        )
    )]
    pub async fn execute_existing<C>(&self, command: &C) -> Result<T, DomainError>
    where
        C: Command,
        T: Handles<C>,
    {
        self.run(command, true).await
    }

    async fn run<C>(&self, command: &C, must_exist: bool) -> Result<T, DomainError>
    where
        C: Command,
        T: Handles<C>,
    {
        let mut retries = 0;
        loop {
            match self.attempt(command, must_exist).await {
                Err(err) if err.is_concurrency_conflict() && retries < self.max_retries => {
                    retries += 1;
                    tracing::warn!(
                        retry = retries,
                        max_retries = self.max_retries,
                        error = %err,
                        "concurrency conflict, reloading aggregate"
                    );
                }
                Err(err) => {
                    tracing::debug!(error = %err, "command failed");
                    return Err(err);
                }
                Ok(aggregate) => {
                    tracing::info!(version = aggregate.version(), "command executed");
                    return Ok(aggregate);
                }
            }
        }
    }

    async fn attempt<C>(&self, command: &C, must_exist: bool) -> Result<T, DomainError>
    where
        C: Command,
        T: Handles<C>,
    {
        let mut scope = self.context.begin_unit_of_work();
        let repository = self
            .context
            .get_aggregate_repository::<T>(Arc::clone(&self.bus));
        let result = handle_and_save(
            repository.as_ref(),
            command,
            must_exist,
            self.context.clock(),
        )
        .await;
        repository.dispose().await;
        let aggregate = result?;
        scope.complete().await?;
        Ok(aggregate)
    }
}

async fn handle_and_save<T, C>(
    repository: &dyn AggregateRepository<T>,
    command: &C,
    must_exist: bool,
    clock: &dyn Clock,
) -> Result<T, DomainError>
where
    T: AggregateRoot + Handles<C>,
    C: Command,
{
    let aggregate_id = command.aggregate_id();
    let mut aggregate = match repository.get_by_id(aggregate_id).await? {
        Some(aggregate) => aggregate,
        None if must_exist => return Err(DomainError::AggregateNotFound(aggregate_id)),
        None => repository.new_instance(),
    };
    aggregate.handle(command, clock)?;
    repository.save(&mut aggregate).await?;
    Ok(aggregate)
}

impl<T> std::fmt::Debug for DomainCommandExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainCommandExecutor")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chronicle_core::aggregate::AggregateRoot;
    use chronicle_core::error::DomainError;
    use chronicle_core::manifest::Manifest;
    use chronicle_core::snapshot::SnapshotRepository;
    use chronicle_core::store::{EventStore, StoredEvent};
    use chronicle_test_support::{
        AddToTally, FixedClock, RecordingBus, RecordingEventStore, RecordingManifest,
        RecordingSnapshotRepository, SnapshotTally, Tally,
    };
    use uuid::Uuid;

    use super::*;

    fn add(tally_id: Uuid, amount: i64) -> AddToTally {
        AddToTally {
            correlation_id: Uuid::new_v4(),
            tally_id,
            amount,
        }
    }

    fn context(store: Arc<dyn EventStore>) -> Arc<DomainContext> {
        Arc::new(
            DomainContext::new(store, Arc::new(RecordingManifest::new()))
                .with_clock(Arc::new(FixedClock::default())),
        )
    }

    /// Event store whose first `fail_times` appends report a conflict.
    struct ContendedEventStore {
        inner: RecordingEventStore,
        remaining_failures: std::sync::Mutex<usize>,
    }

    impl ContendedEventStore {
        fn new(fail_times: usize) -> Self {
            Self {
                inner: RecordingEventStore::new(),
                remaining_failures: std::sync::Mutex::new(fail_times),
            }
        }
    }

    #[async_trait]
    impl EventStore for ContendedEventStore {
        async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
            self.inner.load_events(aggregate_id).await
        }

        async fn append(&self, event: StoredEvent) -> Result<(), DomainError> {
            {
                let mut remaining = self.remaining_failures.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DomainError::ConcurrencyConflict {
                        aggregate_id: event.aggregate_id,
                        expected: event.version - 1,
                        actual: event.version,
                    });
                }
            }
            self.inner.append(event).await
        }
    }

    #[tokio::test]
    async fn test_execute_creates_and_saves_new_aggregate() {
        // Arrange
        let store = Arc::new(RecordingEventStore::new());
        let context = context(store.clone());
        let bus = Arc::new(RecordingBus::new());
        let executor = context.new_command_executor::<Tally>().with_bus(bus.clone());
        let tally_id = Uuid::new_v4();

        // Act
        let tally = executor.execute(&add(tally_id, 4)).await.unwrap();

        // Assert
        assert_eq!(tally.aggregate_id(), tally_id);
        assert_eq!(tally.version(), 2);
        assert!(tally.uncommitted_events().is_empty());
        assert_eq!(store.appended_events().len(), 2);
        assert_eq!(bus.published().len(), 2);
        assert_eq!(
            context.manifest().version(tally_id).await.unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_execute_loads_existing_aggregate() {
        // Arrange
        let context = context(Arc::new(RecordingEventStore::new()));
        let executor = context.new_command_executor::<Tally>();
        let tally_id = Uuid::new_v4();
        executor.execute(&add(tally_id, 4)).await.unwrap();

        // Act
        let tally = executor.execute_existing(&add(tally_id, 6)).await.unwrap();

        // Assert
        assert_eq!(tally.total, 10);
        assert_eq!(tally.version(), 3);
    }

    #[tokio::test]
    async fn test_execute_existing_rejects_unknown_aggregate() {
        let store = Arc::new(RecordingEventStore::new());
        let executor = context(store.clone()).new_command_executor::<Tally>();
        let tally_id = Uuid::new_v4();

        let result = executor.execute_existing(&add(tally_id, 1)).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(id)) if id == tally_id));
        assert!(store.appended_events().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_persists_nothing() {
        let store = Arc::new(RecordingEventStore::new());
        let executor = context(store.clone()).new_command_executor::<Tally>();

        let result = executor.execute(&add(Uuid::new_v4(), 0)).await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(store.appended_events().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_is_retried_until_success() {
        // Arrange
        let store = Arc::new(ContendedEventStore::new(2));
        let executor = context(store.clone())
            .new_command_executor::<Tally>()
            .with_retries(2);
        let tally_id = Uuid::new_v4();

        // Act
        let tally = executor.execute(&add(tally_id, 7)).await.unwrap();

        // Assert
        assert_eq!(tally.total, 7);
        assert_eq!(store.inner.appended_events().len(), 2);
    }

    #[tokio::test]
    async fn test_conflict_is_returned_when_retries_run_out() {
        let store = Arc::new(ContendedEventStore::new(2));
        let executor = context(store.clone())
            .new_command_executor::<Tally>()
            .with_retries(1);

        let result = executor.execute(&add(Uuid::new_v4(), 7)).await;

        assert!(result.is_err_and(|err| err.is_concurrency_conflict()));
        assert!(store.inner.appended_events().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_aggregates_use_registered_repository() {
        // Arrange
        let snapshots = Arc::new(RecordingSnapshotRepository::new());
        let store = Arc::new(RecordingEventStore::new());
        let mut context = DomainContext::new(store.clone(), Arc::new(RecordingManifest::new()));
        let registered: Arc<dyn SnapshotRepository> = snapshots.clone();
        context.register_snapshot::<SnapshotTally>(move |_| Arc::clone(&registered));
        let executor = Arc::new(context).new_command_executor::<SnapshotTally>();
        let tally_id = Uuid::new_v4();

        // Act
        executor.execute(&add(tally_id, 2)).await.unwrap();
        let tally = executor.execute_existing(&add(tally_id, 3)).await.unwrap();

        // Assert
        assert_eq!(tally.0.total, 5);
        assert_eq!(snapshots.get(tally_id).await.unwrap().unwrap().version, 3);
        assert!(store.appended_events().is_empty());
    }
}
