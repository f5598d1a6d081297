//! Snapshot-based aggregate repository.
//!
//! Used for aggregate types declared with `Persistence::Snapshot`. The
//! aggregate's current state is stored whole; its uncommitted events are only
//! published. The manifest compare-and-set runs before the snapshot write and
//! is the sole guard against concurrent writers.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::bus::{Handler, Notification, NotificationBus, Subscription};
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::manifest::Manifest;
use chronicle_core::repository::AggregateRepository;
use chronicle_core::snapshot::{Snapshot, SnapshotRepository};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::read_model::ReadModelBuildingEventBus;

/// Repository persisting `T` as a current-state snapshot.
pub struct SnapshotAggregateRepository<T> {
    snapshots: Option<Arc<dyn SnapshotRepository>>,
    manifest: Arc<dyn Manifest>,
    bus: ReadModelBuildingEventBus,
    changes: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
    _aggregate: PhantomData<fn() -> T>,
}

impl<T> SnapshotAggregateRepository<T>
where
    T: AggregateRoot + Serialize + DeserializeOwned,
{
    /// Creates a repository. If `snapshots` reports changes, each change is
    /// stamped with `T::KIND` and republished on `changes_bus` for as long as
    /// the repository lives.
    #[must_use]
    pub fn new(
        snapshots: Option<Arc<dyn SnapshotRepository>>,
        manifest: Arc<dyn Manifest>,
        bus: ReadModelBuildingEventBus,
        changes_bus: &Arc<dyn NotificationBus>,
    ) -> Self {
        let changes = snapshots
            .as_ref()
            .and_then(|repository| repository.changes())
            .map(|feed| {
                let target = Arc::clone(changes_bus);
                let republish: Handler = Arc::new(move |change: &Notification| {
                    let mut event = change.clone();
                    T::KIND.clone_into(&mut event.aggregate_kind);
                    target.publish(&event);
                });
                feed.subscribe(republish)
            });
        Self {
            snapshots,
            manifest,
            bus,
            changes: Mutex::new(changes),
            disposed: AtomicBool::new(false),
            _aggregate: PhantomData,
        }
    }

    /// Whether the snapshot repository's changes are being republished.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn snapshots(&self) -> Result<&Arc<dyn SnapshotRepository>, DomainError> {
        self.snapshots
            .as_ref()
            .ok_or(DomainError::SnapshotRepositoryNotRegistered(T::KIND))
    }

    fn restore(snapshot: Snapshot) -> Result<T, DomainError> {
        Ok(serde_json::from_value(snapshot.state)?)
    }
}

#[async_trait]
impl<T> AggregateRepository<T> for SnapshotAggregateRepository<T>
where
    T: AggregateRoot + Serialize + DeserializeOwned,
{
    async fn get_by_id(&self, aggregate_id: Uuid) -> Result<Option<T>, DomainError> {
        self.snapshots()?
            .get(aggregate_id)
            .await?
            .map(Self::restore)
            .transpose()
    }

    async fn get_all(&self) -> Result<Vec<T>, DomainError> {
        self.snapshots()?
            .get_all()
            .await?
            .into_iter()
            .map(Self::restore)
            .collect()
    }

    async fn save(&self, instance: &mut T) -> Result<(), DomainError> {
        let snapshots = self.snapshots()?;
        let aggregate_id = instance.aggregate_id();
        let events = instance.uncommitted_events();
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(());
        };
        let expected_version = first.version() - 1;
        let new_version = last.version();

        self.manifest
            .update_manifest(aggregate_id, expected_version, new_version)
            .await?;
        let state = serde_json::to_value(&*instance)?;
        snapshots
            .save(Snapshot {
                aggregate_id,
                version: new_version,
                state,
            })
            .await?;

        let events = instance.uncommitted_events();
        self.bus.publish_events(events);
        tracing::debug!(
            aggregate_kind = T::KIND,
            %aggregate_id,
            version = new_version,
            "snapshot saved"
        );

        instance.clear_uncommitted_events();
        Ok(())
    }

    async fn delete(&self, instance: &T) -> Result<(), DomainError> {
        self.delete_id(instance.aggregate_id()).await
    }

    async fn delete_id(&self, aggregate_id: Uuid) -> Result<(), DomainError> {
        self.snapshots()?.delete(aggregate_id).await?;
        self.manifest.remove(aggregate_id).await?;
        tracing::debug!(aggregate_kind = T::KIND, %aggregate_id, "snapshot deleted");
        Ok(())
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscription = self
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(subscription);
        self.bus.release();
    }
}
