//! Aggregate repository abstraction.

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;

/// Loads and persists aggregates of type `T`.
#[async_trait]
pub trait AggregateRepository<T: AggregateRoot>: Send + Sync {
    /// Returns a fresh, unhydrated instance.
    fn new_instance(&self) -> T {
        T::default()
    }

    /// Loads the aggregate, or `None` if nothing is stored for `aggregate_id`.
    async fn get_by_id(&self, aggregate_id: Uuid) -> Result<Option<T>, DomainError>;

    /// Loads every aggregate of this type.
    async fn get_all(&self) -> Result<Vec<T>, DomainError>;

    /// Persists the instance's uncommitted events and commits them.
    async fn save(&self, instance: &mut T) -> Result<(), DomainError>;

    /// Removes the instance.
    async fn delete(&self, instance: &T) -> Result<(), DomainError>;

    /// Removes the aggregate with the given identity.
    async fn delete_id(&self, aggregate_id: Uuid) -> Result<(), DomainError>;

    /// Releases resources held by the repository. Later calls are no-ops.
    async fn dispose(&self);
}
