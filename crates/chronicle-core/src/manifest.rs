//! Aggregate manifest abstraction.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DomainError;

/// Side index of the last committed version per aggregate.
///
/// `update_manifest` is a compare-and-set: it fails with
/// `DomainError::ConcurrencyConflict` when the stored entry is already past
/// `expected_version`, and otherwise records `new_version`. An entry that lags
/// behind `expected_version` is advanced, which lets a save repair a manifest
/// left behind by a crash between event append and manifest update.
#[async_trait]
pub trait Manifest: Send + Sync {
    /// Returns the last committed version, or `None` if nothing was saved.
    async fn version(&self, aggregate_id: Uuid) -> Result<Option<i64>, DomainError>;

    /// Moves the entry for `aggregate_id` from `expected_version` to
    /// `new_version`.
    async fn update_manifest(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), DomainError>;

    /// Drops the entry for `aggregate_id`, so the identifier can be saved
    /// again from version zero. Removing a missing entry is not an error.
    async fn remove(&self, aggregate_id: Uuid) -> Result<(), DomainError>;
}
