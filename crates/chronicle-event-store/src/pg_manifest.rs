//! `PostgreSQL` implementation of the `Manifest` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::manifest::Manifest;

/// PostgreSQL-backed aggregate manifest.
///
/// The compare-and-set is a single upsert guarded on the stored version, so
/// two writers racing on the same entry cannot both succeed.
#[derive(Debug, Clone)]
pub struct PgManifest {
    pool: PgPool,
}

impl PgManifest {
    /// Creates a new `PgManifest`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Manifest for PgManifest {
    async fn version(&self, aggregate_id: Uuid) -> Result<Option<i64>, DomainError> {
        sqlx::query_scalar("SELECT version FROM aggregate_manifest WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("manifest lookup failed: {e}")))
    }

    async fn update_manifest(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            "INSERT INTO aggregate_manifest (aggregate_id, version) VALUES ($1, $3) \
             ON CONFLICT (aggregate_id) DO UPDATE \
             SET version = EXCLUDED.version, updated_at = NOW() \
             WHERE aggregate_manifest.version <= $2",
        )
        .bind(aggregate_id)
        .bind(expected_version)
        .bind(new_version)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("manifest update failed: {e}")))?;

        if result.rows_affected() == 0 {
            let actual = self.version(aggregate_id).await?.unwrap_or(0);
            tracing::warn!(%aggregate_id, expected_version, actual, "manifest ahead of expected version");
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        Ok(())
    }

    async fn remove(&self, aggregate_id: Uuid) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM aggregate_manifest WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("manifest removal failed: {e}")))?;
        Ok(())
    }
}
