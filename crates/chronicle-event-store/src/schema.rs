//! Event store database schema.

use chronicle_core::error::DomainError;
use sqlx::PgPool;

/// SQL creating the event log and manifest tables. Mirrors
/// `migrations/0001_create_event_store.sql`.
pub const CREATE_EVENT_STORE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS aggregate_events (
    aggregate_id UUID NOT NULL,
    version      BIGINT NOT NULL,
    event_id     UUID NOT NULL UNIQUE,
    payload      TEXT NOT NULL,
    recorded_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (aggregate_id, version)
);

CREATE TABLE IF NOT EXISTS aggregate_manifest (
    aggregate_id UUID PRIMARY KEY,
    version      BIGINT NOT NULL,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

/// Creates the event store tables if they do not exist.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the statements fail.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), DomainError> {
    sqlx::raw_sql(CREATE_EVENT_STORE_TABLES)
        .execute(pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("schema creation failed: {e}")))?;
    Ok(())
}
