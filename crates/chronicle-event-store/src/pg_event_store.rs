//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::store::{EventStore, StoredEvent};

#[derive(Debug, FromRow)]
struct EventRow {
    aggregate_id: Uuid,
    event_id: Uuid,
    version: i64,
    payload: String,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        StoredEvent::new(row.aggregate_id, row.event_id, row.version, row.payload)
    }
}

fn infrastructure(context: &str, err: &sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("{context}: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// PostgreSQL-backed event store.
///
/// The `(aggregate_id, version)` primary key makes a second writer of the
/// same version fail; that failure is reported as
/// `DomainError::ConcurrencyConflict`.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Closes the underlying pool. Every clone of the store shares it.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM aggregate_events WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| infrastructure("version lookup failed", &e))?;
        Ok(version.unwrap_or(0))
    }

    async fn conflict(&self, aggregate_id: Uuid, version: i64) -> DomainError {
        match self.current_version(aggregate_id).await {
            Ok(actual) => {
                tracing::warn!(%aggregate_id, version, actual, "event version already taken");
                DomainError::ConcurrencyConflict {
                    aggregate_id,
                    expected: version - 1,
                    actual,
                }
            }
            Err(err) => err,
        }
    }
}

const INSERT_EVENT: &str =
    "INSERT INTO aggregate_events (aggregate_id, version, event_id, payload) VALUES ($1, $2, $3, $4)";

#[async_trait]
impl EventStore for PgEventStore {
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT aggregate_id, event_id, version, payload FROM aggregate_events \
             WHERE aggregate_id = $1 ORDER BY version",
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| infrastructure("event load failed", &e))?;
        tracing::debug!(%aggregate_id, count = rows.len(), "loaded events");
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    async fn last_event(&self, aggregate_id: Uuid) -> Result<Option<StoredEvent>, DomainError> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT aggregate_id, event_id, version, payload FROM aggregate_events \
             WHERE aggregate_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| infrastructure("last event lookup failed", &e))?;
        Ok(row.map(StoredEvent::from))
    }

    async fn append(&self, event: StoredEvent) -> Result<(), DomainError> {
        let (aggregate_id, version) = (event.aggregate_id, event.version);
        let result = sqlx::query(INSERT_EVENT)
            .bind(event.aggregate_id)
            .bind(event.version)
            .bind(event.event_id)
            .bind(event.payload)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(self.conflict(aggregate_id, version).await),
            Err(err) => Err(infrastructure("event append failed", &err)),
        }
    }

    /// Appends the batch in one transaction.
    async fn append_events(&self, events: Vec<StoredEvent>) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| infrastructure("transaction begin failed", &e))?;
        let mut taken = None;
        for event in events {
            let (aggregate_id, version) = (event.aggregate_id, event.version);
            let result = sqlx::query(INSERT_EVENT)
                .bind(event.aggregate_id)
                .bind(event.version)
                .bind(event.event_id)
                .bind(event.payload)
                .execute(&mut *tx)
                .await;
            match result {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    taken = Some((aggregate_id, version));
                    break;
                }
                Err(err) => return Err(infrastructure("event append failed", &err)),
            }
        }
        if let Some((aggregate_id, version)) = taken {
            tx.rollback()
                .await
                .map_err(|e| infrastructure("transaction rollback failed", &e))?;
            return Err(self.conflict(aggregate_id, version).await);
        }
        tx.commit()
            .await
            .map_err(|e| infrastructure("transaction commit failed", &e))?;
        Ok(())
    }

    async fn dispose(&self) {
        tracing::debug!("event store released by repository");
    }
}
