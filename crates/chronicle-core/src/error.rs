//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was required but no events exist for it.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual} (reload and retry)"
    )]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// The operation has no meaning for the aggregate's persistence strategy.
    #[error("{operation} is not supported for {aggregate_kind} aggregates")]
    Unsupported {
        /// The rejected operation.
        operation: &'static str,
        /// Type tag of the aggregate.
        aggregate_kind: &'static str,
    },

    /// A snapshot-strategy aggregate was used without a registered snapshot
    /// repository.
    #[error("no snapshot repository registered for aggregate kind {0}")]
    SnapshotRepositoryNotRegistered(&'static str),

    /// An event or snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A read-model builder failed to handle a notification.
    #[error("read model builder {builder} failed: {message}")]
    Projection {
        /// Name of the failing builder.
        builder: String,
        /// Failure description.
        message: String,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors a caller can resolve by reloading the
    /// aggregate and retrying the command.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_conflict_message_mentions_versions_and_hint() {
        let err = DomainError::ConcurrencyConflict {
            aggregate_id: Uuid::nil(),
            expected: 1,
            actual: 2,
        };

        let msg = err.to_string();

        assert!(msg.contains("expected version 1"));
        assert!(msg.contains("found 2"));
        assert!(msg.contains("reload and retry"));
        assert!(err.is_concurrency_conflict());
    }

    #[test]
    fn test_unsupported_message_names_operation_and_kind() {
        let err = DomainError::Unsupported {
            operation: "get_all",
            aggregate_kind: "order",
        };

        assert_eq!(
            err.to_string(),
            "get_all is not supported for order aggregates"
        );
        assert!(!err.is_concurrency_conflict());
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();

        let err = DomainError::from(parse_err);

        assert!(matches!(err, DomainError::Serialization(_)));
    }
}
