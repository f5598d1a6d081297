//! Unit-of-work scope abstraction.

use async_trait::async_trait;

use crate::error::DomainError;

/// Boundary around a logical batch of persistence operations.
///
/// Dropping a scope without completing it abandons the batch.
#[async_trait]
pub trait UnitOfWorkScope: Send {
    /// Marks the batch as successful. Completing twice is a no-op.
    async fn complete(&mut self) -> Result<(), DomainError>;
}

/// Creates unit-of-work scopes.
pub trait UnitOfWork: Send + Sync {
    /// Opens a new scope.
    fn begin(&self) -> Box<dyn UnitOfWorkScope>;
}

/// Scope with no transactional behaviour.
#[derive(Debug, Default)]
pub struct DefaultScope;

#[async_trait]
impl UnitOfWorkScope for DefaultScope {
    async fn complete(&mut self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Unit of work that hands out [`DefaultScope`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUnitOfWork;

impl UnitOfWork for NoopUnitOfWork {
    fn begin(&self) -> Box<dyn UnitOfWorkScope> {
        Box::new(DefaultScope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_unit_of_work_scope_completes() {
        let mut scope = NoopUnitOfWork.begin();

        let result = scope.complete().await;

        assert!(result.is_ok());
    }
}
