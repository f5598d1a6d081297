//! Command abstractions.

use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;
use crate::event::Clock;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// The aggregate this command targets.
    fn aggregate_id(&self) -> Uuid;
}

/// Implemented by aggregates that accept command `C`.
///
/// A successful handler records zero or more uncommitted events on the
/// aggregate; a rejected command must leave the aggregate untouched.
pub trait Handles<C: Command>: AggregateRoot {
    /// Executes the command against the current state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` when the command is not valid for
    /// the current state.
    fn handle(&mut self, command: &C, clock: &dyn Clock) -> Result<(), DomainError>;
}
