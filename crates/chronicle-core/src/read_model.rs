//! Read-model builder abstraction.

use crate::bus::{Notification, NotificationBus};
use crate::error::DomainError;

/// Maintains one projection from the notifications of an aggregate type.
///
/// The builder owns its read model; nothing else writes to it.
pub trait ReadModelBuilder: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Folds one committed event into the read model.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the read model cannot be updated.
    fn handle(&self, notification: &Notification) -> Result<(), DomainError>;

    /// Feed of changes made to the read model, if the builder reports them.
    fn changes(&self) -> Option<&dyn NotificationBus> {
        None
    }
}
