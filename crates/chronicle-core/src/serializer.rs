//! Event serialization codec.

use crate::error::DomainError;

/// Converts events to and from their stored string form.
///
/// Events reach the serializer as JSON values so a single codec can be
/// shared by every aggregate type.
pub trait EventSerializer: Send + Sync {
    /// Encodes an event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the value cannot be encoded.
    fn serialize_to_string(&self, event: &serde_json::Value) -> Result<String, DomainError>;

    /// Decodes an event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the input is malformed.
    fn deserialize_from_string(&self, raw: &str) -> Result<serde_json::Value, DomainError>;
}

/// Compact JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize_to_string(&self, event: &serde_json::Value) -> Result<String, DomainError> {
        Ok(serde_json::to_string(event)?)
    }

    fn deserialize_from_string(&self, raw: &str) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::from_str(raw)?)
    }
}
