//! Domain events for the Orders context.

use chronicle_core::event::{DomainEvent, EventMetadata};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emitted when an order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// The order identifier.
    pub order_id: Uuid,
    /// The customer placing the order.
    pub customer: String,
}

/// Emitted when a line item is added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// Stock-keeping unit.
    pub sku: String,
    /// Units added.
    pub quantity: u32,
    /// Price per unit, in cents.
    pub unit_price_cents: i64,
}

/// Emitted when a line item is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    /// Stock-keeping unit.
    pub sku: String,
}

/// Emitted when an order is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmitted {
    /// Order total at submission, in cents.
    pub total_cents: i64,
}

/// Event type identifier for [`OrderCreated`].
pub const ORDER_CREATED_EVENT_TYPE: &str = "orders.order_created";

/// Event type identifier for [`ItemAdded`].
pub const ITEM_ADDED_EVENT_TYPE: &str = "orders.item_added";

/// Event type identifier for [`ItemRemoved`].
pub const ITEM_REMOVED_EVENT_TYPE: &str = "orders.item_removed";

/// Event type identifier for [`OrderSubmitted`].
pub const ORDER_SUBMITTED_EVENT_TYPE: &str = "orders.order_submitted";

/// Event payload variants for the Orders context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventKind {
    /// An order was created.
    OrderCreated(OrderCreated),
    /// A line item was added.
    ItemAdded(ItemAdded),
    /// A line item was removed.
    ItemRemoved(ItemRemoved),
    /// The order was submitted.
    OrderSubmitted(OrderSubmitted),
}

impl OrderEventKind {
    /// Event type identifier for this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => ORDER_CREATED_EVENT_TYPE,
            Self::ItemAdded(_) => ITEM_ADDED_EVENT_TYPE,
            Self::ItemRemoved(_) => ITEM_REMOVED_EVENT_TYPE,
            Self::OrderSubmitted(_) => ORDER_SUBMITTED_EVENT_TYPE,
        }
    }
}

/// Domain event envelope for the Orders context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: OrderEventKind,
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or_default()
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut EventMetadata {
        &mut self.metadata
    }
}
