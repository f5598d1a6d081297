//! Commands for the Orders context.

use chronicle_core::command::Command;
use uuid::Uuid;

/// Command to create an order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The new order's identifier.
    pub order_id: Uuid,
    /// The customer placing the order.
    pub customer: String,
}

impl Command for CreateOrder {
    fn command_type(&self) -> &'static str {
        "orders.create_order"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.order_id
    }
}

/// Command to add a line item.
#[derive(Debug, Clone)]
pub struct AddItem {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Stock-keeping unit.
    pub sku: String,
    /// Units to add.
    pub quantity: u32,
    /// Price per unit, in cents.
    pub unit_price_cents: i64,
}

impl Command for AddItem {
    fn command_type(&self) -> &'static str {
        "orders.add_item"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.order_id
    }
}

/// Command to remove a line item.
#[derive(Debug, Clone)]
pub struct RemoveItem {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Stock-keeping unit.
    pub sku: String,
}

impl Command for RemoveItem {
    fn command_type(&self) -> &'static str {
        "orders.remove_item"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.order_id
    }
}

/// Command to submit an order.
#[derive(Debug, Clone)]
pub struct SubmitOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
}

impl Command for SubmitOrder {
    fn command_type(&self) -> &'static str {
        "orders.submit_order"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.order_id
    }
}
