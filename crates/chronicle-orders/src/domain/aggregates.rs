//! Aggregate roots for the Orders context.

use std::collections::BTreeMap;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::command::Handles;
use chronicle_core::error::DomainError;
use chronicle_core::event::{Clock, EventMetadata};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::{AddItem, CreateOrder, RemoveItem, SubmitOrder};
use super::events::{
    ItemAdded, ItemRemoved, OrderCreated, OrderEvent, OrderEventKind, OrderSubmitted,
};

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Items may still be added or removed.
    #[default]
    Draft,
    /// The order is final.
    Submitted,
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Units ordered.
    pub quantity: u32,
    /// Price per unit, in cents.
    pub unit_price_cents: i64,
}

impl OrderLine {
    /// Line total, in cents, or `None` if it does not fit in an `i64`.
    #[must_use]
    pub fn checked_total_cents(&self) -> Option<i64> {
        i64::from(self.quantity).checked_mul(self.unit_price_cents)
    }

    /// Line total, in cents, saturating at `i64::MAX`.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        i64::from(self.quantity).saturating_mul(self.unit_price_cents)
    }
}

/// Sums line totals, or `None` on overflow.
fn checked_order_total<'a>(lines: impl IntoIterator<Item = &'a OrderLine>) -> Option<i64> {
    lines
        .into_iter()
        .try_fold(0_i64, |total, line| total.checked_add(line.checked_total_cents()?))
}

/// The aggregate root for an order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Current version (sequence number of the last applied event).
    pub(crate) version: i64,
    customer: String,
    lines: BTreeMap<String, OrderLine>,
    status: OrderStatus,
    /// Uncommitted events pending persistence.
    #[serde(skip)]
    uncommitted_events: Vec<OrderEvent>,
}

impl Order {
    /// The customer the order belongs to.
    #[must_use]
    pub fn customer(&self) -> &str {
        &self.customer
    }

    /// Line items keyed by SKU.
    #[must_use]
    pub fn lines(&self) -> &BTreeMap<String, OrderLine> {
        &self.lines
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Sum of all line totals, in cents. `add_item` keeps this in range.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.lines
            .values()
            .fold(0, |total, line| total.saturating_add(line.total_cents()))
    }

    /// Creates the order, producing an `OrderCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order already exists or the
    /// customer is blank.
    pub fn create(
        &mut self,
        order_id: Uuid,
        customer: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.version > 0 {
            return Err(DomainError::Validation(format!(
                "order {} already exists",
                self.id
            )));
        }
        if customer.trim().is_empty() {
            return Err(DomainError::Validation("customer must not be blank".into()));
        }
        self.id = order_id;
        self.record(
            OrderEventKind::OrderCreated(OrderCreated {
                order_id,
                customer: customer.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Adds units of `sku`, producing an `ItemAdded` event. Adding a SKU that
    /// is already on the order increases its quantity and takes the new
    /// price.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not an open draft,
    /// the quantity is zero, the price is negative, or the merged line
    /// quantity or order total would overflow.
    pub fn add_item(
        &mut self,
        sku: &str,
        quantity: u32,
        unit_price_cents: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_draft()?;
        if quantity == 0 {
            return Err(DomainError::Validation("quantity must be positive".into()));
        }
        if unit_price_cents < 0 {
            return Err(DomainError::Validation(
                "unit price must not be negative".into(),
            ));
        }
        let merged = OrderLine {
            quantity: self
                .lines
                .get(sku)
                .map_or(Some(quantity), |line| line.quantity.checked_add(quantity))
                .ok_or_else(|| {
                    DomainError::Validation(format!("quantity of item {sku} is too large"))
                })?,
            unit_price_cents,
        };
        let others = self
            .lines
            .iter()
            .filter(|(line_sku, _)| line_sku.as_str() != sku)
            .map(|(_, line)| line);
        if checked_order_total(others.chain(std::iter::once(&merged))).is_none() {
            return Err(DomainError::Validation(format!(
                "total of order {} is too large",
                self.id
            )));
        }
        self.record(
            OrderEventKind::ItemAdded(ItemAdded {
                sku: sku.to_owned(),
                quantity,
                unit_price_cents,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Removes the line for `sku`, producing an `ItemRemoved` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not an open draft or
    /// has no line for `sku`.
    pub fn remove_item(
        &mut self,
        sku: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_draft()?;
        if !self.lines.contains_key(sku) {
            return Err(DomainError::Validation(format!(
                "item {sku} not found in order {}",
                self.id
            )));
        }
        self.record(
            OrderEventKind::ItemRemoved(ItemRemoved { sku: sku.to_owned() }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Submits the order, producing an `OrderSubmitted` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not an open draft or
    /// has no lines.
    pub fn submit(&mut self, correlation_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_draft()?;
        if self.lines.is_empty() {
            return Err(DomainError::Validation(format!(
                "order {} has no items",
                self.id
            )));
        }
        let total_cents = self.total_cents();
        self.record(
            OrderEventKind::OrderSubmitted(OrderSubmitted { total_cents }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if self.version == 0 {
            return Err(DomainError::Validation("order has not been created".into()));
        }
        if self.status == OrderStatus::Submitted {
            return Err(DomainError::Validation(format!(
                "order {} is already submitted",
                self.id
            )));
        }
        Ok(())
    }

    fn record(&mut self, kind: OrderEventKind, correlation_id: Uuid, clock: &dyn Clock) {
        let event = OrderEvent {
            metadata: EventMetadata {
                event_id: Uuid::now_v7(),
                event_type: kind.event_type().to_owned(),
                aggregate_id: self.id,
                sequence_number: self.version + 1,
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        self.apply(&event);
        self.uncommitted_events.push(event);
    }
}

impl AggregateRoot for Order {
    type Event = OrderEvent;

    const KIND: &'static str = "order";

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        match &event.kind {
            OrderEventKind::OrderCreated(payload) => {
                self.id = payload.order_id;
                self.customer.clone_from(&payload.customer);
            }
            OrderEventKind::ItemAdded(payload) => {
                let line = self.lines.entry(payload.sku.clone()).or_insert(OrderLine {
                    quantity: 0,
                    unit_price_cents: payload.unit_price_cents,
                });
                line.quantity = line.quantity.saturating_add(payload.quantity);
                line.unit_price_cents = payload.unit_price_cents;
            }
            OrderEventKind::ItemRemoved(payload) => {
                self.lines.remove(&payload.sku);
            }
            OrderEventKind::OrderSubmitted(_) => {
                self.status = OrderStatus::Submitted;
            }
        }
        self.version = event.metadata.sequence_number;
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }
}

impl Handles<CreateOrder> for Order {
    fn handle(&mut self, command: &CreateOrder, clock: &dyn Clock) -> Result<(), DomainError> {
        self.create(
            command.order_id,
            &command.customer,
            command.correlation_id,
            clock,
        )
    }
}

impl Handles<AddItem> for Order {
    fn handle(&mut self, command: &AddItem, clock: &dyn Clock) -> Result<(), DomainError> {
        self.add_item(
            &command.sku,
            command.quantity,
            command.unit_price_cents,
            command.correlation_id,
            clock,
        )
    }
}

impl Handles<RemoveItem> for Order {
    fn handle(&mut self, command: &RemoveItem, clock: &dyn Clock) -> Result<(), DomainError> {
        self.remove_item(&command.sku, command.correlation_id, clock)
    }
}

impl Handles<SubmitOrder> for Order {
    fn handle(&mut self, command: &SubmitOrder, clock: &dyn Clock) -> Result<(), DomainError> {
        self.submit(command.correlation_id, clock)
    }
}
