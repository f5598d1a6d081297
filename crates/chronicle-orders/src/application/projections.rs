//! Order summary read model.
//!
//! `OrderSummaryBuilder` folds committed order notifications into a shared
//! [`OrderSummaries`] table and reports each updated row on its change feed.
//! A builder is created per repository, so the table is shared through the
//! factory closure rather than owned by any one builder.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chronicle_core::bus::{InMemoryNotificationBus, Notification, NotificationBus};
use chronicle_core::error::DomainError;
use chronicle_core::read_model::ReadModelBuilder;
use chronicle_domain::context::DomainContext;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderLine};
use crate::domain::events::OrderEventKind;

/// Name of the order summary builder.
pub const ORDER_SUMMARY_BUILDER: &str = "order_summary";

/// Event type reported on the builder's change feed.
pub const SUMMARY_UPDATED_EVENT_TYPE: &str = "orders.summary_updated";

/// Read-only view of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    /// The order identifier.
    pub order_id: Uuid,
    /// The customer.
    pub customer: String,
    /// Line items keyed by SKU.
    pub lines: BTreeMap<String, OrderLine>,
    /// Whether the order was submitted.
    pub submitted: bool,
    /// Version of the last event folded in.
    pub version: i64,
}

impl OrderSummary {
    /// Total units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines
            .values()
            .fold(0, |count: u32, line| count.saturating_add(line.quantity))
    }

    /// Order total, in cents.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.lines
            .values()
            .fold(0, |total: i64, line| total.saturating_add(line.total_cents()))
    }
}

/// Shared table of order summaries.
#[derive(Debug, Clone, Default)]
pub struct OrderSummaries(Arc<RwLock<BTreeMap<Uuid, OrderSummary>>>);

impl OrderSummaries {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary for `order_id`, if any.
    #[must_use]
    pub fn get(&self, order_id: Uuid) -> Option<OrderSummary> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&order_id)
            .cloned()
    }

    /// Every summary, ordered by order id.
    #[must_use]
    pub fn all(&self) -> Vec<OrderSummary> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Builds [`OrderSummary`] rows from order notifications.
#[derive(Debug)]
pub struct OrderSummaryBuilder {
    summaries: OrderSummaries,
    changes: InMemoryNotificationBus,
}

impl OrderSummaryBuilder {
    /// Creates a builder writing to `summaries`.
    #[must_use]
    pub fn new(summaries: OrderSummaries) -> Self {
        Self {
            summaries,
            changes: InMemoryNotificationBus::new(),
        }
    }

    /// Registers a builder factory for [`Order`] on `context`.
    pub fn register(context: &mut DomainContext, summaries: &OrderSummaries) {
        let summaries = summaries.clone();
        context.register_builder::<Order>(move |_, _| {
            Box::new(OrderSummaryBuilder::new(summaries.clone()))
        });
    }

    fn projection_error(message: impl Into<String>) -> DomainError {
        DomainError::Projection {
            builder: ORDER_SUMMARY_BUILDER.to_owned(),
            message: message.into(),
        }
    }

    /// Applies `kind` to the table and returns the updated row, or `None`
    /// if the notification was already folded in.
    fn fold(
        &self,
        notification: &Notification,
        kind: OrderEventKind,
    ) -> Result<Option<OrderSummary>, DomainError> {
        let order_id = notification.aggregate_id;
        let mut rows = self
            .summaries
            .0
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let OrderEventKind::OrderCreated(created) = kind {
            if rows.contains_key(&order_id) {
                tracing::debug!(%order_id, "order summary already exists");
                return Ok(None);
            }
            let summary = OrderSummary {
                order_id,
                customer: created.customer,
                lines: BTreeMap::new(),
                submitted: false,
                version: notification.version,
            };
            rows.insert(order_id, summary.clone());
            return Ok(Some(summary));
        }

        let summary = rows
            .get_mut(&order_id)
            .ok_or_else(|| Self::projection_error(format!("no summary for order {order_id}")))?;
        if notification.version <= summary.version {
            tracing::debug!(
                %order_id,
                version = notification.version,
                "notification already projected"
            );
            return Ok(None);
        }
        match kind {
            OrderEventKind::OrderCreated(_) => {}
            OrderEventKind::ItemAdded(added) => {
                let line = summary.lines.entry(added.sku).or_insert(OrderLine {
                    quantity: 0,
                    unit_price_cents: added.unit_price_cents,
                });
                line.quantity = line.quantity.saturating_add(added.quantity);
                line.unit_price_cents = added.unit_price_cents;
            }
            OrderEventKind::ItemRemoved(removed) => {
                summary.lines.remove(&removed.sku);
            }
            OrderEventKind::OrderSubmitted(_) => summary.submitted = true,
        }
        summary.version = notification.version;
        Ok(Some(summary.clone()))
    }
}

impl ReadModelBuilder for OrderSummaryBuilder {
    fn name(&self) -> &str {
        ORDER_SUMMARY_BUILDER
    }

    fn handle(&self, notification: &Notification) -> Result<(), DomainError> {
        let kind: OrderEventKind = serde_json::from_value(notification.payload.clone())
            .map_err(|e| Self::projection_error(format!("unreadable order event: {e}")))?;

        let Some(summary) = self.fold(notification, kind)? else {
            return Ok(());
        };
        let payload = serde_json::to_value(&summary)?;
        self.changes.publish(&Notification {
            aggregate_kind: notification.aggregate_kind.clone(),
            aggregate_id: summary.order_id,
            event_id: Uuid::now_v7(),
            version: summary.version,
            event_type: SUMMARY_UPDATED_EVENT_TYPE.to_owned(),
            payload,
        });
        Ok(())
    }

    fn changes(&self) -> Option<&dyn NotificationBus> {
        Some(&self.changes)
    }
}
