//! Chronicle orders demo.
//!
//! Runs a short order scenario against the in-memory store, or against
//! `PostgreSQL` when `CHRONICLE_STORE=postgres`.

use std::error::Error;
use std::sync::Arc;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::bus::{Notification, NotificationBus};
use chronicle_core::manifest::Manifest;
use chronicle_core::repository::AggregateRepository;
use chronicle_core::store::EventStore;
use chronicle_domain::context::DomainContext;
use chronicle_event_store::config::EventStoreConfig;
use chronicle_event_store::in_memory::{InMemoryEventStore, InMemoryManifest};
use chronicle_event_store::pg_event_store::PgEventStore;
use chronicle_event_store::pg_manifest::PgManifest;
use chronicle_event_store::schema;
use chronicle_orders::application::projections::{OrderSummaries, OrderSummaryBuilder};
use chronicle_orders::domain::aggregates::Order;
use chronicle_orders::domain::commands::{AddItem, CreateOrder, SubmitOrder};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type Stores = (Arc<dyn EventStore>, Arc<dyn Manifest>);

async fn stores() -> Result<Stores, Box<dyn Error>> {
    let store = std::env::var("CHRONICLE_STORE").unwrap_or_else(|_| "memory".to_string());
    let stores: Stores = match store.as_str() {
        "memory" => (
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryManifest::new()),
        ),
        "postgres" => {
            let pool = EventStoreConfig::from_env()?.connect().await?;
            schema::ensure_schema(&pool).await?;
            (
                Arc::new(PgEventStore::new(pool.clone())),
                Arc::new(PgManifest::new(pool)),
            )
        }
        other => {
            return Err(format!("CHRONICLE_STORE must be `memory` or `postgres`, got `{other}`").into());
        }
    };
    tracing::info!(store = %store, "event store selected");
    Ok(stores)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let (event_store, manifest) = stores().await?;
    let summaries = OrderSummaries::new();
    let mut context = DomainContext::new(event_store, manifest);
    OrderSummaryBuilder::register(&mut context, &summaries);
    let context = Arc::new(context);

    let _published = context
        .event_bus()
        .subscribe(Arc::new(|notification: &Notification| {
            tracing::info!(
                aggregate_kind = %notification.aggregate_kind,
                aggregate_id = %notification.aggregate_id,
                version = notification.version,
                event_type = %notification.event_type,
                "published"
            );
        }));

    let executor = context.new_command_executor::<Order>().with_retries(3);
    let order_id = Uuid::now_v7();

    executor
        .execute(&CreateOrder {
            correlation_id: Uuid::now_v7(),
            order_id,
            customer: "ada".to_owned(),
        })
        .await?;
    executor
        .execute_existing(&AddItem {
            correlation_id: Uuid::now_v7(),
            order_id,
            sku: "tea".to_owned(),
            quantity: 2,
            unit_price_cents: 450,
        })
        .await?;

    // Two handles loaded at the same version: the second save must lose.
    let repository = context.get_aggregate_repository::<Order>(Arc::clone(context.event_bus()));
    let mut first = repository.get_by_id(order_id).await?.ok_or("order missing")?;
    let mut stale = repository.get_by_id(order_id).await?.ok_or("order missing")?;
    let clock = context.clock();
    first.add_item("cup", 1, 1200, Uuid::now_v7(), clock)?;
    repository.save(&mut first).await?;
    stale.add_item("spoon", 4, 150, Uuid::now_v7(), clock)?;
    match repository.save(&mut stale).await {
        Err(err) if err.is_concurrency_conflict() => {
            tracing::warn!(error = %err, "stale save rejected");
        }
        Err(err) => return Err(err.into()),
        Ok(()) => return Err("stale save was accepted".into()),
    }
    repository.dispose().await;

    let submitted = executor
        .execute_existing(&SubmitOrder {
            correlation_id: Uuid::now_v7(),
            order_id,
        })
        .await?;
    tracing::info!(
        %order_id,
        version = submitted.version(),
        total_cents = submitted.total_cents(),
        "order submitted"
    );

    for summary in summaries.all() {
        tracing::info!(summary = %serde_json::to_string(&summary)?, "order summary");
    }
    Ok(())
}
