//! Fixtures shared by the unit and integration tests of this crate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use pantry_core::{ActorId, ProductId, StoreId};
use pantry_events::{EventEnvelope, InMemoryEventBus};
use pantry_inventory::{InventoryState, ProductSettings};

use crate::context::RequestContext;
use crate::pipeline::CommitPipeline;
use crate::retry::RetryPolicy;
use crate::store::{InMemoryInventoryStore, InventoryStore};

pub type TestStore = Arc<InMemoryInventoryStore>;
pub type TestBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type TestPipeline = CommitPipeline<TestStore, TestBus>;

pub fn pipeline() -> Arc<TestPipeline> {
    Arc::new(CommitPipeline::new(
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(InMemoryEventBus::new()),
        RetryPolicy::new(8, Duration::from_millis(1)),
    ))
}

pub fn context() -> RequestContext {
    RequestContext::new(StoreId::new(), ActorId::new())
}

pub fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

/// Register a product in `ctx`'s store with a reorder point, no stock.
pub fn product(pipeline: &TestPipeline, ctx: RequestContext, name: &str, reorder_point: i64) -> InventoryState {
    pipeline
        .store()
        .upsert_settings(
            ProductSettings {
                store_id: ctx.store_id,
                product_id: ProductId::new(),
                name: name.to_string(),
                sku: None,
                reorder_point: dec(reorder_point),
                unit_cost: dec(2),
                allow_backorder: false,
            },
            Utc::now(),
        )
        .unwrap()
}
