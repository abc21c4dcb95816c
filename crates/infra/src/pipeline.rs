//! Commit pipeline shared by every mutating service.
//!
//! ```text
//! decide (read rows, validate, build CommitBatch)
//!   ↓
//! commit (one atomic unit, compare-and-swap on every touched row)
//!   ↓  conflict? → back off and decide again (bounded)
//! publish (movement envelopes + domain events, after commit only)
//! ```
//!
//! The decide closure is re-run from scratch on every attempt, so it always
//! sees the rows as they are *now*; a `set` adjustment computes its delta from
//! the version it is about to compare-and-swap against.
//!
//! Publication is at-least-once and never un-commits: a bus failure after a
//! successful commit is logged and the call still succeeds.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use pantry_core::StoreId;
use pantry_events::{Event, EventBus, EventEnvelope};
use pantry_inventory::InventoryEvent;

use crate::error::ServiceError;
use crate::retry::RetryPolicy;
use crate::store::{CommitBatch, Committed, InventoryStore};

pub const MOVEMENT_STREAM_TYPE: &str = "inventory.stock";

/// Outcome of one decide step.
#[derive(Debug)]
pub struct Decision<T> {
    pub batch: CommitBatch,
    /// Domain events to publish once the batch is committed.
    pub events: Vec<EventEnvelope<JsonValue>>,
    pub output: T,
}

impl<T> Decision<T> {
    pub fn new(batch: CommitBatch, output: T) -> Self {
        Self {
            batch,
            events: Vec::new(),
            output,
        }
    }

    pub fn with_event(mut self, event: EventEnvelope<JsonValue>) -> Self {
        self.events.push(event);
        self
    }
}

/// Encode a domain event for publication after commit.
pub fn envelope<E: Event + Serialize>(
    store_id: StoreId,
    stream_id: Uuid,
    stream_type: &str,
    sequence: u64,
    event: &E,
) -> Result<EventEnvelope<JsonValue>, ServiceError> {
    EventEnvelope::from_typed(store_id, stream_id, stream_type, sequence, event)
        .map_err(|e| ServiceError::Storage(format!("could not encode {}: {e}", event.event_type())))
}

#[derive(Debug)]
pub struct Executed<T> {
    pub output: T,
    pub committed: Committed,
}

#[derive(Debug)]
pub struct CommitPipeline<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> CommitPipeline<S, B> {
    pub fn new(store: S, bus: B, retry: RetryPolicy) -> Self {
        Self { store, bus, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

impl<S, B> CommitPipeline<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Decide, commit and publish, retrying the whole cycle on conflicts.
    ///
    /// Rejections from `decide` (validation, insufficient stock, ...) are
    /// returned as-is on the first attempt and leave nothing behind.
    pub fn execute<T>(
        &self,
        operation: &'static str,
        mut decide: impl FnMut(&S) -> Result<Decision<T>, ServiceError>,
    ) -> Result<Executed<T>, ServiceError> {
        let (executed, events) = self.retry.run(operation, |attempt| {
            let decision = decide(&self.store)?;
            debug!(
                operation,
                attempt,
                movements = decision.batch.movements.len(),
                "committing batch"
            );
            let committed = self.store.commit(decision.batch)?;
            Ok((
                Executed {
                    output: decision.output,
                    committed,
                },
                decision.events,
            ))
        })?;

        self.publish(operation, &executed.committed, events);
        Ok(executed)
    }

    fn publish(
        &self,
        operation: &'static str,
        committed: &Committed,
        events: Vec<EventEnvelope<JsonValue>>,
    ) {
        for movement in &committed.movements {
            let envelope = EventEnvelope::from_typed(
                movement.store_id,
                *movement.product_id.as_uuid(),
                MOVEMENT_STREAM_TYPE,
                movement.sequence,
                &InventoryEvent::MovementRecorded(movement.clone()),
            );
            match envelope {
                Ok(envelope) => self.send(operation, envelope),
                Err(e) => warn!(operation, movement_id = %movement.id, error = %e, "could not encode movement event"),
            }
        }
        for envelope in events {
            self.send(operation, envelope);
        }
    }

    fn send(&self, operation: &'static str, envelope: EventEnvelope<JsonValue>) {
        let event_type = envelope.event_type().to_string();
        if let Err(e) = self.bus.publish(envelope) {
            warn!(operation, event_type, error = ?e, "publish failed after commit");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use pantry_core::{ActorId, ProductId, StoreId};
    use pantry_events::InMemoryEventBus;
    use pantry_inventory::{InventoryState, MovementType, ProductSettings, Reference, StockMovement};

    use super::*;
    use crate::store::InMemoryInventoryStore;

    fn setup() -> (
        CommitPipeline<Arc<InMemoryInventoryStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>,
        InventoryState,
    ) {
        let store = Arc::new(InMemoryInventoryStore::new());
        let state = store
            .upsert_settings(
                ProductSettings {
                    store_id: StoreId::new(),
                    product_id: ProductId::new(),
                    name: "Flour".to_string(),
                    sku: None,
                    reorder_point: Decimal::ZERO,
                    unit_cost: Decimal::ONE,
                    allow_backorder: false,
                },
                Utc::now(),
            )
            .unwrap();
        let pipeline = CommitPipeline::new(
            store,
            Arc::new(InMemoryEventBus::new()),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        (pipeline, state)
    }

    fn purchase(state: &InventoryState, qty: i64) -> StockMovement {
        StockMovement::new(
            state.store_id,
            state.product_id,
            MovementType::Purchase,
            Decimal::from(qty),
            None,
            Reference::None,
            ActorId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn committed_movements_are_published_with_their_sequence() {
        let (pipeline, state) = setup();
        let sub = pipeline.bus().subscribe();

        pipeline
            .execute("test", |store| {
                let row = store.state(state.key())?.unwrap();
                let mut batch = CommitBatch::default();
                batch.expect_row(&row);
                batch.movements.push(purchase(&row, 4));
                Ok(Decision::new(batch, ()))
            })
            .unwrap();

        let env = sub.try_recv().unwrap();
        assert_eq!(env.event_type(), "inventory.movement.recorded");
        assert_eq!(env.sequence_number(), 1);
        assert_eq!(env.store_id(), state.store_id);
    }

    #[test]
    fn stale_decisions_are_redecided() {
        let (pipeline, state) = setup();
        let calls = AtomicU32::new(0);

        let executed = pipeline
            .execute("test", |store| {
                let row = store.state(state.key())?.unwrap();
                let mut batch = CommitBatch::default();
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Sneak a concurrent write in between read and commit.
                    let mut other = CommitBatch::default();
                    other.expect_row(&row);
                    other.movements.push(purchase(&row, 1));
                    store.commit(other)?;
                }
                batch.expect_row(&row);
                batch.movements.push(purchase(&row, 2));
                Ok(Decision::new(batch, ()))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let row = executed.committed.state(state.key()).unwrap();
        assert_eq!(row.current_stock, Decimal::from(3));
    }

    #[test]
    fn rejections_publish_nothing() {
        let (pipeline, state) = setup();
        let sub = pipeline.bus().subscribe();

        let err = pipeline
            .execute::<()>("test", |_| Err(ServiceError::Validation("nope".into())))
            .unwrap_err();

        assert_eq!(err, ServiceError::Validation("nope".into()));
        assert!(sub.try_recv().is_err());
        assert_eq!(
            pipeline.store().state(state.key()).unwrap().unwrap().version,
            0
        );
    }
}
