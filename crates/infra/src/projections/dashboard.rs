use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use pantry_core::StoreId;
use pantry_events::EventEnvelope;
use pantry_inventory::InventoryEvent;
use pantry_sales::{OrderEvent, OrderStatus, ReturnEvent};

use crate::read_model::StoreScopedStore;

/// Per-store dashboard figures, maintained incrementally from published events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub orders_by_status: BTreeMap<OrderStatus, u64>,
    pub orders_placed: u64,
    /// Sum of `final_amount` over delivered orders.
    pub delivered_revenue: Decimal,
    pub movements_recorded: u64,
    pub returns_processed: u64,
}

/// Key of the single summary record each store has.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    store_id: StoreId,
    stream_type: String,
    stream_id: Uuid,
}

#[derive(Debug, Error)]
pub enum DashboardProjectionError {
    #[error("failed to deserialize {event_type}: {message}")]
    Deserialize { event_type: String, message: String },

    #[error("store isolation violation: {0}")]
    StoreIsolation(String),
}

/// Dashboard projection.
///
/// Idempotent under at-least-once delivery: each (store, stream) keeps the
/// last sequence applied and anything at or below it is skipped. Ledger
/// sequences are global, so a stream's sequences increase but may skip.
#[derive(Debug)]
pub struct DashboardProjection<S>
where
    S: StoreScopedStore<SummaryKey, DashboardSummary>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> DashboardProjection<S>
where
    S: StoreScopedStore<SummaryKey, DashboardSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn summary(&self, store_id: StoreId) -> DashboardSummary {
        self.store.get(store_id, &SummaryKey).unwrap_or_default()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DashboardProjectionError> {
        let Ok(mut cursors) = self.cursors.write() else {
            return Ok(());
        };

        let store_id = envelope.store_id();
        let key = CursorKey {
            store_id,
            stream_type: envelope.stream_type().to_string(),
            stream_id: envelope.stream_id(),
        };
        let seq = envelope.sequence_number();
        if seq <= cursors.get(&key).copied().unwrap_or(0) {
            return Ok(());
        }

        let mut summary = self.summary(store_id);
        let event_store = match envelope.event_type() {
            "inventory.movement.recorded" => {
                let InventoryEvent::MovementRecorded(m) = decode::<InventoryEvent>(envelope)?;
                summary.movements_recorded += 1;
                m.store_id
            }
            "sales.order.placed" | "sales.order.status_changed" => match decode::<OrderEvent>(envelope)? {
                OrderEvent::OrderPlaced(e) => {
                    summary.orders_placed += 1;
                    bump(&mut summary, OrderStatus::Pending, 1);
                    e.store_id
                }
                OrderEvent::OrderStatusChanged(e) => {
                    bump(&mut summary, e.from, -1);
                    bump(&mut summary, e.to, 1);
                    if e.to == OrderStatus::Delivered {
                        summary.delivered_revenue =
                            summary.delivered_revenue.saturating_add(e.final_amount);
                    }
                    e.store_id
                }
            },
            "sales.return.processed" => {
                let ReturnEvent::ReturnProcessed(r) = decode::<ReturnEvent>(envelope)?;
                summary.returns_processed += 1;
                r.store_id
            }
            _ => {
                cursors.insert(key, seq);
                return Ok(());
            }
        };

        if event_store != store_id {
            return Err(DashboardProjectionError::StoreIsolation(format!(
                "event for store {event_store} arrived in an envelope for {store_id}"
            )));
        }

        self.store.upsert(store_id, SummaryKey, summary);
        cursors.insert(key, seq);
        Ok(())
    }

    /// Rebuild from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), DashboardProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        let mut stores: Vec<StoreId> = envs.iter().map(|e| e.store_id()).collect();
        stores.sort();
        stores.dedup();
        for s in stores {
            self.store.clear_store(s);
        }

        envs.sort_by_key(|e| (e.store_id(), e.stream_id(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

fn bump(summary: &mut DashboardSummary, status: OrderStatus, by: i64) {
    let count = summary.orders_by_status.entry(status).or_default();
    *count = count.saturating_add_signed(by);
    if *count == 0 {
        summary.orders_by_status.remove(&status);
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    envelope: &EventEnvelope<JsonValue>,
) -> Result<T, DashboardProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| {
        DashboardProjectionError::Deserialize {
            event_type: envelope.event_type().to_string(),
            message: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use pantry_core::{OrderId, ProductId};
    use pantry_sales::{OrderLine, OrderPlaced, OrderStatusChanged};

    use super::*;
    use crate::read_model::InMemoryStoreScoped;

    fn projection() -> DashboardProjection<Arc<InMemoryStoreScoped<SummaryKey, DashboardSummary>>> {
        DashboardProjection::new(Arc::new(InMemoryStoreScoped::new()))
    }

    fn order_env(store_id: StoreId, order_id: OrderId, seq: u64, event: &OrderEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::from_typed(store_id, *order_id.as_uuid(), "sales.order", seq, event).unwrap()
    }

    fn placed(store_id: StoreId, order_id: OrderId) -> OrderEvent {
        OrderEvent::OrderPlaced(OrderPlaced {
            store_id,
            order_id,
            lines: vec![OrderLine {
                product_id: ProductId::new(),
                quantity: Decimal::ONE,
                unit_price: Decimal::from(12),
            }],
            discount: Decimal::from(2),
            final_amount: Decimal::from(10),
            occurred_at: Utc::now(),
        })
    }

    fn changed(store_id: StoreId, order_id: OrderId, from: OrderStatus, to: OrderStatus) -> OrderEvent {
        OrderEvent::OrderStatusChanged(OrderStatusChanged {
            store_id,
            order_id,
            from,
            to,
            final_amount: Decimal::from(10),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn counts_and_revenue_follow_order_events() {
        let p = projection();
        let store = StoreId::new();
        let order = OrderId::new();

        let path = [
            (OrderStatus::Pending, OrderStatus::Confirmed),
            (OrderStatus::Confirmed, OrderStatus::Preparing),
            (OrderStatus::Preparing, OrderStatus::Ready),
            (OrderStatus::Ready, OrderStatus::Delivered),
        ];
        p.apply_envelope(&order_env(store, order, 1, &placed(store, order))).unwrap();
        for (i, (from, to)) in path.into_iter().enumerate() {
            p.apply_envelope(&order_env(store, order, i as u64 + 2, &changed(store, order, from, to)))
                .unwrap();
        }

        let s = p.summary(store);
        assert_eq!(s.orders_placed, 1);
        assert_eq!(s.orders_by_status.get(&OrderStatus::Delivered), Some(&1));
        assert_eq!(s.orders_by_status.get(&OrderStatus::Pending), None);
        assert_eq!(s.delivered_revenue, Decimal::from(10));
        assert_eq!(p.summary(StoreId::new()), DashboardSummary::default());
    }

    #[test]
    fn redelivered_envelopes_are_ignored() {
        let p = projection();
        let store = StoreId::new();
        let order = OrderId::new();
        let env = order_env(store, order, 1, &placed(store, order));

        p.apply_envelope(&env).unwrap();
        p.apply_envelope(&env).unwrap();
        assert_eq!(p.summary(store).orders_placed, 1);

        p.rebuild_from_scratch(vec![env.clone(), env]).unwrap();
        assert_eq!(p.summary(store).orders_placed, 1);
    }

    #[test]
    fn cross_store_payloads_are_rejected() {
        let p = projection();
        let (store, other) = (StoreId::new(), StoreId::new());
        let order = OrderId::new();

        let err = p
            .apply_envelope(&order_env(store, order, 1, &placed(other, order)))
            .unwrap_err();
        assert!(matches!(err, DashboardProjectionError::StoreIsolation(_)));
        assert_eq!(p.summary(store), DashboardSummary::default());
    }
}
