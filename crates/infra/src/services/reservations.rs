//! Reservation Coordinator: couples the order state machine to the ledger.
//!
//! | Transition | Ledger effect (one commit) |
//! |------------|----------------------------|
//! | → confirmed | one `reservation` per line; all lines or none |
//! | → delivered | `release` per active reservation, `sale` per line, sale record |
//! | → cancelled | `release` per active reservation |
//! | → preparing / ready | none |
//!
//! The order write is a compare-and-swap on the order version, so two
//! concurrent transitions of the same order cannot both win.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use pantry_core::{
    ActorId, Aggregate, AggregateRoot, ExpectedVersion, OrderId, ProductId, TransactionId,
};
use pantry_events::{EventBus, EventEnvelope};
use pantry_inventory::{InventoryState, MovementType, Reference, StockKey, StockMovement};
use pantry_sales::{
    ChangeStatus, Order, OrderCommand, OrderLine, OrderStatus, PlaceOrder, Reservation,
    ReservationStatus, SaleRecord,
};

use crate::context::RequestContext;
use crate::error::ServiceError;
use crate::ledger::load_row;
use crate::pipeline::{CommitPipeline, Decision, envelope};
use crate::store::{CommitBatch, InventoryStore, OrderWrite, SaleWrite};

pub const ORDER_STREAM_TYPE: &str = "sales.order";

const SWEEP_BATCH: usize = 500;

pub struct ReservationCoordinator<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
    ttl: Option<chrono::Duration>,
}

impl<S, B> Clone for ReservationCoordinator<S, B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            ttl: self.ttl,
        }
    }
}

/// Rows read during one decide step, each loaded once and expected at the
/// version it was read.
struct Rows<'a, S: ?Sized> {
    store: &'a S,
    ctx: RequestContext,
    rows: BTreeMap<ProductId, InventoryState>,
}

impl<'a, S: InventoryStore + ?Sized> Rows<'a, S> {
    fn new(store: &'a S, ctx: RequestContext) -> Self {
        Self {
            store,
            ctx,
            rows: BTreeMap::new(),
        }
    }

    fn touch(&mut self, product_id: ProductId) -> Result<(), ServiceError> {
        if !self.rows.contains_key(&product_id) {
            let row = load_row(self.store, StockKey::new(self.ctx.store_id, product_id))?;
            self.rows.insert(product_id, row);
        }
        Ok(())
    }

    fn expect_all(&self, batch: &mut CommitBatch) {
        for row in self.rows.values() {
            batch.expect_row(row);
        }
    }
}

impl<S, B> ReservationCoordinator<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(pipeline: Arc<CommitPipeline<S, B>>, ttl: Option<chrono::Duration>) -> Self {
        Self { pipeline, ttl }
    }

    /// Create a `pending` order. Every line must name a product stocked in the
    /// caller's store; nothing is reserved yet.
    #[instrument(skip(self, lines), fields(store_id = %ctx.store_id, lines = lines.len()), err)]
    pub fn place_order(
        &self,
        ctx: RequestContext,
        lines: Vec<OrderLine>,
        discount: Decimal,
    ) -> Result<Order, ServiceError> {
        let order_id = OrderId::new();

        let executed = self.pipeline.execute("orders.place", |store| {
            let mut rows = Rows::new(store, ctx);
            for line in &lines {
                rows.touch(line.product_id)?;
            }

            let mut order = Order::empty(order_id);
            let events = order.handle(&OrderCommand::PlaceOrder(PlaceOrder {
                store_id: ctx.store_id,
                order_id,
                lines: lines.clone(),
                discount,
                occurred_at: Utc::now(),
            }))?;

            let mut published = Vec::with_capacity(events.len());
            for event in &events {
                order.apply(event);
                published.push(envelope(
                    ctx.store_id,
                    *order_id.as_uuid(),
                    ORDER_STREAM_TYPE,
                    order.version(),
                    event,
                )?);
            }

            let batch = CommitBatch {
                order: Some(OrderWrite {
                    order: order.clone(),
                    expected: ExpectedVersion::NoRow,
                }),
                ..CommitBatch::default()
            };
            let mut decision = Decision::new(batch, order);
            decision.events = published;
            Ok(decision)
        })?;

        info!(order_id = %order_id, "order placed");
        Ok(executed.output)
    }

    pub fn order(&self, ctx: RequestContext, order_id: OrderId) -> Result<Order, ServiceError> {
        self.pipeline
            .store()
            .order(ctx.store_id, order_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))
    }

    pub fn reservations(
        &self,
        ctx: RequestContext,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, ServiceError> {
        Ok(self
            .pipeline
            .store()
            .reservations_for_order(ctx.store_id, order_id)?)
    }

    /// Move an order to `to`, applying the stock effect of the transition in
    /// the same commit as the status change.
    #[instrument(skip(self), fields(store_id = %ctx.store_id, order_id = %order_id, to = %to), err)]
    pub fn transition(
        &self,
        ctx: RequestContext,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<Order, ServiceError> {
        let ttl = self.ttl;

        let executed = self.pipeline.execute("orders.transition", |store| {
            let current = store
                .order(ctx.store_id, order_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
            let from = current.status();
            if !from.can_transition_to(to) {
                return Err(ServiceError::InvalidTransition(format!(
                    "cannot move order {order_id} from {from} to {to}"
                )));
            }

            let now = Utc::now();
            let events = current.handle(&OrderCommand::ChangeStatus(ChangeStatus {
                store_id: ctx.store_id,
                order_id,
                to,
                occurred_at: now,
            }))?;
            let mut next = current.clone();
            let mut published = Vec::with_capacity(events.len());
            for event in &events {
                next.apply(event);
                published.push(envelope(
                    ctx.store_id,
                    *order_id.as_uuid(),
                    ORDER_STREAM_TYPE,
                    next.version(),
                    event,
                )?);
            }

            let mut batch = CommitBatch {
                order: Some(OrderWrite {
                    order: next.clone(),
                    expected: ExpectedVersion::Exact(current.version()),
                }),
                ..CommitBatch::default()
            };
            let mut rows = Rows::new(store, ctx);

            match to {
                OrderStatus::Confirmed => {
                    for line in current.lines() {
                        rows.touch(line.product_id)?;
                        batch.movements.push(order_movement(
                            ctx,
                            order_id,
                            line.product_id,
                            MovementType::Reservation,
                            line.quantity,
                            now,
                        )?);
                        batch.open_reservations.push(Reservation::new(
                            ctx.store_id,
                            order_id,
                            line.product_id,
                            line.quantity,
                            now,
                            ttl,
                        ));
                    }
                }
                OrderStatus::Delivered => {
                    release_active(store, ctx, order_id, &mut rows, &mut batch, ReservationStatus::Converted, now)?;
                    for line in current.lines() {
                        rows.touch(line.product_id)?;
                        batch.movements.push(order_movement(
                            ctx,
                            order_id,
                            line.product_id,
                            MovementType::Sale,
                            -line.quantity,
                            now,
                        )?);
                    }
                    batch.sale = Some(SaleWrite {
                        record: SaleRecord::new(
                            TransactionId::from(order_id),
                            ctx.store_id,
                            current.lines(),
                            now,
                        ),
                        expected: ExpectedVersion::NoRow,
                    });
                }
                OrderStatus::Cancelled => {
                    release_active(store, ctx, order_id, &mut rows, &mut batch, ReservationStatus::Released, now)?;
                }
                OrderStatus::Pending | OrderStatus::Preparing | OrderStatus::Ready => {}
            }

            rows.expect_all(&mut batch);
            let mut decision = Decision::new(batch, next);
            decision.events = published;
            Ok(decision)
        })?;

        info!(status = %executed.output.status(), movements = executed.committed.movements.len(), "order transitioned");
        Ok(executed.output)
    }

    /// Release every active reservation whose expiry is at or before `now`.
    ///
    /// Each reservation is released in its own commit; one that was converted
    /// or released concurrently is skipped. Returns how many were released.
    #[instrument(skip(self))]
    pub fn release_expired(&self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let candidates = self.pipeline.store().expired_reservations(now, SWEEP_BATCH)?;
        let mut released = 0;

        for candidate in candidates {
            let ctx = RequestContext::new(candidate.store_id, ActorId::SYSTEM);
            let outcome = self.pipeline.execute("reservations.expire", |store| {
                let still_active = store
                    .reservations_for_order(ctx.store_id, candidate.order_id)?
                    .into_iter()
                    .any(|r| r.id == candidate.id && r.is_active());
                if !still_active {
                    return Ok(Decision::new(CommitBatch::default(), false));
                }

                let row = load_row(store, StockKey::new(ctx.store_id, candidate.product_id))?;
                let mut batch = CommitBatch::default();
                batch.expect_row(&row);
                batch.movements.push(release_movement(ctx, &candidate, "reservation expired", Utc::now())?);
                batch
                    .close_reservations
                    .push((candidate.id, ReservationStatus::Expired));
                Ok(Decision::new(batch, true))
            });

            match outcome {
                Ok(executed) if executed.output => released += 1,
                Ok(_) => {}
                Err(ServiceError::ServiceUnavailable(msg)) => {
                    return Err(ServiceError::ServiceUnavailable(msg));
                }
                Err(e) => {
                    warn!(reservation_id = %candidate.id, error = %e, "could not release expired reservation");
                }
            }
        }

        if released > 0 {
            info!(released, "released expired reservations");
        }
        Ok(released)
    }
}

fn order_movement(
    ctx: RequestContext,
    order_id: OrderId,
    product_id: ProductId,
    movement_type: MovementType,
    delta: Decimal,
    at: DateTime<Utc>,
) -> Result<StockMovement, ServiceError> {
    Ok(StockMovement::new(
        ctx.store_id,
        product_id,
        movement_type,
        delta,
        None,
        Reference::Order(order_id),
        ctx.actor_id,
        at,
    )?)
}

fn release_movement(
    ctx: RequestContext,
    reservation: &Reservation,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<StockMovement, ServiceError> {
    Ok(StockMovement::new(
        ctx.store_id,
        reservation.product_id,
        MovementType::Release,
        -reservation.quantity,
        Some(reason.to_string()),
        Reference::Order(reservation.order_id),
        ctx.actor_id,
        at,
    )?)
}

fn release_active<S: InventoryStore + ?Sized>(
    store: &S,
    ctx: RequestContext,
    order_id: OrderId,
    rows: &mut Rows<'_, S>,
    batch: &mut CommitBatch,
    closed_as: ReservationStatus,
    at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let reason = match closed_as {
        ReservationStatus::Converted => "order delivered",
        _ => "order cancelled",
    };
    for reservation in store
        .reservations_for_order(ctx.store_id, order_id)?
        .into_iter()
        .filter(Reservation::is_active)
    {
        rows.touch(reservation.product_id)?;
        batch.movements.push(release_movement(ctx, &reservation, reason, at)?);
        batch.close_reservations.push((reservation.id, closed_as));
    }
    Ok(())
}
