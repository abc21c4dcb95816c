//! Integration tests for the full stock pipeline.
//!
//! Tests: Service → CommitPipeline → InventoryStore → EventBus → Projection
//!
//! Verifies:
//! - The worked scenarios (adjust, reserve, cancel, return, last-unit race)
//! - Multi-line confirmations are all-or-nothing, also under contention
//! - Replaying the ledger always reproduces the projected rows
//! - Published events keep the dashboard read model current

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use serde_json::Value as JsonValue;

    use pantry_core::ProductId;
    use pantry_events::{EventBus, EventEnvelope};
    use pantry_inventory::{AdjustmentKind, InventoryState, StockStatus};
    use pantry_sales::{OrderLine, OrderStatus, ReturnItem};

    use crate::context::RequestContext;
    use crate::error::ServiceError;
    use crate::ledger::StockLedger;
    use crate::projections::{DashboardProjection, DashboardSummary, SummaryKey};
    use crate::read_model::InMemoryStoreScoped;
    use crate::services::{
        AdjustmentService, PointOfSale, ReorderMonitor, ReservationCoordinator, ReturnProcessor,
    };
    use crate::store::InventoryStore;
    use crate::test_support::{
        TestBus, TestPipeline, TestStore, context, dec, pipeline, product,
    };
    use crate::workers::ProjectionWorker;

    struct Harness {
        pipeline: Arc<TestPipeline>,
        adjust: AdjustmentService<TestStore, TestBus>,
        orders: ReservationCoordinator<TestStore, TestBus>,
        returns: ReturnProcessor<TestStore, TestBus>,
        pos: PointOfSale<TestStore, TestBus>,
        ledger: StockLedger<TestStore, TestBus>,
        monitor: ReorderMonitor<TestStore>,
    }

    fn harness() -> Harness {
        let p = pipeline();
        Harness {
            adjust: AdjustmentService::new(Arc::clone(&p)),
            orders: ReservationCoordinator::new(Arc::clone(&p), None),
            returns: ReturnProcessor::new(Arc::clone(&p)),
            pos: PointOfSale::new(Arc::clone(&p)),
            ledger: StockLedger::new(Arc::clone(&p)),
            monitor: ReorderMonitor::new(Arc::clone(p.store())),
            pipeline: p,
        }
    }

    impl Harness {
        fn row(&self, r: &InventoryState) -> InventoryState {
            self.pipeline.store().state(r.key()).unwrap().unwrap()
        }

        fn stocked(&self, ctx: RequestContext, name: &str, reorder_point: i64, qty: i64) -> InventoryState {
            let r = product(&self.pipeline, ctx, name, reorder_point);
            self.adjust
                .adjust(ctx, r.product_id, AdjustmentKind::Set, dec(qty), "opening count", None)
                .unwrap()
        }

        fn line(r: &InventoryState, qty: i64) -> OrderLine {
            OrderLine {
                product_id: r.product_id,
                quantity: dec(qty),
                unit_price: dec(5),
            }
        }
    }

    #[test]
    fn adjustment_scenario_tracks_reorder_status() {
        let h = harness();
        let ctx = context();
        let x = h.stocked(ctx, "Small chops", 5, 10);

        let s = h.adjust.adjust(ctx, x.product_id, AdjustmentKind::Decrease, dec(3), "sale", None).unwrap();
        assert_eq!(s.current_stock, dec(7));
        assert_eq!(h.monitor.status(ctx, x.product_id).unwrap(), StockStatus::InStock);

        let s = h.adjust.adjust(ctx, x.product_id, AdjustmentKind::Decrease, dec(3), "sale", None).unwrap();
        assert_eq!(s.current_stock, dec(4));
        assert_eq!(h.monitor.status(ctx, x.product_id).unwrap(), StockStatus::LowStock);

        let before = h.row(&x);
        let err = h
            .adjust
            .adjust(ctx, x.product_id, AdjustmentKind::Decrease, dec(10), "sale", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
        assert_eq!(h.row(&x), before);
        assert_eq!(h.ledger.list_by_product(x.key(), None).count(), 3);
    }

    #[test]
    fn reservation_scenario_confirm_then_cancel() {
        let h = harness();
        let ctx = context();
        let x = h.stocked(ctx, "Small chops", 5, 4);

        let order = h.orders.place_order(ctx, vec![Harness::line(&x, 2)], dec(0)).unwrap();
        h.orders.transition(ctx, order.id_typed(), OrderStatus::Confirmed).unwrap();
        let held = h.row(&x);
        assert_eq!((held.reserved_stock, held.available_stock()), (dec(2), dec(2)));

        h.orders.transition(ctx, order.id_typed(), OrderStatus::Cancelled).unwrap();
        let freed = h.row(&x);
        assert_eq!((freed.reserved_stock, freed.available_stock()), (dec(0), dec(4)));
        assert!(h.ledger.audit(x.key()).unwrap().consistent);
    }

    #[test]
    fn return_scenario_is_bounded_by_the_original_line() {
        let h = harness();
        let ctx = context();
        let x = h.stocked(ctx, "Moi moi", 0, 10);

        let sale = h.pos.sell(ctx, vec![Harness::line(&x, 3)], dec(0)).unwrap();
        assert_eq!(h.row(&x).current_stock, dec(7));

        let items = |q| vec![ReturnItem { product_id: x.product_id, quantity: dec(q) }];
        let ret = h
            .returns
            .process_return(ctx, sale.transaction_id, items(2), "wrong order")
            .unwrap();
        assert_eq!(ret.original_transaction_id, sale.transaction_id);
        assert_eq!(h.row(&x).current_stock, dec(9));

        let err = h
            .returns
            .process_return(ctx, sale.transaction_id, items(2), "wrong order")
            .unwrap_err();
        assert!(matches!(err, ServiceError::ReturnExceedsOriginal(_)));
        assert_eq!(h.row(&x).current_stock, dec(9));
        assert_eq!(h.row(&x).reserved_stock, dec(0));

        h.returns
            .process_return(ctx, sale.transaction_id, items(1), "wrong order")
            .unwrap();
        assert_eq!(h.row(&x).current_stock, dec(10));
    }

    #[test]
    fn delivered_orders_can_be_returned_against() {
        let h = harness();
        let ctx = context();
        let x = h.stocked(ctx, "Fried rice", 0, 6);

        let order = h.orders.place_order(ctx, vec![Harness::line(&x, 4)], dec(0)).unwrap();
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Delivered,
        ] {
            h.orders.transition(ctx, order.id_typed(), status).unwrap();
        }
        assert_eq!(h.row(&x).current_stock, dec(2));

        h.returns
            .process_return(
                ctx,
                order.id_typed().into(),
                vec![ReturnItem { product_id: x.product_id, quantity: dec(4) }],
                "event cancelled",
            )
            .unwrap();
        assert_eq!(h.row(&x).current_stock, dec(6));
    }

    #[test]
    fn last_unit_race_has_exactly_one_winner() {
        for _ in 0..20 {
            let h = Arc::new(harness());
            let ctx = context();
            let x = h.stocked(ctx, "Suya", 0, 1);

            let a = h.orders.place_order(ctx, vec![Harness::line(&x, 1)], dec(0)).unwrap();
            let b = h.orders.place_order(ctx, vec![Harness::line(&x, 1)], dec(0)).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = [a.id_typed(), b.id_typed()]
                .into_iter()
                .map(|order_id| {
                    let h = Arc::clone(&h);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        h.orders.transition(ctx, order_id, OrderStatus::Confirmed)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|j| j.join().unwrap()).collect();

            let won = results.iter().filter(|r| r.is_ok()).count();
            let starved = results
                .iter()
                .filter(|r| matches!(r, Err(ServiceError::InsufficientStock(_))))
                .count();
            assert_eq!((won, starved), (1, 1), "{results:?}");

            let row = h.row(&x);
            assert_eq!(row.reserved_stock, dec(1));
            assert_eq!(row.available_stock(), dec(0));
        }
    }

    #[test]
    fn concurrent_multi_line_confirmations_never_leave_partial_holds() {
        let h = Arc::new(harness());
        let ctx = context();
        let rice = h.stocked(ctx, "Rice", 0, 3);
        let chicken = h.stocked(ctx, "Chicken", 0, 3);

        // Each order wants 2 of each; only one can be served.
        let orders: Vec<_> = (0..4)
            .map(|_| {
                h.orders
                    .place_order(ctx, vec![Harness::line(&rice, 2), Harness::line(&chicken, 2)], dec(0))
                    .unwrap()
                    .id_typed()
            })
            .collect();

        let barrier = Arc::new(Barrier::new(orders.len()));
        let results: Vec<_> = orders
            .iter()
            .map(|&order_id| {
                let h = Arc::clone(&h);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    h.orders.transition(ctx, order_id, OrderStatus::Confirmed)
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|j| j.join().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(h.row(&rice).reserved_stock, dec(2));
        assert_eq!(h.row(&chicken).reserved_stock, dec(2));
        for order_id in orders {
            let holds = h.orders.reservations(ctx, order_id).unwrap();
            assert!(holds.is_empty() || holds.len() == 2);
        }
    }

    #[test]
    fn concurrent_adjustments_all_land_through_retries() {
        let h = Arc::new(harness());
        let ctx = context();
        let x = product(&h.pipeline, ctx, "Bottled water", 0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let h = Arc::clone(&h);
                thread::spawn(move || {
                    for _ in 0..10 {
                        h.adjust
                            .adjust(ctx, x.product_id, AdjustmentKind::Increase, dec(1), "delivery", None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for j in handles {
            j.join().unwrap();
        }

        let row = h.row(&x);
        assert_eq!(row.current_stock, dec(40));
        assert_eq!(h.ledger.replay(x.key()).unwrap(), dec(40));
    }

    #[test]
    fn published_events_feed_the_dashboard() {
        let h = harness();
        let ctx = context();

        let projection = Arc::new(DashboardProjection::new(Arc::new(
            InMemoryStoreScoped::<SummaryKey, DashboardSummary>::new(),
        )));
        let sink = Arc::clone(&projection);
        let worker = ProjectionWorker::spawn(
            "dashboard-test",
            Arc::clone(h.pipeline.bus()),
            Some(ctx.store_id),
            move |env: EventEnvelope<JsonValue>| sink.apply_envelope(&env),
        )
        .unwrap();
        let x = h.stocked(ctx, "Jollof", 0, 10);

        let delivered = h.orders.place_order(ctx, vec![Harness::line(&x, 2)], dec(1)).unwrap();
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Delivered,
        ] {
            h.orders.transition(ctx, delivered.id_typed(), status).unwrap();
        }
        let cancelled = h.orders.place_order(ctx, vec![Harness::line(&x, 1)], dec(0)).unwrap();
        h.orders.transition(ctx, cancelled.id_typed(), OrderStatus::Cancelled).unwrap();

        // Noise from another store must not show up.
        let other = context();
        let y = h.stocked(other, "Jollof", 0, 1);
        h.orders.place_order(other, vec![Harness::line(&y, 1)], dec(0)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while projection.summary(ctx.store_id).orders_by_status.get(&OrderStatus::Cancelled).is_none()
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }
        worker.shutdown();

        let s = projection.summary(ctx.store_id);
        assert_eq!(s.orders_placed, 2);
        assert_eq!(s.orders_by_status.get(&OrderStatus::Delivered), Some(&1));
        assert_eq!(s.orders_by_status.get(&OrderStatus::Cancelled), Some(&1));
        assert_eq!(s.delivered_revenue, dec(9));
        // opening count, reserve, release + sale
        assert_eq!(s.movements_recorded, 4);
        assert_eq!(projection.summary(other.store_id), DashboardSummary::default());
    }

    #[test]
    fn publish_happens_after_commit_only() {
        let h = harness();
        let ctx = context();
        let x = product(&h.pipeline, ctx, "Yam", 0);
        let sub = h.pipeline.bus().subscribe();

        let _ = h.adjust.adjust(ctx, x.product_id, AdjustmentKind::Decrease, dec(1), "spoiled", None);
        assert!(sub.try_recv().is_err());

        h.adjust.adjust(ctx, x.product_id, AdjustmentKind::Increase, dec(1), "found", None).unwrap();
        let env = sub.try_recv().unwrap();
        assert_eq!(env.event_type(), "inventory.movement.recorded");
        assert_eq!(env.stream_id(), *x.product_id.as_uuid());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Adjust(AdjustmentKind, i64),
        Receive(i64),
        Sell(i64),
        Order(i64),
        Advance(usize),
        Cancel(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (prop_oneof![
                Just(AdjustmentKind::Increase),
                Just(AdjustmentKind::Decrease),
                Just(AdjustmentKind::Set)
            ], 0i64..8)
                .prop_map(|(k, q)| Op::Adjust(k, q)),
            (1i64..6).prop_map(Op::Receive),
            (1i64..4).prop_map(Op::Sell),
            (1i64..4).prop_map(Op::Order),
            (0usize..8).prop_map(Op::Advance),
            (0usize..8).prop_map(Op::Cancel),
        ]
    }

    fn next_status(s: OrderStatus) -> Option<OrderStatus> {
        match s {
            OrderStatus::Pending => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Ready),
            OrderStatus::Ready => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn any_operation_sequence_keeps_ledger_and_rows_in_step(ops in prop::collection::vec(op(), 1..30)) {
            let h = harness();
            let ctx = context();
            let x = product(&h.pipeline, ctx, "Puff-puff", 2);
            let mut orders = Vec::new();

            for op in ops {
                let before = h.row(&x);
                let result = match op {
                    Op::Adjust(kind, q) => h.adjust.adjust(ctx, x.product_id, kind, dec(q), "count", None).map(|_| ()),
                    Op::Receive(q) => h.adjust.receive(ctx, x.product_id, dec(q), None, None).map(|_| ()),
                    Op::Sell(q) => h.pos.sell(ctx, vec![Harness::line(&x, q)], dec(0)).map(|_| ()),
                    Op::Order(q) => h.orders.place_order(ctx, vec![Harness::line(&x, q)], dec(0)).map(|o| orders.push(o.id_typed())),
                    Op::Advance(i) if !orders.is_empty() => {
                        let id = orders[i % orders.len()];
                        let status = h.orders.order(ctx, id).unwrap().status();
                        match next_status(status) {
                            Some(next) => h.orders.transition(ctx, id, next).map(|_| ()),
                            None => Ok(()),
                        }
                    }
                    Op::Cancel(i) if !orders.is_empty() => {
                        let id = orders[i % orders.len()];
                        h.orders.transition(ctx, id, OrderStatus::Cancelled).map(|_| ())
                    }
                    Op::Advance(_) | Op::Cancel(_) => Ok(()),
                };

                let after = h.row(&x);
                if result.is_err() {
                    prop_assert_eq!(&after, &before);
                }
                prop_assert!(after.current_stock >= Decimal::ZERO);
                prop_assert!(after.reserved_stock >= Decimal::ZERO);
                prop_assert!(after.reserved_stock <= after.current_stock);
            }

            let audit = h.ledger.audit(x.key()).unwrap();
            prop_assert!(audit.consistent);
            prop_assert_eq!(h.ledger.replay(x.key()).unwrap(), h.row(&x).current_stock);
        }
    }

    #[test]
    fn unknown_products_are_not_found_everywhere() {
        let h = harness();
        let ctx = context();
        let ghost = ProductId::new();

        assert!(matches!(
            h.adjust.adjust(ctx, ghost, AdjustmentKind::Increase, dec(1), "x", None),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            h.adjust.receive(ctx, ghost, dec(1), None, None),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            h.pos.sell(ctx, vec![OrderLine { product_id: ghost, quantity: dec(1), unit_price: dec(1) }], dec(0)),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(h.monitor.status(ctx, ghost), Err(ServiceError::NotFound(_))));
    }
}
