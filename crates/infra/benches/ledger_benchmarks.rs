use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use pantry_core::{ActorId, ProductId, StoreId};
use pantry_events::{EventEnvelope, InMemoryEventBus};
use pantry_infra::context::RequestContext;
use pantry_infra::ledger::StockLedger;
use pantry_infra::pipeline::CommitPipeline;
use pantry_infra::retry::RetryPolicy;
use pantry_infra::services::AdjustmentService;
use pantry_infra::store::{InMemoryInventoryStore, InventoryStore};
use pantry_inventory::{AdjustmentKind, InventoryState, ProductSettings};

type Store = Arc<InMemoryInventoryStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

fn setup() -> (Arc<CommitPipeline<Store, Bus>>, RequestContext, InventoryState) {
    let pipeline = Arc::new(CommitPipeline::new(
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(InMemoryEventBus::new()),
        RetryPolicy::new(8, Duration::from_micros(50)),
    ));
    let ctx = RequestContext::new(StoreId::new(), ActorId::new());
    let row = pipeline
        .store()
        .upsert_settings(
            ProductSettings {
                store_id: ctx.store_id,
                product_id: ProductId::new(),
                name: "Bench item".to_string(),
                sku: None,
                reorder_point: Decimal::ZERO,
                unit_cost: Decimal::ONE,
                allow_backorder: false,
            },
            Utc::now(),
        )
        .unwrap();
    (pipeline, ctx, row)
}

fn bench_adjustment_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjustment_latency");
    group.sample_size(500);

    group.bench_function("increase", |b| {
        let (pipeline, ctx, row) = setup();
        let service = AdjustmentService::new(pipeline);
        b.iter(|| {
            service
                .adjust(ctx, row.product_id, AdjustmentKind::Increase, Decimal::ONE, "bench", None)
                .unwrap();
        });
    });

    // Set is planned against the current row, so each iteration re-reads it.
    group.bench_function("set", |b| {
        let (pipeline, ctx, row) = setup();
        let service = AdjustmentService::new(pipeline);
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            service
                .adjust(ctx, row.product_id, AdjustmentKind::Set, Decimal::from(n % 100 + 1), "bench", None)
                .unwrap();
        });
    });

    group.finish();
}

fn bench_adjustment_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjustment_throughput");

    for batch in [1u64, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let (pipeline, ctx, row) = setup();
                let service = AdjustmentService::new(pipeline);
                for _ in 0..batch {
                    service
                        .adjust(ctx, row.product_id, AdjustmentKind::Increase, Decimal::ONE, "bench", None)
                        .unwrap();
                }
                black_box(row.product_id)
            });
        });
    }

    group.finish();
}

fn bench_ledger_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_replay");

    for history in [10u64, 100, 1000, 10_000] {
        let (pipeline, ctx, row) = setup();
        let service = AdjustmentService::new(Arc::clone(&pipeline));
        for _ in 0..history {
            service
                .adjust(ctx, row.product_id, AdjustmentKind::Increase, Decimal::ONE, "bench", None)
                .unwrap();
        }
        let ledger = StockLedger::new(pipeline);

        group.throughput(Throughput::Elements(history));
        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, _| {
            b.iter(|| black_box(ledger.replay(row.key()).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_adjustment_latency,
    bench_adjustment_throughput,
    bench_ledger_replay
);
criterion_main!(benches);
