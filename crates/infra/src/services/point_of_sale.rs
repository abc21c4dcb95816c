//! Counter (walk-in) sales: stock leaves immediately, no reservation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use pantry_core::{DomainError, ExpectedVersion, ProductId, TransactionId};
use pantry_events::{EventBus, EventEnvelope};
use pantry_inventory::{MovementType, Reference, StockKey, StockMovement};
use pantry_sales::{OrderLine, SaleRecord, final_amount};

use crate::context::RequestContext;
use crate::error::ServiceError;
use crate::ledger::load_row;
use crate::pipeline::{CommitPipeline, Decision};
use crate::store::{CommitBatch, InventoryStore, SaleWrite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleReceipt {
    pub transaction_id: TransactionId,
    pub lines: Vec<OrderLine>,
    pub discount: Decimal,
    pub final_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

pub struct PointOfSale<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
}

impl<S, B> Clone for PointOfSale<S, B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<S, B> PointOfSale<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(pipeline: Arc<CommitPipeline<S, B>>) -> Self {
        Self { pipeline }
    }

    #[instrument(skip(self, lines), fields(store_id = %ctx.store_id, lines = lines.len()), err)]
    pub fn sell(
        &self,
        ctx: RequestContext,
        lines: Vec<OrderLine>,
        discount: Decimal,
    ) -> Result<SaleReceipt, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::Validation("sale must have at least one line".to_string()));
        }
        for line in &lines {
            line.validate()?;
        }
        if discount < Decimal::ZERO {
            return Err(DomainError::validation("discount cannot be negative").into());
        }
        let transaction_id = TransactionId::new();

        let executed = self.pipeline.execute("sales.sell", |store| {
            let now = Utc::now();
            let mut batch = CommitBatch::default();
            let products: BTreeSet<ProductId> = lines.iter().map(|l| l.product_id).collect();
            for product_id in products {
                let row = load_row(store, StockKey::new(ctx.store_id, product_id))?;
                batch.expect_row(&row);
            }
            for line in &lines {
                batch.movements.push(StockMovement::new(
                    ctx.store_id,
                    line.product_id,
                    MovementType::Sale,
                    -line.quantity,
                    None,
                    Reference::Sale(transaction_id),
                    ctx.actor_id,
                    now,
                )?);
            }
            batch.sale = Some(SaleWrite {
                record: SaleRecord::new(transaction_id, ctx.store_id, &lines, now),
                expected: ExpectedVersion::NoRow,
            });

            Ok(Decision::new(
                batch,
                SaleReceipt {
                    transaction_id,
                    lines: lines.clone(),
                    discount,
                    final_amount: final_amount(&lines, discount),
                    occurred_at: now,
                },
            ))
        })?;

        info!(transaction_id = %transaction_id, total = %executed.output.final_amount, "counter sale recorded");
        Ok(executed.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::AdjustmentService;
    use crate::test_support::{context, dec, pipeline, product};

    #[test]
    fn a_sale_deducts_every_line_or_nothing() {
        let p = pipeline();
        let ctx = context();
        let rice = product(&p, ctx, "Rice", 0);
        let stew = product(&p, ctx, "Stew", 0);
        let adjust = AdjustmentService::new(Arc::clone(&p));
        adjust.receive(ctx, rice.product_id, dec(5), None, None).unwrap();
        adjust.receive(ctx, stew.product_id, dec(1), None, None).unwrap();
        let pos = PointOfSale::new(Arc::clone(&p));

        let line = |product_id, q| OrderLine {
            product_id,
            quantity: dec(q),
            unit_price: dec(4),
        };

        let err = pos
            .sell(ctx, vec![line(rice.product_id, 2), line(stew.product_id, 2)], dec(0))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
        assert_eq!(p.store().state(rice.key()).unwrap().unwrap().current_stock, dec(5));

        let receipt = pos
            .sell(ctx, vec![line(rice.product_id, 2), line(stew.product_id, 1)], dec(20))
            .unwrap();
        assert_eq!(receipt.final_amount, dec(0));
        assert_eq!(p.store().state(rice.key()).unwrap().unwrap().current_stock, dec(3));
        assert!(p.store().sale(ctx.store_id, receipt.transaction_id).unwrap().is_some());
    }
}
