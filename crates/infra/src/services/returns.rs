//! Return Processor: compensating `return_in` movements against a prior sale.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use pantry_core::{ExpectedVersion, ProductId, TransactionId};
use pantry_events::{EventBus, EventEnvelope};
use pantry_inventory::{MovementType, Reference, StockKey, StockMovement};
use pantry_sales::{ReturnEvent, ReturnItem, ReturnTransaction, SaleRecord};

use crate::context::RequestContext;
use crate::error::ServiceError;
use crate::ledger::load_row;
use crate::pipeline::{CommitPipeline, Decision, envelope};
use crate::store::{CommitBatch, InventoryStore, SaleWrite};

pub const SALE_STREAM_TYPE: &str = "sales.transaction";

pub struct ReturnProcessor<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
}

impl<S, B> Clone for ReturnProcessor<S, B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<S, B> ReturnProcessor<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(pipeline: Arc<CommitPipeline<S, B>>) -> Self {
        Self { pipeline }
    }

    /// Book a return against `original_transaction_id`.
    ///
    /// Every line is checked against what is still returnable on the original
    /// sale; the `return_in` movements, the sale's cumulative returned counters
    /// and the return record commit together. Reserved stock is never touched.
    #[instrument(skip(self, items, reason), fields(store_id = %ctx.store_id, original = %original_transaction_id, lines = items.len()), err)]
    pub fn process_return(
        &self,
        ctx: RequestContext,
        original_transaction_id: TransactionId,
        items: Vec<ReturnItem>,
        reason: &str,
    ) -> Result<ReturnTransaction, ServiceError> {
        let executed = self.pipeline.execute("returns.process", |store| {
            let sale = store
                .sale(ctx.store_id, original_transaction_id)?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("sale transaction {original_transaction_id}"))
                })?;

            let now = Utc::now();
            let ret = ReturnTransaction::new(&sale, items.clone(), reason, ctx.actor_id, now)?;
            let next = sale.with_return(&ret.items)?;

            let mut batch = CommitBatch::default();
            let products: BTreeSet<ProductId> = ret.items.iter().map(|i| i.product_id).collect();
            for product_id in products {
                let row = load_row(store, StockKey::new(ctx.store_id, product_id))?;
                batch.expect_row(&row);
            }
            for item in &ret.items {
                batch.movements.push(StockMovement::new(
                    ctx.store_id,
                    item.product_id,
                    MovementType::ReturnIn,
                    item.quantity,
                    Some(ret.reason.clone()),
                    Reference::Return(ret.id),
                    ctx.actor_id,
                    now,
                )?);
            }

            let event = envelope(
                ctx.store_id,
                *original_transaction_id.as_uuid(),
                SALE_STREAM_TYPE,
                next.version,
                &ReturnEvent::ReturnProcessed(ret.clone()),
            )?;
            batch.sale = Some(SaleWrite {
                expected: ExpectedVersion::Exact(sale.version),
                record: next,
            });
            batch.return_transaction = Some(ret.clone());
            Ok(Decision::new(batch, ret).with_event(event))
        })?;

        info!(return_id = %executed.output.id, "return processed");
        Ok(executed.output)
    }

    /// The original sale with its returned counters, plus every return booked
    /// against it.
    pub fn returns_for(
        &self,
        ctx: RequestContext,
        transaction_id: TransactionId,
    ) -> Result<(SaleRecord, Vec<ReturnTransaction>), ServiceError> {
        let store = self.pipeline.store();
        let sale = store
            .sale(ctx.store_id, transaction_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("sale transaction {transaction_id}")))?;
        let returns = store.returns_for(ctx.store_id, transaction_id)?;
        Ok((sale, returns))
    }
}
