//! Adjustment Service: registration, manual adjustments, goods receipt and
//! transfers between stores.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};
use uuid::Uuid;

use pantry_core::{ProductId, StoreId};
use pantry_events::{EventBus, EventEnvelope};
use pantry_inventory::{
    AdjustmentKind, InventoryState, MovementType, ProductSettings, Reference, StockKey,
    StockMovement, plan_adjustment,
};

use crate::context::RequestContext;
use crate::error::ServiceError;
use crate::ledger::load_row;
use crate::pipeline::{CommitPipeline, Decision};
use crate::store::{CommitBatch, Committed, InventoryStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    /// Reuse an existing product id to reconfigure its row.
    pub product_id: Option<ProductId>,
    pub name: String,
    pub sku: Option<String>,
    pub reorder_point: Decimal,
    pub unit_cost: Decimal,
    #[serde(default)]
    pub allow_backorder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub from: InventoryState,
    pub to: InventoryState,
}

pub struct AdjustmentService<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
}

impl<S, B> Clone for AdjustmentService<S, B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<S, B> AdjustmentService<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(pipeline: Arc<CommitPipeline<S, B>>) -> Self {
        Self { pipeline }
    }

    /// Create a product's row in the caller's store, or replace its settings.
    ///
    /// Appends no movement: settings are not ledger-derived.
    #[instrument(skip(self, req), fields(store_id = %ctx.store_id, name = %req.name), err)]
    pub fn register_product(
        &self,
        ctx: RequestContext,
        req: RegisterProduct,
    ) -> Result<InventoryState, ServiceError> {
        let settings = ProductSettings {
            store_id: ctx.store_id,
            product_id: req.product_id.unwrap_or_default(),
            name: req.name.trim().to_string(),
            sku: req.sku.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            reorder_point: req.reorder_point,
            unit_cost: req.unit_cost,
            allow_backorder: req.allow_backorder,
        };
        settings.validate()?;
        let row = self.pipeline.store().upsert_settings(settings, Utc::now())?;
        info!(product_id = %row.product_id, "product registered");
        Ok(row)
    }

    /// Record a manual stock change as exactly one `adjustment_*` movement.
    ///
    /// A `Set` is planned against the row version the commit compares against,
    /// so a concurrent change forces a re-plan instead of a stale delta.
    #[instrument(skip(self, reason, reference), fields(store_id = %ctx.store_id, product_id = %product_id, kind = ?kind), err)]
    pub fn adjust(
        &self,
        ctx: RequestContext,
        product_id: ProductId,
        kind: AdjustmentKind,
        quantity: Decimal,
        reason: &str,
        reference: Option<String>,
    ) -> Result<InventoryState, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::Validation("reason is required for adjustments".to_string()));
        }
        let key = StockKey::new(ctx.store_id, product_id);
        let reference = manual_reference(reference);

        let executed = self.pipeline.execute("inventory.adjust", |store| {
            let row = load_row(store, key)?;
            let plan = plan_adjustment(kind, quantity, &row)?;
            let movement = StockMovement::new(
                ctx.store_id,
                product_id,
                plan.movement_type,
                plan.delta,
                Some(reason.to_string()),
                reference.clone(),
                ctx.actor_id,
                Utc::now(),
            )?;
            let mut batch = CommitBatch::default();
            batch.expect_row(&row);
            batch.movements.push(movement);
            Ok(Decision::new(batch, ()))
        })?;

        committed_row(&executed.committed, key)
    }

    /// Goods receipt: one `purchase` movement, optionally repricing the row
    /// to the weighted average cost.
    #[instrument(skip(self, reference), fields(store_id = %ctx.store_id, product_id = %product_id), err)]
    pub fn receive(
        &self,
        ctx: RequestContext,
        product_id: ProductId,
        quantity: Decimal,
        unit_cost: Option<Decimal>,
        reference: Option<String>,
    ) -> Result<InventoryState, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::Validation("quantity must be greater than zero".to_string()));
        }
        let key = StockKey::new(ctx.store_id, product_id);
        let reference = manual_reference(reference);

        let executed = self.pipeline.execute("inventory.receive", |store| {
            let row = load_row(store, key)?;
            let mut movement = StockMovement::new(
                ctx.store_id,
                product_id,
                MovementType::Purchase,
                quantity,
                None,
                reference.clone(),
                ctx.actor_id,
                Utc::now(),
            )?;
            if let Some(cost) = unit_cost {
                movement = movement.with_unit_cost(cost)?;
            }
            let mut batch = CommitBatch::default();
            batch.expect_row(&row);
            batch.movements.push(movement);
            Ok(Decision::new(batch, ()))
        })?;

        committed_row(&executed.committed, key)
    }

    /// Move stock from the caller's store to `to_store` in one commit.
    #[instrument(skip(self, reason), fields(from = %ctx.store_id, to = %to_store, product_id = %product_id), err)]
    pub fn transfer(
        &self,
        ctx: RequestContext,
        product_id: ProductId,
        to_store: StoreId,
        quantity: Decimal,
        reason: Option<String>,
    ) -> Result<TransferReceipt, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::Validation("quantity must be greater than zero".to_string()));
        }
        if to_store == ctx.store_id {
            return Err(ServiceError::Validation(
                "transfer source and destination must differ".to_string(),
            ));
        }
        let from_key = StockKey::new(ctx.store_id, product_id);
        let to_key = StockKey::new(to_store, product_id);
        let transfer_id = Uuid::now_v7();

        let executed = self.pipeline.execute("inventory.transfer", |store| {
            let source = load_row(store, from_key)?;
            let destination = load_row(store, to_key)?;
            if source.available_stock() < quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "cannot transfer {quantity} of {product_id}: only {} available",
                    source.available_stock()
                )));
            }

            let now = Utc::now();
            let out = StockMovement::new(
                ctx.store_id,
                product_id,
                MovementType::TransferOut,
                -quantity,
                reason.clone(),
                Reference::Transfer(transfer_id),
                ctx.actor_id,
                now,
            )?;
            let inbound = StockMovement::new(
                to_store,
                product_id,
                MovementType::TransferIn,
                quantity,
                reason.clone(),
                Reference::Transfer(transfer_id),
                ctx.actor_id,
                now,
            )?;

            let mut batch = CommitBatch::default();
            batch.expect_row(&source);
            batch.expect_row(&destination);
            batch.movements.extend([out, inbound]);
            Ok(Decision::new(batch, ()))
        })?;

        Ok(TransferReceipt {
            transfer_id,
            from: committed_row(&executed.committed, from_key)?,
            to: committed_row(&executed.committed, to_key)?,
        })
    }
}

fn manual_reference(reference: Option<String>) -> Reference {
    reference
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .map(Reference::Manual)
        .unwrap_or(Reference::None)
}

pub(crate) fn committed_row(committed: &Committed, key: StockKey) -> Result<InventoryState, ServiceError> {
    committed
        .state(key)
        .cloned()
        .ok_or_else(|| ServiceError::Storage(format!("commit did not return row {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, dec, pipeline, product};

    #[test]
    fn adjustments_follow_the_scenario() {
        let p = pipeline();
        let ctx = context();
        let row = product(&p, ctx, "Chicken", 5);
        let svc = AdjustmentService::new(Arc::clone(&p));

        svc.adjust(ctx, row.product_id, AdjustmentKind::Set, dec(10), "opening count", None)
            .unwrap();
        let after = svc
            .adjust(ctx, row.product_id, AdjustmentKind::Decrease, dec(3), "sale", None)
            .unwrap();
        assert_eq!(after.current_stock, dec(7));

        let err = svc
            .adjust(ctx, row.product_id, AdjustmentKind::Decrease, dec(10), "sale", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));

        let unchanged = p.store().state(row.key()).unwrap().unwrap();
        assert_eq!(unchanged.current_stock, dec(7));
        assert_eq!(unchanged.version, 2);
    }

    #[test]
    fn increases_past_decimal_range_are_rejected_and_the_store_stays_usable() {
        let p = pipeline();
        let ctx = context();
        let svc = AdjustmentService::new(Arc::clone(&p));
        let row = svc
            .register_product(
                ctx,
                RegisterProduct {
                    product_id: None,
                    name: "Napkins".to_string(),
                    sku: None,
                    reorder_point: dec(0),
                    unit_cost: dec(0),
                    allow_backorder: false,
                },
            )
            .unwrap();

        let first = svc
            .adjust(ctx, row.product_id, AdjustmentKind::Increase, Decimal::MAX, "count", None)
            .unwrap();
        assert_eq!(first.current_stock, Decimal::MAX);

        let err = svc
            .adjust(ctx, row.product_id, AdjustmentKind::Increase, Decimal::MAX, "count", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let after = svc
            .adjust(ctx, row.product_id, AdjustmentKind::Decrease, dec(1), "count", None)
            .unwrap();
        assert_eq!(after.current_stock, Decimal::MAX - Decimal::ONE);
        assert_eq!(p.store().state(row.key()).unwrap().unwrap().version, 2);
    }

    #[test]
    fn missing_reason_and_unknown_products_are_rejected() {
        let p = pipeline();
        let ctx = context();
        let row = product(&p, ctx, "Rice", 0);
        let svc = AdjustmentService::new(Arc::clone(&p));

        let err = svc
            .adjust(ctx, row.product_id, AdjustmentKind::Increase, dec(1), "  ", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = svc
            .adjust(ctx, row.product_id, AdjustmentKind::Increase, dec(0), "count", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = svc
            .adjust(ctx, ProductId::new(), AdjustmentKind::Increase, dec(1), "count", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn receipts_reprice_at_weighted_average() {
        let p = pipeline();
        let ctx = context();
        let row = product(&p, ctx, "Oil", 0);
        let svc = AdjustmentService::new(Arc::clone(&p));

        svc.receive(ctx, row.product_id, dec(10), Some(dec(2)), Some("INV-1".into()))
            .unwrap();
        let after = svc
            .receive(ctx, row.product_id, dec(10), Some(dec(4)), None)
            .unwrap();
        assert_eq!(after.current_stock, dec(20));
        assert_eq!(after.unit_cost, dec(3));
        assert_eq!(after.total_value(), dec(60));
    }

    #[test]
    fn transfers_move_stock_atomically() {
        let p = pipeline();
        let ctx = context();
        let row = product(&p, ctx, "Plantain", 0);
        let svc = AdjustmentService::new(Arc::clone(&p));
        svc.receive(ctx, row.product_id, dec(6), None, None).unwrap();

        let branch = StoreId::new();
        let err = svc
            .transfer(ctx, row.product_id, branch, dec(2), None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        svc.register_product(
            RequestContext::new(branch, ctx.actor_id),
            RegisterProduct {
                product_id: Some(row.product_id),
                name: "Plantain".into(),
                sku: None,
                reorder_point: dec(0),
                unit_cost: dec(2),
                allow_backorder: false,
            },
        )
        .unwrap();

        let receipt = svc
            .transfer(ctx, row.product_id, branch, dec(4), Some("restock".into()))
            .unwrap();
        assert_eq!(receipt.from.current_stock, dec(2));
        assert_eq!(receipt.to.current_stock, dec(4));

        let err = svc
            .transfer(ctx, row.product_id, branch, dec(3), None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
    }

    #[test]
    fn reconfiguring_keeps_ledger_fields() {
        let p = pipeline();
        let ctx = context();
        let row = product(&p, ctx, "Pepper", 1);
        let svc = AdjustmentService::new(Arc::clone(&p));
        svc.receive(ctx, row.product_id, dec(3), None, None).unwrap();

        let updated = svc
            .register_product(
                ctx,
                RegisterProduct {
                    product_id: Some(row.product_id),
                    name: "Scotch bonnet".into(),
                    sku: Some("SB".into()),
                    reorder_point: dec(4),
                    unit_cost: dec(5),
                    allow_backorder: false,
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Scotch bonnet");
        assert_eq!(updated.current_stock, dec(3));
        assert_eq!(updated.version, 1);
    }
}
