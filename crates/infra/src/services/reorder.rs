//! Reorder Monitor: read-only stock levels and status over projected rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use pantry_core::ProductId;
use pantry_inventory::{InventoryState, StockStatus, stock_status};

use crate::context::RequestContext;
use crate::error::ServiceError;
use crate::projector::InventoryProjector;
use crate::store::InventoryStore;

/// One row of the stock levels report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    pub current_stock: Decimal,
    pub reserved_stock: Decimal,
    pub available_stock: Decimal,
    pub reorder_point: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub status: StockStatus,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&InventoryState> for StockLevel {
    fn from(s: &InventoryState) -> Self {
        let status = stock_status(s);
        Self {
            product_id: s.product_id,
            name: s.name.clone(),
            sku: s.sku.clone(),
            current_stock: s.current_stock,
            reserved_stock: s.reserved_stock,
            available_stock: s.available_stock(),
            reorder_point: s.reorder_point,
            unit_cost: s.unit_cost,
            total_value: s.total_value(),
            status,
            is_low_stock: status == StockStatus::LowStock,
            is_out_of_stock: status == StockStatus::OutOfStock,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelFilter {
    /// Case-insensitive match on name or SKU.
    pub search: Option<String>,
    pub status: Option<StockStatus>,
}

impl LevelFilter {
    fn matches(&self, level: &StockLevel) -> bool {
        if self.status.is_some_and(|s| s != level.status) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                level.name.to_lowercase().contains(&needle)
                    || level
                        .sku
                        .as_deref()
                        .is_some_and(|sku| sku.to_lowercase().contains(&needle))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReorderMonitor<S> {
    projector: InventoryProjector<S>,
}

impl<S: InventoryStore> ReorderMonitor<S> {
    pub fn new(store: S) -> Self {
        Self {
            projector: InventoryProjector::new(store),
        }
    }

    pub fn status(&self, ctx: RequestContext, product_id: ProductId) -> Result<StockStatus, ServiceError> {
        Ok(stock_status(&self.projector.get(ctx.store_id, product_id)?))
    }

    pub fn levels(&self, ctx: RequestContext, filter: &LevelFilter) -> Result<Vec<StockLevel>, ServiceError> {
        Ok(self
            .projector
            .list(ctx.store_id)?
            .iter()
            .map(StockLevel::from)
            .filter(|l| filter.matches(l))
            .collect())
    }

    pub fn total_value(&self, ctx: RequestContext) -> Result<Decimal, ServiceError> {
        self.projector
            .list(ctx.store_id)?
            .iter()
            .try_fold(Decimal::ZERO, |acc, row| {
                row.checked_total_value().and_then(|v| acc.checked_add(v))
            })
            .ok_or_else(|| {
                ServiceError::Validation(format!(
                    "total stock value of store {} is out of range",
                    ctx.store_id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::AdjustmentService;
    use crate::test_support::{context, dec, pipeline, product};
    use pantry_inventory::AdjustmentKind;

    #[test]
    fn levels_follow_the_reorder_point() {
        let p = pipeline();
        let ctx = context();
        let chicken = product(&p, ctx, "Chicken", 5);
        let beef = product(&p, ctx, "Beef", 5);
        let adjust = AdjustmentService::new(Arc::clone(&p));
        adjust
            .adjust(ctx, chicken.product_id, AdjustmentKind::Set, dec(10), "count", None)
            .unwrap();

        let monitor = ReorderMonitor::new(Arc::clone(p.store()));
        assert_eq!(monitor.status(ctx, chicken.product_id).unwrap(), StockStatus::InStock);
        assert_eq!(monitor.status(ctx, beef.product_id).unwrap(), StockStatus::OutOfStock);

        adjust
            .adjust(ctx, chicken.product_id, AdjustmentKind::Decrease, dec(6), "sale", None)
            .unwrap();
        assert_eq!(monitor.status(ctx, chicken.product_id).unwrap(), StockStatus::LowStock);

        let low = monitor
            .levels(
                ctx,
                &LevelFilter {
                    search: None,
                    status: Some(StockStatus::LowStock),
                },
            )
            .unwrap();
        assert_eq!(low.len(), 1);
        assert!(low[0].is_low_stock);

        let found = monitor
            .levels(
                ctx,
                &LevelFilter {
                    search: Some("BEE".into()),
                    status: None,
                },
            )
            .unwrap();
        assert_eq!(found[0].product_id, beef.product_id);

        // 4 units at the registered cost of 2.
        assert_eq!(monitor.total_value(ctx).unwrap(), dec(8));
    }

    #[test]
    fn store_value_beyond_decimal_range_is_an_error_not_a_panic() {
        let p = pipeline();
        let ctx = context();
        let adjust = AdjustmentService::new(Arc::clone(&p));
        let half = Decimal::MAX / dec(4);
        for name in ["Plates", "Cups", "Trays"] {
            let row = product(&p, ctx, name, 0);
            adjust
                .adjust(ctx, row.product_id, AdjustmentKind::Increase, half, "count", None)
                .unwrap();
        }

        let monitor = ReorderMonitor::new(Arc::clone(p.store()));
        assert_eq!(monitor.levels(ctx, &LevelFilter::default()).unwrap().len(), 3);
        let err = monitor.total_value(ctx).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
