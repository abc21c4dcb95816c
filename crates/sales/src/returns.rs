//! Completed sale transactions and the returns booked against them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pantry_core::{ActorId, DomainError, DomainResult, ProductId, ReturnId, StoreId, TransactionId};
use pantry_events::Event;

use crate::order::OrderLine;

/// Sold vs. already-returned quantity of one product in a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: ProductId,
    pub sold: Decimal,
    pub returned: Decimal,
    pub unit_price: Decimal,
}

impl SaleLine {
    pub fn returnable(&self) -> Decimal {
        self.sold.saturating_sub(self.returned)
    }
}

/// A completed sale (delivered order or counter sale) that returns refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub transaction_id: TransactionId,
    pub store_id: StoreId,
    pub lines: Vec<SaleLine>,
    pub occurred_at: DateTime<Utc>,
    /// Bumped on every return; returns compare-and-swap on it.
    pub version: u64,
}

impl SaleRecord {
    /// Lines for the same product are merged into one returnable line.
    pub fn new(
        transaction_id: TransactionId,
        store_id: StoreId,
        lines: &[OrderLine],
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut merged: Vec<SaleLine> = Vec::with_capacity(lines.len());
        for line in lines {
            match merged.iter_mut().find(|l| l.product_id == line.product_id) {
                Some(existing) => existing.sold = existing.sold.saturating_add(line.quantity),
                None => merged.push(SaleLine {
                    product_id: line.product_id,
                    sold: line.quantity,
                    returned: Decimal::ZERO,
                    unit_price: line.unit_price,
                }),
            }
        }

        Self {
            transaction_id,
            store_id,
            lines: merged,
            occurred_at,
            version: 0,
        }
    }

    pub fn line(&self, product_id: ProductId) -> Option<&SaleLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Validate a return against what remains returnable on every line.
    pub fn check_return(&self, items: &[ReturnItem]) -> DomainResult<()> {
        if items.is_empty() {
            return Err(DomainError::validation("return must have at least one item"));
        }

        let mut requested: BTreeMap<ProductId, Decimal> = BTreeMap::new();
        for item in items {
            if item.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "return quantity for product {} must be greater than zero",
                    item.product_id
                )));
            }
            let total = requested.entry(item.product_id).or_default();
            *total = total.saturating_add(item.quantity);
        }

        for (product_id, quantity) in requested {
            let Some(line) = self.line(product_id) else {
                return Err(DomainError::validation(format!(
                    "product {product_id} was not sold on transaction {}",
                    self.transaction_id
                )));
            };
            let remaining = line.returnable();
            if quantity > remaining {
                return Err(DomainError::return_exceeds_original(format!(
                    "cannot return {quantity} of product {product_id} on transaction {}: only {remaining} returnable",
                    self.transaction_id
                )));
            }
        }
        Ok(())
    }

    /// The record after booking `items`. `self` is left untouched on error.
    pub fn with_return(&self, items: &[ReturnItem]) -> DomainResult<SaleRecord> {
        self.check_return(items)?;
        let mut next = self.clone();
        for item in items {
            if let Some(line) = next.lines.iter_mut().find(|l| l.product_id == item.product_id) {
                line.returned = line.returned.saturating_add(item.quantity);
            }
        }
        next.version += 1;
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub product_id: ProductId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnTransaction {
    pub id: ReturnId,
    pub original_transaction_id: TransactionId,
    pub store_id: StoreId,
    pub items: Vec<ReturnItem>,
    pub reason: String,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
}

impl ReturnTransaction {
    pub fn new(
        original: &SaleRecord,
        items: Vec<ReturnItem>,
        reason: &str,
        actor_id: ActorId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("reason is required for returns"));
        }
        original.check_return(&items)?;

        Ok(Self {
            id: ReturnId::new(),
            original_transaction_id: original.transaction_id,
            store_id: original.store_id,
            items,
            reason: reason.to_string(),
            actor_id,
            created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnEvent {
    ReturnProcessed(ReturnTransaction),
}

impl Event for ReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReturnEvent::ReturnProcessed(_) => "sales.return.processed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReturnEvent::ReturnProcessed(r) => r.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sale_of(product_id: ProductId, qty: i64) -> SaleRecord {
        SaleRecord::new(
            TransactionId::new(),
            StoreId::new(),
            &[OrderLine {
                product_id,
                quantity: Decimal::from(qty),
                unit_price: Decimal::from(5),
            }],
            Utc::now(),
        )
    }

    fn item(product_id: ProductId, qty: i64) -> ReturnItem {
        ReturnItem {
            product_id,
            quantity: Decimal::from(qty),
        }
    }

    #[test]
    fn partial_returns_are_bounded_by_what_was_sold() {
        let product = ProductId::new();
        let sale = sale_of(product, 3);

        let sale = sale.with_return(&[item(product, 2)]).unwrap();
        assert_eq!(sale.line(product).unwrap().returnable(), Decimal::ONE);
        assert_eq!(sale.version, 1);

        let err = sale.with_return(&[item(product, 2)]).unwrap_err();
        assert!(matches!(err, DomainError::ReturnExceedsOriginal(_)));
        assert_eq!(sale.line(product).unwrap().returned, Decimal::from(2));
    }

    #[test]
    fn split_items_for_one_product_are_summed() {
        let product = ProductId::new();
        let sale = sale_of(product, 3);
        let err = sale
            .check_return(&[item(product, 2), item(product, 2)])
            .unwrap_err();
        assert!(matches!(err, DomainError::ReturnExceedsOriginal(_)));
    }

    #[test]
    fn products_not_in_the_sale_cannot_be_returned() {
        let sale = sale_of(ProductId::new(), 3);
        let stranger = ProductId::new();
        let err = sale.check_return(&[item(stranger, 1)]).unwrap_err();
        assert!(matches!(&err, DomainError::Validation(msg) if msg.contains(&stranger.to_string())));
    }

    #[test]
    fn duplicate_sale_lines_merge() {
        let product = ProductId::new();
        let line = OrderLine {
            product_id: product,
            quantity: Decimal::from(2),
            unit_price: Decimal::ONE,
        };
        let sale = SaleRecord::new(
            TransactionId::new(),
            StoreId::new(),
            &[line.clone(), line],
            Utc::now(),
        );
        assert_eq!(sale.lines.len(), 1);
        assert_eq!(sale.line(product).unwrap().sold, Decimal::from(4));
    }

    #[test]
    fn return_transaction_requires_reason() {
        let product = ProductId::new();
        let sale = sale_of(product, 3);
        let err =
            ReturnTransaction::new(&sale, vec![item(product, 1)], "  ", ActorId::new(), Utc::now())
                .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let ret = ReturnTransaction::new(
            &sale,
            vec![item(product, 1)],
            "wrong flavour",
            ActorId::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(ret.original_transaction_id, sale.transaction_id);
        assert_eq!(ret.store_id, sale.store_id);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: across any sequence of partial returns the cumulative
        /// returned quantity never exceeds the sold quantity.
        #[test]
        fn cumulative_returns_never_exceed_sold(
            sold in 1i64..50,
            attempts in prop::collection::vec(1i64..20, 1..30)
        ) {
            let product = ProductId::new();
            let mut sale = sale_of(product, sold);
            let mut accepted = 0i64;

            for qty in attempts {
                match sale.with_return(&[item(product, qty)]) {
                    Ok(next) => {
                        accepted += qty;
                        sale = next;
                    }
                    Err(e) => {
                        prop_assert!(matches!(e, DomainError::ReturnExceedsOriginal(_)));
                        prop_assert!(accepted + qty > sold);
                    }
                }
                let line = sale.line(product).unwrap();
                prop_assert!(line.returned <= line.sold);
                prop_assert_eq!(line.returned, Decimal::from(accepted));
            }
        }
    }
}
