//! Derived per-(product, store) inventory state and the projector fold.
//!
//! `InventoryState` is a cache over the ledger: every ledger-derived field
//! (`current_stock`, `reserved_stock`, `unit_cost` after purchases,
//! `last_movement_id`, `version`) changes only by folding one movement, and the
//! whole row can be rebuilt by replaying the ledger from inception.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pantry_core::{DomainError, DomainResult, MovementId, ProductId, StoreId};

use crate::movement::{MovementType, StockMovement};

/// Key of an inventory row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub store_id: StoreId,
    pub product_id: ProductId,
}

impl StockKey {
    pub fn new(store_id: StoreId, product_id: ProductId) -> Self {
        Self { store_id, product_id }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.store_id)
    }
}

/// Catalog configuration of a stocked product (not ledger-derived).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSettings {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    pub reorder_point: Decimal,
    pub unit_cost: Decimal,
    /// Backorder override: physical decreases may drive stock negative.
    pub allow_backorder: bool,
}

impl ProductSettings {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.store_id, self.product_id)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.reorder_point < Decimal::ZERO {
            return Err(DomainError::validation("reorder point cannot be negative"));
        }
        if self.unit_cost < Decimal::ZERO {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryState {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    pub current_stock: Decimal,
    pub reserved_stock: Decimal,
    pub reorder_point: Decimal,
    pub unit_cost: Decimal,
    pub allow_backorder: bool,
    pub last_movement_id: Option<MovementId>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by exactly one per folded movement; compared on every write.
    pub version: u64,
}

impl InventoryState {
    /// A freshly registered row: no stock, no movements.
    pub fn new(settings: ProductSettings, at: DateTime<Utc>) -> Self {
        Self {
            store_id: settings.store_id,
            product_id: settings.product_id,
            name: settings.name,
            sku: settings.sku,
            current_stock: Decimal::ZERO,
            reserved_stock: Decimal::ZERO,
            reorder_point: settings.reorder_point,
            unit_cost: settings.unit_cost,
            allow_backorder: settings.allow_backorder,
            last_movement_id: None,
            updated_at: at,
            version: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.store_id, self.product_id)
    }

    /// Replace catalog settings; ledger-derived fields and `version` are untouched.
    pub fn reconfigure(&mut self, settings: ProductSettings, at: DateTime<Utc>) {
        self.name = settings.name;
        self.sku = settings.sku;
        self.reorder_point = settings.reorder_point;
        self.unit_cost = settings.unit_cost;
        self.allow_backorder = settings.allow_backorder;
        self.updated_at = at;
    }

    pub fn settings(&self) -> ProductSettings {
        ProductSettings {
            store_id: self.store_id,
            product_id: self.product_id,
            name: self.name.clone(),
            sku: self.sku.clone(),
            reorder_point: self.reorder_point,
            unit_cost: self.unit_cost,
            allow_backorder: self.allow_backorder,
        }
    }

    /// Quantity sellable right now. Saturates at zero under a backorder.
    pub fn available_stock(&self) -> Decimal {
        self.current_stock
            .saturating_sub(self.reserved_stock)
            .max(Decimal::ZERO)
    }

    /// Quantity owed to customers beyond what is on hand (backorder only).
    pub fn backordered(&self) -> Decimal {
        self.reserved_stock
            .saturating_sub(self.current_stock)
            .max(Decimal::ZERO)
    }

    /// On-hand value at the current unit cost. `None` when the product does
    /// not fit in a `Decimal`; `apply` never produces such a row.
    pub fn checked_total_value(&self) -> Option<Decimal> {
        self.current_stock.max(Decimal::ZERO).checked_mul(self.unit_cost)
    }

    pub fn total_value(&self) -> Decimal {
        self.current_stock
            .max(Decimal::ZERO)
            .saturating_mul(self.unit_cost)
    }

    /// Validate `movement` against this row and return the next state.
    ///
    /// Rejections leave `self` untouched.
    pub fn apply(&self, movement: &StockMovement) -> DomainResult<InventoryState> {
        if movement.store_id != self.store_id || movement.product_id != self.product_id {
            return Err(DomainError::invariant(format!(
                "movement {} does not belong to {}",
                movement.id,
                self.key()
            )));
        }

        let delta = movement.quantity_delta;
        match movement.movement_type {
            MovementType::Reservation => {
                let free = self.current_stock.saturating_sub(self.reserved_stock);
                if free < delta {
                    return Err(DomainError::insufficient_stock(format!(
                        "cannot reserve {delta} of {}: only {} available",
                        self.product_id,
                        free.max(Decimal::ZERO)
                    )));
                }
            }
            MovementType::Release => {
                if self.reserved_stock.saturating_add(delta) < Decimal::ZERO {
                    return Err(DomainError::invariant(format!(
                        "cannot release {} of {}: only {} reserved",
                        -delta, self.product_id, self.reserved_stock
                    )));
                }
            }
            _ if delta < Decimal::ZERO && !self.allow_backorder => {
                let next = self.current_stock.saturating_add(delta);
                if next < Decimal::ZERO {
                    return Err(DomainError::insufficient_stock(format!(
                        "cannot remove {} of {}: only {} in stock",
                        -delta, self.product_id, self.current_stock
                    )));
                }
                if next < self.reserved_stock {
                    return Err(DomainError::insufficient_stock(format!(
                        "cannot remove {} of {}: {} of {} in stock is reserved",
                        -delta, self.product_id, self.reserved_stock, self.current_stock
                    )));
                }
            }
            _ => {}
        }

        let mut next = self.clone();
        next.try_fold(movement).ok_or_else(|| {
            DomainError::validation(format!(
                "{} of {} would take stock or its value out of range",
                delta, self.product_id
            ))
        })?;
        if movement.movement_type.affects_physical_stock() && next.checked_total_value().is_none() {
            return Err(DomainError::validation(format!(
                "stock value of {} would be out of range",
                self.product_id
            )));
        }
        Ok(next)
    }

    fn try_fold(&mut self, movement: &StockMovement) -> Option<()> {
        let delta = movement.quantity_delta;
        if movement.movement_type.affects_physical_stock() {
            if let Some(cost) = movement.unit_cost {
                self.unit_cost = weighted_unit_cost(self.current_stock, self.unit_cost, delta, cost)?;
            }
            self.current_stock = self.current_stock.checked_add(delta)?;
        } else {
            self.reserved_stock = self.reserved_stock.checked_add(delta)?;
        }
        self.last_movement_id = Some(movement.id);
        self.updated_at = movement.timestamp;
        self.version += 1;
        Some(())
    }

    /// Fold a movement without validation (replay of already committed history).
    ///
    /// Committed movements passed `apply`, so the arithmetic here stays in
    /// range; it saturates rather than panic on a corrupted ledger.
    pub fn fold(&mut self, movement: &StockMovement) {
        let mut next = self.clone();
        if next.try_fold(movement).is_some() {
            *self = next;
            return;
        }
        let delta = movement.quantity_delta;
        if movement.movement_type.affects_physical_stock() {
            self.current_stock = self.current_stock.saturating_add(delta);
        } else {
            self.reserved_stock = self.reserved_stock.saturating_add(delta);
        }
        self.last_movement_id = Some(movement.id);
        self.updated_at = movement.timestamp;
        self.version += 1;
    }

    /// Rebuild a row from settings and its full, ordered movement history.
    pub fn replay<'a>(
        settings: ProductSettings,
        created_at: DateTime<Utc>,
        movements: impl IntoIterator<Item = &'a StockMovement>,
    ) -> Self {
        let mut state = Self::new(settings, created_at);
        for m in movements {
            state.fold(m);
        }
        state
    }
}

fn weighted_unit_cost(on_hand: Decimal, current_cost: Decimal, received: Decimal, cost: Decimal) -> Option<Decimal> {
    let on_hand = on_hand.max(Decimal::ZERO);
    let total = on_hand.checked_add(received)?;
    if total <= Decimal::ZERO {
        return Some(cost);
    }
    let value = on_hand
        .checked_mul(current_cost)?
        .checked_add(received.checked_mul(cost)?)?;
    Some(value.checked_div(total)?.round_dp(4))
}
