//! Reorder classification.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pantry_core::DomainError;

use crate::state::InventoryState;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
}

impl StockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::LowStock => "low_stock",
            StockStatus::InStock => "in_stock",
        }
    }
}

impl core::str::FromStr for StockStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "out_of_stock" => Ok(StockStatus::OutOfStock),
            "low_stock" => Ok(StockStatus::LowStock),
            "in_stock" => Ok(StockStatus::InStock),
            other => Err(DomainError::validation(format!("unknown stock status '{other}'"))),
        }
    }
}

/// Classify on physical stock: reserved units still sit on the shelf.
pub fn stock_status(state: &InventoryState) -> StockStatus {
    if state.current_stock <= Decimal::ZERO {
        StockStatus::OutOfStock
    } else if state.current_stock <= state.reorder_point {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}
