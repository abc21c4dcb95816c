//! Translation of a manual adjustment request into a single ledger movement.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pantry_core::{DomainError, DomainResult};

use crate::movement::MovementType;
use crate::state::InventoryState;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Increase,
    Decrease,
    /// Absolute stock count; recorded as the difference to the current stock.
    Set,
}

impl core::str::FromStr for AdjustmentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increase" => Ok(AdjustmentKind::Increase),
            "decrease" => Ok(AdjustmentKind::Decrease),
            "set" => Ok(AdjustmentKind::Set),
            other => Err(DomainError::validation(format!(
                "unknown adjustment type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AdjustmentPlan {
    pub movement_type: MovementType,
    pub delta: Decimal,
}

/// Plan the movement for an adjustment against the row as it is now.
///
/// A `Set` is relative to `state.current_stock`, so the plan is only valid for
/// the version it was computed from.
pub fn plan_adjustment(
    kind: AdjustmentKind,
    quantity: Decimal,
    state: &InventoryState,
) -> DomainResult<AdjustmentPlan> {
    match kind {
        AdjustmentKind::Increase | AdjustmentKind::Decrease if quantity <= Decimal::ZERO => {
            Err(DomainError::validation("quantity must be greater than zero"))
        }
        AdjustmentKind::Increase => Ok(AdjustmentPlan {
            movement_type: MovementType::AdjustmentIncrease,
            delta: quantity,
        }),
        AdjustmentKind::Decrease => Ok(AdjustmentPlan {
            movement_type: MovementType::AdjustmentDecrease,
            delta: -quantity,
        }),
        AdjustmentKind::Set if quantity < Decimal::ZERO => {
            Err(DomainError::validation("stock count cannot be negative"))
        }
        AdjustmentKind::Set => Ok(AdjustmentPlan {
            movement_type: MovementType::AdjustmentSet,
            delta: quantity
                .checked_sub(state.current_stock)
                .ok_or_else(|| DomainError::validation("stock count is out of range"))?,
        }),
    }
}
