use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pantry_core::{
    ActorId, DomainError, DomainResult, MovementId, OrderId, ProductId, ReturnId, StoreId,
    TransactionId,
};
use pantry_events::Event;

/// Kind of ledger movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    Sale,
    AdjustmentIncrease,
    AdjustmentDecrease,
    AdjustmentSet,
    TransferIn,
    TransferOut,
    Reservation,
    Release,
    ReturnIn,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Sign {
    Positive,
    Negative,
    Any,
}

impl MovementType {
    pub const ALL: [MovementType; 10] = [
        MovementType::Purchase,
        MovementType::Sale,
        MovementType::AdjustmentIncrease,
        MovementType::AdjustmentDecrease,
        MovementType::AdjustmentSet,
        MovementType::TransferIn,
        MovementType::TransferOut,
        MovementType::Reservation,
        MovementType::Release,
        MovementType::ReturnIn,
    ];

    /// Whether the delta is applied to `current_stock` (as opposed to `reserved_stock`).
    pub fn affects_physical_stock(self) -> bool {
        !matches!(self, MovementType::Reservation | MovementType::Release)
    }

    pub fn requires_reason(self) -> bool {
        matches!(
            self,
            MovementType::AdjustmentIncrease
                | MovementType::AdjustmentDecrease
                | MovementType::AdjustmentSet
                | MovementType::ReturnIn
        )
    }

    fn sign(self) -> Sign {
        match self {
            MovementType::Purchase
            | MovementType::AdjustmentIncrease
            | MovementType::TransferIn
            | MovementType::ReturnIn
            | MovementType::Reservation => Sign::Positive,
            MovementType::Sale
            | MovementType::AdjustmentDecrease
            | MovementType::TransferOut
            | MovementType::Release => Sign::Negative,
            MovementType::AdjustmentSet => Sign::Any,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Sale => "sale",
            MovementType::AdjustmentIncrease => "adjustment_increase",
            MovementType::AdjustmentDecrease => "adjustment_decrease",
            MovementType::AdjustmentSet => "adjustment_set",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
            MovementType::Reservation => "reservation",
            MovementType::Release => "release",
            MovementType::ReturnIn => "return_in",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// Where a movement came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reference {
    Order(OrderId),
    Sale(TransactionId),
    Return(ReturnId),
    Transfer(Uuid),
    /// Free-form note (supplier invoice number, stock count sheet, ...).
    Manual(String),
    None,
}

impl core::fmt::Display for Reference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Reference::Order(id) => write!(f, "order:{id}"),
            Reference::Sale(id) => write!(f, "sale:{id}"),
            Reference::Return(id) => write!(f, "return:{id}"),
            Reference::Transfer(id) => write!(f, "transfer:{id}"),
            Reference::Manual(note) => f.write_str(note),
            Reference::None => Ok(()),
        }
    }
}

/// One immutable, signed change recorded in the stock ledger.
///
/// `sequence` is the ledger position and is assigned by the store on commit
/// (zero until then). Movements are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    /// Applied to `current_stock` for physical types, to `reserved_stock` otherwise.
    pub quantity_delta: Decimal,
    pub reason: Option<String>,
    pub reference: Reference,
    pub actor_id: ActorId,
    /// Purchase cost per unit, folded into the weighted average unit cost.
    pub unit_cost: Option<Decimal>,
}

impl StockMovement {
    /// Build a validated, not-yet-committed movement.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store_id: StoreId,
        product_id: ProductId,
        movement_type: MovementType,
        quantity_delta: Decimal,
        reason: Option<String>,
        reference: Reference,
        actor_id: ActorId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let ok = match movement_type.sign() {
            Sign::Positive => quantity_delta > Decimal::ZERO,
            Sign::Negative => quantity_delta < Decimal::ZERO,
            Sign::Any => true,
        };
        if !ok {
            return Err(DomainError::validation(format!(
                "quantity delta {quantity_delta} has the wrong sign for a {movement_type} movement"
            )));
        }

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        if movement_type.requires_reason() && reason.is_none() {
            return Err(DomainError::validation(format!(
                "reason is required for {movement_type} movements"
            )));
        }

        Ok(Self {
            id: MovementId::new(),
            store_id,
            product_id,
            sequence: 0,
            timestamp,
            movement_type,
            quantity_delta,
            reason,
            reference,
            actor_id,
            unit_cost: None,
        })
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> DomainResult<Self> {
        if self.movement_type != MovementType::Purchase {
            return Err(DomainError::validation("only purchases carry a unit cost"));
        }
        if unit_cost < Decimal::ZERO {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        self.unit_cost = Some(unit_cost);
        Ok(self)
    }

    /// Unsigned quantity, as shown in movement history.
    pub fn quantity(&self) -> Decimal {
        self.quantity_delta.abs()
    }
}

/// Event published after a movement is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    MovementRecorded(StockMovement),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::MovementRecorded(_) => "inventory.movement.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::MovementRecorded(m) => m.timestamp,
        }
    }
}
