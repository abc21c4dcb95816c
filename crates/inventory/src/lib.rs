//! Inventory domain module: the stock ledger's vocabulary.
//!
//! This crate contains business rules for stock movements and the derived
//! per-product state, implemented purely as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod adjustment;
pub mod movement;
pub mod reorder;
pub mod state;

pub use adjustment::{AdjustmentKind, AdjustmentPlan, plan_adjustment};
pub use movement::{InventoryEvent, MovementType, Reference, StockMovement};
pub use reorder::{StockStatus, stock_status};
pub use state::{InventoryState, ProductSettings, StockKey};
