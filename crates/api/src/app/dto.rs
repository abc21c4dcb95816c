use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pantry_core::{AggregateRoot, OrderId, ProductId, StoreId};
use pantry_inventory::{AdjustmentKind, InventoryState, MovementType, Reference, StockMovement};
use pantry_sales::{Order, OrderLine, OrderStatus, Reservation, ReturnItem};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Manual adjustment. Either a signed `adjustment`, or an explicit `type` with
/// a `quantity` (`set` takes the absolute count).
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub product_id: ProductId,
    pub adjustment: Option<Decimal>,
    #[serde(rename = "type")]
    pub kind: Option<AdjustmentKind>,
    pub quantity: Option<Decimal>,
    pub reason: String,
    pub reference: Option<String>,
}

impl AdjustRequest {
    pub fn plan(&self) -> Result<(AdjustmentKind, Decimal), axum::response::Response> {
        match (self.adjustment, self.kind, self.quantity) {
            (Some(delta), None, None) if delta > Decimal::ZERO => Ok((AdjustmentKind::Increase, delta)),
            (Some(delta), None, None) if delta < Decimal::ZERO => Ok((AdjustmentKind::Decrease, -delta)),
            (Some(_), None, None) => Err(validation("adjustment must be non-zero")),
            (None, Some(kind), Some(quantity)) => Ok((kind, quantity)),
            (None, Some(_), None) => Err(validation("quantity is required with type")),
            _ => Err(validation(
                "provide either a signed adjustment, or type and quantity",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub to_store_id: StoreId,
    pub quantity: Decimal,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LevelsQuery {
    pub search: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn clamped(&self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub discount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct CreateSaleRequest {
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub discount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateReturnRequest {
    pub original_transaction_id: String,
    pub items: Vec<ReturnItem>,
    pub reason: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct MovementResponse {
    pub id: String,
    pub product_id: ProductId,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub sequence: u64,
}

impl From<StockMovement> for MovementResponse {
    fn from(m: StockMovement) -> Self {
        Self {
            id: m.id.to_string(),
            product_id: m.product_id,
            movement_type: m.movement_type,
            quantity: m.quantity_delta,
            timestamp: m.timestamp,
            reason: m.reason,
            notes: reference_note(&m.reference),
            sequence: m.sequence,
        }
    }
}

fn reference_note(reference: &Reference) -> Option<String> {
    match reference {
        Reference::None => None,
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct InventoryResponse {
    pub product_id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    pub current_stock: Decimal,
    pub reserved_stock: Decimal,
    pub available_stock: Decimal,
    pub reorder_point: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub allow_backorder: bool,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<InventoryState> for InventoryResponse {
    fn from(s: InventoryState) -> Self {
        Self {
            available_stock: s.available_stock(),
            total_value: s.total_value(),
            product_id: s.product_id,
            name: s.name,
            sku: s.sku,
            current_stock: s.current_stock,
            reserved_stock: s.reserved_stock,
            reorder_point: s.reorder_point,
            unit_cost: s.unit_cost,
            allow_backorder: s.allow_backorder,
            version: s.version,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub status: OrderStatus,
    pub items: Vec<OrderLine>,
    pub discount: Decimal,
    pub final_amount: Decimal,
    pub placed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservations: Option<Vec<Reservation>>,
}

impl OrderResponse {
    pub fn new(order: &Order, reservations: Option<Vec<Reservation>>) -> Self {
        Self {
            id: order.id_typed(),
            status: order.status(),
            items: order.lines().to_vec(),
            discount: order.discount(),
            final_amount: order.final_amount(),
            placed_at: order.placed_at(),
            updated_at: order.updated_at(),
            version: order.version(),
            reservations,
        }
    }
}

// -------------------------
// Helpers
// -------------------------

pub fn parse_id<T: core::str::FromStr>(what: &str, raw: &str) -> Result<T, axum::response::Response> {
    raw.trim().parse().map_err(|_| errors::invalid_id(what, raw))
}

fn validation(message: &str) -> axum::response::Response {
    errors::json_error(axum::http::StatusCode::BAD_REQUEST, "validation_error", message)
}
