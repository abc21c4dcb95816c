//! Stock holds taken by confirmed orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pantry_core::{OrderId, ProductId, ReservationId, StoreId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    /// Turned into a sale at delivery.
    Converted,
    /// Released by cancellation.
    Released,
    /// Released by the expiry sweep.
    Expired,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Converted => "converted",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

/// One order line's hold against a product's available stock.
///
/// Every reservation is backed by exactly one `reservation` movement, and once
/// closed by exactly one `release` movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub store_id: StoreId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn new(
        store_id: StoreId,
        order_id: OrderId,
        product_id: ProductId,
        quantity: Decimal,
        created_at: DateTime<Utc>,
        ttl: Option<chrono::Duration>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            store_id,
            order_id,
            product_id,
            quantity,
            created_at,
            expires_at: ttl.map(|ttl| created_at + ttl),
            status: ReservationStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_needs_a_ttl_and_an_active_hold() {
        let now = Utc::now();
        let mk = |ttl| {
            Reservation::new(
                StoreId::new(),
                OrderId::new(),
                ProductId::new(),
                Decimal::ONE,
                now,
                ttl,
            )
        };

        assert!(!mk(None).is_expired(now + Duration::days(365)));

        let mut held = mk(Some(Duration::minutes(15)));
        assert!(!held.is_expired(now + Duration::minutes(14)));
        assert!(held.is_expired(now + Duration::minutes(15)));

        held.status = ReservationStatus::Converted;
        assert!(!held.is_expired(now + Duration::hours(1)));
    }
}
