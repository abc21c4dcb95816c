use std::sync::Arc;

use chrono::{DateTime, Utc};

use pantry_core::{ExpectedVersion, OrderId, ReservationId, StoreId, TransactionId};
use pantry_inventory::{InventoryState, ProductSettings, StockKey, StockMovement};
use pantry_sales::{Order, Reservation, ReservationStatus, ReturnTransaction, SaleRecord};

use crate::error::StoreError;

/// Order snapshot to persist, guarded by the version it was loaded at.
#[derive(Debug, Clone)]
pub struct OrderWrite {
    pub order: Order,
    pub expected: ExpectedVersion,
}

#[derive(Debug, Clone)]
pub struct SaleWrite {
    pub record: SaleRecord,
    pub expected: ExpectedVersion,
}

/// Everything one operation writes, committed atomically or not at all.
///
/// Movements are folded into their inventory rows in order, each through
/// `InventoryState::apply`, so a batch may carry several movements for one row
/// (a delivery's `release` + `sale`). Every row touched must be listed in
/// `expected_rows` with the version the caller read.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub expected_rows: Vec<(StockKey, u64)>,
    pub movements: Vec<StockMovement>,
    pub order: Option<OrderWrite>,
    pub open_reservations: Vec<Reservation>,
    /// Reservations to close; each must still be `Active` at commit.
    pub close_reservations: Vec<(ReservationId, ReservationStatus)>,
    pub sale: Option<SaleWrite>,
    pub return_transaction: Option<ReturnTransaction>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
            && self.order.is_none()
            && self.open_reservations.is_empty()
            && self.close_reservations.is_empty()
            && self.sale.is_none()
            && self.return_transaction.is_none()
    }

    /// Record that the caller read `state` at its current version.
    pub fn expect_row(&mut self, state: &InventoryState) {
        let key = state.key();
        if !self.expected_rows.iter().any(|(k, _)| *k == key) {
            self.expected_rows.push((key, state.version));
        }
    }
}

/// What a successful commit produced.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    /// Movements with their ledger `sequence` and commit `timestamp` filled in.
    pub movements: Vec<StockMovement>,
    /// Rows after the commit, one per touched key.
    pub states: Vec<InventoryState>,
}

impl Committed {
    pub fn state(&self, key: StockKey) -> Option<&InventoryState> {
        self.states.iter().find(|s| s.key() == key)
    }
}

/// Storage boundary for the ledger, the projected rows and the order-side
/// records that must change in the same transaction.
///
/// ## Guarantees
///
/// - `commit` is all-or-nothing: ledger append, row updates, order, reservation,
///   sale and return writes either all persist or none do.
/// - Ledger `sequence` numbers are assigned at commit, strictly increasing
///   across the whole store; per row they give the total order of movements.
/// - Movements are never updated or deleted.
/// - Version and reservation-status checks run before any movement is folded,
///   so a stale batch fails with `StoreError::Concurrency`, never `Rejected`.
/// - Every call is bounded by the store's timeout and fails with
///   `StoreError::Unavailable` beyond it.
pub trait InventoryStore: Send + Sync {
    /// Create the row for a product, or replace its catalog settings.
    fn upsert_settings(
        &self,
        settings: ProductSettings,
        at: DateTime<Utc>,
    ) -> Result<InventoryState, StoreError>;

    fn state(&self, key: StockKey) -> Result<Option<InventoryState>, StoreError>;

    fn states(&self, store_id: StoreId) -> Result<Vec<InventoryState>, StoreError>;

    fn commit(&self, batch: CommitBatch) -> Result<Committed, StoreError>;

    /// Up to `limit` movements of one row with `sequence > after_sequence`, ascending.
    fn movements_after(
        &self,
        key: StockKey,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Latest movements of a store, newest first.
    fn recent_movements(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError>;

    fn order(&self, store_id: StoreId, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    fn reservations_for_order(
        &self,
        store_id: StoreId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Active reservations whose expiry is at or before `now`, across all stores.
    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError>;

    fn sale(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Option<SaleRecord>, StoreError>;

    fn returns_for(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Vec<ReturnTransaction>, StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn upsert_settings(
        &self,
        settings: ProductSettings,
        at: DateTime<Utc>,
    ) -> Result<InventoryState, StoreError> {
        (**self).upsert_settings(settings, at)
    }

    fn state(&self, key: StockKey) -> Result<Option<InventoryState>, StoreError> {
        (**self).state(key)
    }

    fn states(&self, store_id: StoreId) -> Result<Vec<InventoryState>, StoreError> {
        (**self).states(store_id)
    }

    fn commit(&self, batch: CommitBatch) -> Result<Committed, StoreError> {
        (**self).commit(batch)
    }

    fn movements_after(
        &self,
        key: StockKey,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_after(key, after_sequence, limit)
    }

    fn recent_movements(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).recent_movements(store_id, limit)
    }

    fn order(&self, store_id: StoreId, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).order(store_id, order_id)
    }

    fn reservations_for_order(
        &self,
        store_id: StoreId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self).reservations_for_order(store_id, order_id)
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self).expired_reservations(now, limit)
    }

    fn sale(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Option<SaleRecord>, StoreError> {
        (**self).sale(store_id, transaction_id)
    }

    fn returns_for(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Vec<ReturnTransaction>, StoreError> {
        (**self).returns_for(store_id, transaction_id)
    }
}
