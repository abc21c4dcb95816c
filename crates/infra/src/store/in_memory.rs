use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use pantry_core::{AggregateRoot, OrderId, ReservationId, StoreId, TransactionId};
use pantry_inventory::{InventoryState, ProductSettings, StockKey, StockMovement};
use pantry_sales::{Order, Reservation, ReturnTransaction, SaleRecord};

use super::r#trait::{CommitBatch, Committed, InventoryStore};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<StockKey, InventoryState>,
    /// Global ledger; `ledger[i].sequence == i + 1`.
    ledger: Vec<StockMovement>,
    by_row: HashMap<StockKey, Vec<usize>>,
    orders: HashMap<OrderId, Order>,
    reservations: HashMap<ReservationId, Reservation>,
    by_order: HashMap<OrderId, Vec<ReservationId>>,
    sales: HashMap<TransactionId, SaleRecord>,
    returns: HashMap<TransactionId, Vec<ReturnTransaction>>,
    last_commit_at: Option<DateTime<Utc>>,
}

/// In-memory inventory store.
///
/// One lock serialises commits, which makes every batch trivially atomic.
/// Lock acquisition is bounded by `timeout`. Intended for tests/dev.
#[derive(Debug)]
pub struct InMemoryInventoryStore {
    inner: RwLock<Inner>,
    timeout: Duration,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(2000))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            timeout,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.inner.try_read() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(StoreError::Backend("lock poisoned".to_string()));
                }
                Err(TryLockError::WouldBlock) => self.wait(deadline)?,
            }
        }
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.inner.try_write() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(StoreError::Backend("lock poisoned".to_string()));
                }
                Err(TryLockError::WouldBlock) => self.wait(deadline)?,
            }
        }
    }

    fn wait(&self, deadline: Instant) -> Result<(), StoreError> {
        if Instant::now() >= deadline {
            return Err(StoreError::Unavailable(format!(
                "store lock not acquired within {:?}",
                self.timeout
            )));
        }
        std::thread::sleep(Duration::from_micros(50));
        Ok(())
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn upsert_settings(
        &self,
        settings: ProductSettings,
        at: DateTime<Utc>,
    ) -> Result<InventoryState, StoreError> {
        settings.validate().map_err(StoreError::Rejected)?;
        let mut inner = self.write()?;
        let key = settings.key();
        let state = match inner.rows.get_mut(&key) {
            Some(row) => {
                row.reconfigure(settings, at);
                row.clone()
            }
            None => {
                let row = InventoryState::new(settings, at);
                inner.rows.insert(key, row.clone());
                row
            }
        };
        Ok(state)
    }

    fn state(&self, key: StockKey) -> Result<Option<InventoryState>, StoreError> {
        Ok(self.read()?.rows.get(&key).cloned())
    }

    fn states(&self, store_id: StoreId) -> Result<Vec<InventoryState>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .rows
            .values()
            .filter(|s| s.store_id == store_id)
            .cloned()
            .collect())
    }

    fn commit(&self, batch: CommitBatch) -> Result<Committed, StoreError> {
        if batch.is_empty() {
            return Ok(Committed::default());
        }

        let mut guard = self.write()?;
        let inner = &mut *guard;

        let now = Utc::now();
        let at = match inner.last_commit_at {
            Some(last) if last > now => last,
            _ => now,
        };

        // 1) Version checks on every row the caller read.
        let mut staged: Vec<InventoryState> = Vec::with_capacity(batch.expected_rows.len());
        for (key, expected) in &batch.expected_rows {
            let row = inner
                .rows
                .get(key)
                .ok_or_else(|| StoreError::NotFound(format!("inventory row {key}")))?;
            if row.version != *expected {
                return Err(StoreError::Concurrency(format!(
                    "row {key} is at version {}, expected {expected}",
                    row.version
                )));
            }
            staged.push(row.clone());
        }

        // 2) Order-side compare-and-swaps, before any fold can reject the batch.
        if let Some(write) = &batch.order {
            let current = inner.orders.get(&write.order.id_typed()).map(|o| o.version());
            if !write.expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "order {} is at version {current:?}, expected {:?}",
                    write.order.id_typed(),
                    write.expected
                )));
            }
        }
        for (id, _) in &batch.close_reservations {
            match inner.reservations.get(id) {
                Some(r) if r.is_active() => {}
                Some(r) => {
                    return Err(StoreError::Concurrency(format!(
                        "reservation {id} is already {}",
                        r.status.as_str()
                    )));
                }
                None => return Err(StoreError::NotFound(format!("reservation {id}"))),
            }
        }
        if let Some(write) = &batch.sale {
            let current = inner.sales.get(&write.record.transaction_id).map(|s| s.version);
            if !write.expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "sale {} is at version {current:?}, expected {:?}",
                    write.record.transaction_id, write.expected
                )));
            }
        }

        // 3) Fold movements through the projector; any rejection aborts the batch.
        let base = inner.ledger.len() as u64;
        let mut movements = Vec::with_capacity(batch.movements.len());
        for (i, mut movement) in batch.movements.into_iter().enumerate() {
            let key = StockKey::new(movement.store_id, movement.product_id);
            let row = staged.iter_mut().find(|s| s.key() == key).ok_or_else(|| {
                StoreError::Backend(format!(
                    "movement {} touches {key} without an expected version",
                    movement.id
                ))
            })?;
            movement.sequence = base + i as u64 + 1;
            movement.timestamp = at;
            *row = row.apply(&movement).map_err(StoreError::Rejected)?;
            movements.push(movement);
        }

        // 4) Everything checked: write.
        for movement in &movements {
            let key = StockKey::new(movement.store_id, movement.product_id);
            inner.by_row.entry(key).or_default().push(inner.ledger.len());
            inner.ledger.push(movement.clone());
        }
        for row in &staged {
            inner.rows.insert(row.key(), row.clone());
        }
        if let Some(write) = batch.order {
            inner.orders.insert(write.order.id_typed(), write.order);
        }
        for reservation in batch.open_reservations {
            inner
                .by_order
                .entry(reservation.order_id)
                .or_default()
                .push(reservation.id);
            inner.reservations.insert(reservation.id, reservation);
        }
        for (id, status) in batch.close_reservations {
            if let Some(r) = inner.reservations.get_mut(&id) {
                r.status = status;
            }
        }
        if let Some(write) = batch.sale {
            inner.sales.insert(write.record.transaction_id, write.record);
        }
        if let Some(ret) = batch.return_transaction {
            inner
                .returns
                .entry(ret.original_transaction_id)
                .or_default()
                .push(ret);
        }
        inner.last_commit_at = Some(at);

        Ok(Committed {
            movements,
            states: staged,
        })
    }

    fn movements_after(
        &self,
        key: StockKey,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let inner = self.read()?;
        let Some(indexes) = inner.by_row.get(&key) else {
            return Ok(vec![]);
        };
        Ok(indexes
            .iter()
            .map(|&i| &inner.ledger[i])
            .filter(|m| m.sequence > after_sequence)
            .take(limit)
            .cloned()
            .collect())
    }

    fn recent_movements(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .ledger
            .iter()
            .rev()
            .filter(|m| m.store_id == store_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn order(&self, store_id: StoreId, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .orders
            .get(&order_id)
            .filter(|o| o.store_id() == Some(store_id))
            .cloned())
    }

    fn reservations_for_order(
        &self,
        store_id: StoreId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let inner = self.read()?;
        let Some(ids) = inner.by_order.get(&order_id) else {
            return Ok(vec![]);
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.reservations.get(id))
            .filter(|r| r.store_id == store_id)
            .cloned()
            .collect())
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let inner = self.read()?;
        let mut expired: Vec<Reservation> = inner
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    fn sale(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Option<SaleRecord>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .sales
            .get(&transaction_id)
            .filter(|s| s.store_id == store_id)
            .cloned())
    }

    fn returns_for(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Vec<ReturnTransaction>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .returns
            .get(&transaction_id)
            .map(|rs| rs.iter().filter(|r| r.store_id == store_id).cloned().collect())
            .unwrap_or_default())
    }
}
