//! Stock Ledger: append, ordered reads and integrity audits.
//!
//! The ledger is the source of truth; `InventoryState` rows are a cache over
//! it. `audit` and `rebuild` replay a row's full history through the same fold
//! the store uses on commit.

use std::collections::VecDeque;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use pantry_core::{MovementId, StoreId};
use pantry_events::{EventBus, EventEnvelope};
use pantry_inventory::{InventoryState, StockKey, StockMovement};

use crate::error::ServiceError;
use crate::pipeline::{CommitPipeline, Decision};
use crate::store::{CommitBatch, InventoryStore};

const PAGE_SIZE: usize = 256;

/// Result of replaying one row's ledger against its projected state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub product_id: pantry_core::ProductId,
    pub movements: u64,
    pub replayed_stock: Decimal,
    pub replayed_reserved: Decimal,
    pub projected_stock: Decimal,
    pub projected_reserved: Decimal,
    pub consistent: bool,
}

pub struct StockLedger<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
}

impl<S, B> Clone for StockLedger<S, B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<S, B> StockLedger<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(pipeline: Arc<CommitPipeline<S, B>>) -> Self {
        Self { pipeline }
    }

    /// Append one movement and fold it into its row, atomically.
    ///
    /// Returns once the commit is durable. The movement is validated against
    /// the row as of the commit; a rejection appends nothing.
    #[instrument(skip(self, movement), fields(product_id = %movement.product_id, kind = %movement.movement_type), err)]
    pub fn append(&self, movement: StockMovement) -> Result<MovementId, ServiceError> {
        let key = StockKey::new(movement.store_id, movement.product_id);
        let executed = self.pipeline.execute("ledger.append", |store| {
            let row = load_row(store, key)?;
            let mut batch = CommitBatch::default();
            batch.expect_row(&row);
            batch.movements.push(movement.clone());
            Ok(Decision::new(batch, movement.id))
        })?;
        Ok(executed.output)
    }

    /// Lazily iterate a row's movements in ledger order.
    ///
    /// `since` is an exclusive ledger position; pass a cursor's `position()`
    /// to resume where an earlier iteration stopped.
    pub fn list_by_product(&self, key: StockKey, since: Option<u64>) -> LedgerCursor<'_, S> {
        LedgerCursor::new(self.pipeline.store(), key, since.unwrap_or(0))
    }

    /// Movement history of one row, newest first.
    pub fn history(&self, key: StockKey, limit: usize) -> Result<Vec<StockMovement>, ServiceError> {
        load_row(self.pipeline.store(), key)?;
        let all = self
            .list_by_product(key, None)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(all.into_iter().rev().take(limit).collect())
    }

    /// Latest movements across a store, newest first.
    pub fn recent(&self, store_id: StoreId, limit: usize) -> Result<Vec<StockMovement>, ServiceError> {
        Ok(self.pipeline.store().recent_movements(store_id, limit)?)
    }

    /// Current stock as the sum of every physical movement ever recorded.
    pub fn replay(&self, key: StockKey) -> Result<Decimal, ServiceError> {
        Ok(self.rebuild(key)?.current_stock)
    }

    /// The row rebuilt from the ledger alone.
    ///
    /// Catalog settings are not ledger-derived and are taken from the live row,
    /// as is the unit cost (settings may have repriced it since the last purchase).
    pub fn rebuild(&self, key: StockKey) -> Result<InventoryState, ServiceError> {
        let live = load_row(self.pipeline.store(), key)?;
        let mut movements = Vec::new();
        for m in self.list_by_product(key, None) {
            movements.push(m?);
        }
        let mut rebuilt = InventoryState::replay(live.settings(), live.updated_at, &movements);
        rebuilt.unit_cost = live.unit_cost;
        if movements.is_empty() {
            rebuilt.updated_at = live.updated_at;
        }
        Ok(rebuilt)
    }

    #[instrument(skip(self), fields(product_id = %key.product_id, store_id = %key.store_id), err)]
    pub fn audit(&self, key: StockKey) -> Result<LedgerAudit, ServiceError> {
        let live = load_row(self.pipeline.store(), key)?;
        let rebuilt = self.rebuild(key)?;

        // The row may have moved on between the two reads; only compare like for like.
        let (projected_stock, projected_reserved) = if rebuilt.version == live.version {
            (live.current_stock, live.reserved_stock)
        } else {
            let again = load_row(self.pipeline.store(), key)?;
            (again.current_stock, again.reserved_stock)
        };

        let consistent = rebuilt.current_stock == projected_stock
            && rebuilt.reserved_stock == projected_reserved;
        if consistent {
            info!(movements = rebuilt.version, "ledger audit passed");
        } else {
            warn!(
                replayed = %rebuilt.current_stock,
                projected = %projected_stock,
                "ledger audit found drift"
            );
        }

        Ok(LedgerAudit {
            product_id: key.product_id,
            movements: rebuilt.version,
            replayed_stock: rebuilt.current_stock,
            replayed_reserved: rebuilt.reserved_stock,
            projected_stock,
            projected_reserved,
            consistent,
        })
    }
}

pub(crate) fn load_row<S: InventoryStore + ?Sized>(
    store: &S,
    key: StockKey,
) -> Result<InventoryState, ServiceError> {
    store
        .state(key)?
        .ok_or_else(|| ServiceError::NotFound(format!("product {} in store {}", key.product_id, key.store_id)))
}

/// Lazy, finite, restartable walk over one row's ledger.
///
/// Pages are fetched on demand. After an error the cursor yields nothing more.
pub struct LedgerCursor<'a, S: ?Sized> {
    store: &'a S,
    key: StockKey,
    position: u64,
    buffer: VecDeque<StockMovement>,
    done: bool,
}

impl<'a, S: InventoryStore + ?Sized> LedgerCursor<'a, S> {
    fn new(store: &'a S, key: StockKey, since: u64) -> Self {
        Self {
            store,
            key,
            position: since,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Ledger position of the last movement handed out.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn fill(&mut self) -> Result<(), ServiceError> {
        let after = self.buffer.back().map(|m| m.sequence).unwrap_or(self.position);
        let page = self.store.movements_after(self.key, after, PAGE_SIZE)?;
        if page.len() < PAGE_SIZE {
            self.done = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<S: InventoryStore + ?Sized> Iterator for LedgerCursor<'_, S> {
    type Item = Result<StockMovement, ServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        let next = self.buffer.pop_front()?;
        self.position = next.sequence;
        Some(Ok(next))
    }
}
