//! Postgres-backed inventory store.
//!
//! Every `commit` runs in one transaction:
//!
//! 1. `SELECT ... FOR UPDATE` each expected row and compare its `version`
//! 2. fold the movements in Rust through `InventoryState::apply`
//! 3. `INSERT` the movements (`sequence` comes from a `BIGSERIAL`)
//! 4. `UPDATE` each row `WHERE version = <expected>`
//! 5. order / reservation / sale / return writes, each a compare-and-swap
//!
//! Any failure drops the transaction, which rolls everything back.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | StoreError |
//! |------------|------|------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (serialization failure) | `40001` | `Concurrency` |
//! | PoolTimedOut | N/A | `Unavailable` |
//! | anything else | | `Backend` |
//!
//! The `InventoryStore` trait is synchronous; calls are driven with
//! `Handle::block_on` on the runtime the store was connected from, so they must
//! come from a thread that is not itself running async code (`spawn_blocking`
//! or a worker thread). Every call is wrapped in `tokio::time::timeout`.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;

use pantry_core::{
    ActorId, AggregateRoot, ExpectedVersion, MovementId, OrderId, ProductId, ReservationId,
    StoreId, TransactionId,
};
use pantry_inventory::{InventoryState, ProductSettings, StockKey, StockMovement};
use pantry_sales::{Order, Reservation, ReservationStatus, ReturnTransaction, SaleRecord};

use super::r#trait::{CommitBatch, Committed, InventoryStore};
use crate::error::StoreError;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_state (
    store_id         UUID        NOT NULL,
    product_id       UUID        NOT NULL,
    name             TEXT        NOT NULL,
    sku              TEXT,
    current_stock    NUMERIC     NOT NULL,
    reserved_stock   NUMERIC     NOT NULL CHECK (reserved_stock >= 0),
    reorder_point    NUMERIC     NOT NULL,
    unit_cost        NUMERIC     NOT NULL,
    allow_backorder  BOOLEAN     NOT NULL,
    last_movement_id UUID,
    updated_at       TIMESTAMPTZ NOT NULL,
    version          BIGINT      NOT NULL,
    PRIMARY KEY (store_id, product_id)
);

CREATE TABLE IF NOT EXISTS stock_movements (
    sequence       BIGSERIAL   PRIMARY KEY,
    movement_id    UUID        NOT NULL UNIQUE,
    store_id       UUID        NOT NULL,
    product_id     UUID        NOT NULL,
    occurred_at    TIMESTAMPTZ NOT NULL,
    movement_type  TEXT        NOT NULL,
    quantity_delta NUMERIC     NOT NULL,
    reason         TEXT,
    reference      JSONB       NOT NULL,
    actor_id       UUID        NOT NULL,
    unit_cost      NUMERIC
);
CREATE INDEX IF NOT EXISTS stock_movements_by_row
    ON stock_movements (store_id, product_id, sequence);

CREATE TABLE IF NOT EXISTS orders (
    order_id UUID   PRIMARY KEY,
    store_id UUID   NOT NULL,
    version  BIGINT NOT NULL,
    data     JSONB  NOT NULL
);

CREATE TABLE IF NOT EXISTS reservations (
    reservation_id UUID        PRIMARY KEY,
    store_id       UUID        NOT NULL,
    order_id       UUID        NOT NULL,
    product_id     UUID        NOT NULL,
    quantity       NUMERIC     NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL,
    expires_at     TIMESTAMPTZ,
    status         TEXT        NOT NULL
);
CREATE INDEX IF NOT EXISTS reservations_by_order ON reservations (store_id, order_id);
CREATE INDEX IF NOT EXISTS reservations_by_expiry ON reservations (status, expires_at);

CREATE TABLE IF NOT EXISTS sales (
    transaction_id UUID   PRIMARY KEY,
    store_id       UUID   NOT NULL,
    version        BIGINT NOT NULL,
    data           JSONB  NOT NULL
);

CREATE TABLE IF NOT EXISTS returns (
    return_id               UUID        PRIMARY KEY,
    store_id                UUID        NOT NULL,
    original_transaction_id UUID        NOT NULL,
    created_at              TIMESTAMPTZ NOT NULL,
    data                    JSONB       NOT NULL
);
CREATE INDEX IF NOT EXISTS returns_by_original ON returns (store_id, original_transaction_id);
"#;

const STATE_COLUMNS: &str = "store_id, product_id, name, sku, current_stock, reserved_stock, \
     reorder_point, unit_cost, allow_backorder, last_movement_id, updated_at, version";

const MOVEMENT_COLUMNS: &str = "sequence, movement_id, store_id, product_id, occurred_at, \
     movement_type, quantity_delta, reason, reference, actor_id, unit_cost";

const RESERVATION_COLUMNS: &str =
    "reservation_id, store_id, order_id, product_id, quantity, created_at, expires_at, status";

#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
    timeout: Duration,
    runtime: Handle,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool, timeout: Duration, runtime: Handle) -> Self {
        Self {
            pool,
            timeout,
            runtime,
        }
    }

    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, timeout, Handle::current()))
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Drive an async operation to completion under the store timeout.
    fn run<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let timeout = self.timeout;
        self.runtime.block_on(async move {
            tokio::time::timeout(timeout, fut).await.map_err(|_| {
                StoreError::Unavailable(format!("{operation} did not finish within {timeout:?}"))
            })?
        })
    }

    #[instrument(skip(self, settings), fields(store_id = %settings.store_id, product_id = %settings.product_id), err)]
    async fn upsert_settings_async(
        &self,
        settings: ProductSettings,
        at: DateTime<Utc>,
    ) -> Result<InventoryState, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO inventory_state ({STATE_COLUMNS})
            VALUES ($1, $2, $3, $4, 0, 0, $5, $6, $7, NULL, $8, 0)
            ON CONFLICT (store_id, product_id) DO UPDATE SET
                name = EXCLUDED.name,
                sku = EXCLUDED.sku,
                reorder_point = EXCLUDED.reorder_point,
                unit_cost = EXCLUDED.unit_cost,
                allow_backorder = EXCLUDED.allow_backorder,
                updated_at = EXCLUDED.updated_at
            RETURNING {STATE_COLUMNS}
            "#
        ))
        .bind(settings.store_id.as_uuid())
        .bind(settings.product_id.as_uuid())
        .bind(&settings.name)
        .bind(&settings.sku)
        .bind(settings.reorder_point)
        .bind(settings.unit_cost)
        .bind(settings.allow_backorder)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_settings", e))?;

        state_from_row(&row)
    }

    #[instrument(
        skip(self, batch),
        fields(rows = batch.expected_rows.len(), movements = batch.movements.len()),
        err
    )]
    async fn commit_async(&self, batch: CommitBatch) -> Result<Committed, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut staged: Vec<(InventoryState, u64)> = Vec::with_capacity(batch.expected_rows.len());
        for (key, expected) in &lock_order(&batch.expected_rows) {
            let row = sqlx::query(&format!(
                "SELECT {STATE_COLUMNS} FROM inventory_state \
                 WHERE store_id = $1 AND product_id = $2 FOR UPDATE"
            ))
            .bind(key.store_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_row", e))?
            .ok_or_else(|| StoreError::NotFound(format!("inventory row {key}")))?;

            let state = state_from_row(&row)?;
            if state.version != *expected {
                return Err(StoreError::Concurrency(format!(
                    "row {key} is at version {}, expected {expected}",
                    state.version
                )));
            }
            staged.push((state, *expected));
        }

        // Order, reservation and sale compare-and-swaps run before any fold
        // can reject the batch.
        if let Some(write) = &batch.order {
            let order = &write.order;
            let store_id = order
                .store_id()
                .ok_or_else(|| StoreError::Backend("order without store".to_string()))?;
            let data = to_json(order)?;
            versioned_write(
                &mut tx,
                "orders",
                "order_id",
                *order.id_typed().as_uuid(),
                *store_id.as_uuid(),
                order.version(),
                write.expected,
                data,
            )
            .await?;
        }

        for (id, status) in &batch.close_reservations {
            let updated = sqlx::query(
                "UPDATE reservations SET status = $2 WHERE reservation_id = $1 AND status = 'active'",
            )
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("close_reservation", e))?;
            if updated.rows_affected() != 1 {
                return Err(StoreError::Concurrency(format!(
                    "reservation {id} is no longer active"
                )));
            }
        }

        if let Some(write) = &batch.sale {
            let record = &write.record;
            versioned_write(
                &mut tx,
                "sales",
                "transaction_id",
                *record.transaction_id.as_uuid(),
                *record.store_id.as_uuid(),
                record.version,
                write.expected,
                to_json(record)?,
            )
            .await?;
        }

        let at = Utc::now();
        let mut movements = Vec::with_capacity(batch.movements.len());
        for mut movement in batch.movements {
            let key = StockKey::new(movement.store_id, movement.product_id);
            let (row, _) = staged
                .iter_mut()
                .find(|(s, _)| s.key() == key)
                .ok_or_else(|| {
                    StoreError::Backend(format!(
                        "movement {} touches {key} without an expected version",
                        movement.id
                    ))
                })?;
            movement.timestamp = at;
            *row = row.apply(&movement).map_err(StoreError::Rejected)?;
            movement.sequence = insert_movement(&mut tx, &movement).await?;
            movements.push(movement);
        }

        for (state, expected) in &staged {
            if state.version == *expected {
                continue;
            }
            let updated = sqlx::query(
                r#"
                UPDATE inventory_state SET
                    current_stock = $3,
                    reserved_stock = $4,
                    unit_cost = $5,
                    last_movement_id = $6,
                    updated_at = $7,
                    version = $8
                WHERE store_id = $1 AND product_id = $2 AND version = $9
                "#,
            )
            .bind(state.store_id.as_uuid())
            .bind(state.product_id.as_uuid())
            .bind(state.current_stock)
            .bind(state.reserved_stock)
            .bind(state.unit_cost)
            .bind(state.last_movement_id.map(|id| *id.as_uuid()))
            .bind(state.updated_at)
            .bind(state.version as i64)
            .bind(*expected as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_row", e))?;
            if updated.rows_affected() != 1 {
                return Err(StoreError::Concurrency(format!(
                    "row {} changed during commit",
                    state.key()
                )));
            }
        }

        for r in &batch.open_reservations {
            sqlx::query(&format!(
                "INSERT INTO reservations ({RESERVATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(r.id.as_uuid())
            .bind(r.store_id.as_uuid())
            .bind(r.order_id.as_uuid())
            .bind(r.product_id.as_uuid())
            .bind(r.quantity)
            .bind(r.created_at)
            .bind(r.expires_at)
            .bind(r.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        }

        if let Some(ret) = &batch.return_transaction {
            sqlx::query(
                "INSERT INTO returns (return_id, store_id, original_transaction_id, created_at, data) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(ret.id.as_uuid())
            .bind(ret.store_id.as_uuid())
            .bind(ret.original_transaction_id.as_uuid())
            .bind(ret.created_at)
            .bind(to_json(ret)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_return", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Committed {
            movements,
            states: staged.into_iter().map(|(s, _)| s).collect(),
        })
    }

    async fn fetch_states(
        &self,
        filter: &'static str,
        store_id: StoreId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<InventoryState>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM inventory_state WHERE {filter} ORDER BY name, product_id"
        ))
        .bind(store_id.as_uuid())
        .bind(product_id.map(|p| *p.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_states", e))?;
        rows.iter().map(state_from_row).collect()
    }

    async fn fetch_movements(
        &self,
        sql: String,
        store_id: StoreId,
        product_id: Option<ProductId>,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(&sql)
            .bind(store_id.as_uuid())
            .bind(product_id.map(|p| *p.as_uuid()))
            .bind(after_sequence)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_movements", e))?;
        rows.iter().map(movement_from_row).collect()
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        sql: &'static str,
        store_id: StoreId,
        id: uuid::Uuid,
    ) -> Result<Vec<T>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(store_id.as_uuid())
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_json", e))?;
        rows.iter()
            .map(|row| {
                let data: serde_json::Value = row
                    .try_get("data")
                    .map_err(|e| map_sqlx_error("decode_data", e))?;
                serde_json::from_value(data)
                    .map_err(|e| StoreError::Backend(format!("corrupt stored document: {e}")))
            })
            .collect()
    }

    async fn fetch_reservations(
        &self,
        sql: String,
        bind_a: uuid::Uuid,
        bind_b: Option<uuid::Uuid>,
        now: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(&sql)
            .bind(bind_a)
            .bind(bind_b)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_reservations", e))?;
        rows.iter().map(reservation_from_row).collect()
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn upsert_settings(
        &self,
        settings: ProductSettings,
        at: DateTime<Utc>,
    ) -> Result<InventoryState, StoreError> {
        settings.validate().map_err(StoreError::Rejected)?;
        self.run("upsert_settings", self.upsert_settings_async(settings, at))
    }

    fn state(&self, key: StockKey) -> Result<Option<InventoryState>, StoreError> {
        let states = self.run(
            "state",
            self.fetch_states(
                "store_id = $1 AND product_id = $2",
                key.store_id,
                Some(key.product_id),
            ),
        )?;
        Ok(states.into_iter().next())
    }

    fn states(&self, store_id: StoreId) -> Result<Vec<InventoryState>, StoreError> {
        self.run(
            "states",
            self.fetch_states("store_id = $1 AND $2::uuid IS NULL", store_id, None),
        )
    }

    fn commit(&self, batch: CommitBatch) -> Result<Committed, StoreError> {
        if batch.is_empty() {
            return Ok(Committed::default());
        }
        self.run("commit", self.commit_async(batch))
    }

    fn movements_after(
        &self,
        key: StockKey,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE store_id = $1 AND product_id = $2 AND sequence > $3 \
             ORDER BY sequence ASC LIMIT $4"
        );
        self.run(
            "movements_after",
            self.fetch_movements(
                sql,
                key.store_id,
                Some(key.product_id),
                after_sequence as i64,
                limit as i64,
            ),
        )
    }

    fn recent_movements(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE store_id = $1 AND $2::uuid IS NULL AND sequence > $3 \
             ORDER BY sequence DESC LIMIT $4"
        );
        self.run(
            "recent_movements",
            self.fetch_movements(sql, store_id, None, 0, limit as i64),
        )
    }

    fn order(&self, store_id: StoreId, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let orders: Vec<Order> = self.run(
            "order",
            self.fetch_json(
                "SELECT data FROM orders WHERE store_id = $1 AND order_id = $2",
                store_id,
                *order_id.as_uuid(),
            ),
        )?;
        Ok(orders.into_iter().next())
    }

    fn reservations_for_order(
        &self,
        store_id: StoreId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE store_id = $1 AND order_id = $2 AND $3::timestamptz IS NULL \
             ORDER BY created_at, reservation_id LIMIT $4"
        );
        self.run(
            "reservations_for_order",
            self.fetch_reservations(
                sql,
                *store_id.as_uuid(),
                Some(*order_id.as_uuid()),
                None,
                i64::MAX,
            ),
        )
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE $1::uuid IS NOT NULL AND $2::uuid IS NULL \
               AND status = 'active' AND expires_at <= $3 \
             ORDER BY expires_at LIMIT $4"
        );
        self.run(
            "expired_reservations",
            self.fetch_reservations(sql, uuid::Uuid::nil(), None, Some(now), limit as i64),
        )
    }

    fn sale(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Option<SaleRecord>, StoreError> {
        let sales: Vec<SaleRecord> = self.run(
            "sale",
            self.fetch_json(
                "SELECT data FROM sales WHERE store_id = $1 AND transaction_id = $2",
                store_id,
                *transaction_id.as_uuid(),
            ),
        )?;
        Ok(sales.into_iter().next())
    }

    fn returns_for(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
    ) -> Result<Vec<ReturnTransaction>, StoreError> {
        self.run(
            "returns_for",
            self.fetch_json(
                "SELECT data FROM returns WHERE store_id = $1 AND original_transaction_id = $2 \
                 ORDER BY created_at",
                store_id,
                *transaction_id.as_uuid(),
            ),
        )
    }
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    m: &StockMovement,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO stock_movements (
            movement_id, store_id, product_id, occurred_at, movement_type,
            quantity_delta, reason, reference, actor_id, unit_cost
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING sequence
        "#,
    )
    .bind(m.id.as_uuid())
    .bind(m.store_id.as_uuid())
    .bind(m.product_id.as_uuid())
    .bind(m.timestamp)
    .bind(m.movement_type.as_str())
    .bind(m.quantity_delta)
    .bind(&m.reason)
    .bind(to_json(&m.reference)?)
    .bind(m.actor_id.as_uuid())
    .bind(m.unit_cost)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;

    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(sequence as u64)
}

/// Insert-or-update a JSON document row guarded by `expected`.
#[allow(clippy::too_many_arguments)]
async fn versioned_write(
    tx: &mut Transaction<'_, Postgres>,
    table: &'static str,
    id_column: &'static str,
    id: uuid::Uuid,
    store_id: uuid::Uuid,
    version: u64,
    expected: ExpectedVersion,
    data: serde_json::Value,
) -> Result<(), StoreError> {
    let sql = match expected {
        ExpectedVersion::NoRow => format!(
            "INSERT INTO {table} ({id_column}, store_id, version, data) VALUES ($1, $2, $3, $4) \
             ON CONFLICT ({id_column}) DO NOTHING"
        ),
        ExpectedVersion::Exact(_) => format!(
            "UPDATE {table} SET version = $3, data = $4 \
             WHERE {id_column} = $1 AND store_id = $2 AND version = $5"
        ),
        ExpectedVersion::Any => format!(
            "INSERT INTO {table} ({id_column}, store_id, version, data) VALUES ($1, $2, $3, $4) \
             ON CONFLICT ({id_column}) DO UPDATE SET version = EXCLUDED.version, data = EXCLUDED.data"
        ),
    };

    let mut query = sqlx::query(&sql)
        .bind(id)
        .bind(store_id)
        .bind(version as i64)
        .bind(data);
    if let ExpectedVersion::Exact(v) = expected {
        query = query.bind(v as i64);
    }
    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("versioned_write", e))?;

    if result.rows_affected() != 1 {
        return Err(StoreError::Concurrency(format!(
            "{table} row {id} did not match {expected:?}"
        )));
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(format!("serialization failed: {e}")))
}

fn decode<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| map_sqlx_error("decode", e))
}

fn state_from_row(row: &PgRow) -> Result<InventoryState, StoreError> {
    let last_movement_id: Option<uuid::Uuid> = decode(row, "last_movement_id")?;
    let version: i64 = decode(row, "version")?;
    Ok(InventoryState {
        store_id: StoreId::from_uuid(decode(row, "store_id")?),
        product_id: ProductId::from_uuid(decode(row, "product_id")?),
        name: decode(row, "name")?,
        sku: decode(row, "sku")?,
        current_stock: decode::<Decimal>(row, "current_stock")?,
        reserved_stock: decode::<Decimal>(row, "reserved_stock")?,
        reorder_point: decode::<Decimal>(row, "reorder_point")?,
        unit_cost: decode::<Decimal>(row, "unit_cost")?,
        allow_backorder: decode(row, "allow_backorder")?,
        last_movement_id: last_movement_id.map(MovementId::from_uuid),
        updated_at: decode(row, "updated_at")?,
        version: version as u64,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let sequence: i64 = decode(row, "sequence")?;
    let movement_type: String = decode(row, "movement_type")?;
    let reference: serde_json::Value = decode(row, "reference")?;
    Ok(StockMovement {
        id: MovementId::from_uuid(decode(row, "movement_id")?),
        store_id: StoreId::from_uuid(decode(row, "store_id")?),
        product_id: ProductId::from_uuid(decode(row, "product_id")?),
        sequence: sequence as u64,
        timestamp: decode(row, "occurred_at")?,
        movement_type: movement_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("corrupt movement row: {e}")))?,
        quantity_delta: decode(row, "quantity_delta")?,
        reason: decode(row, "reason")?,
        reference: serde_json::from_value(reference)
            .map_err(|e| StoreError::Backend(format!("corrupt movement reference: {e}")))?,
        actor_id: ActorId::from_uuid(decode(row, "actor_id")?),
        unit_cost: decode(row, "unit_cost")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let status: String = decode(row, "status")?;
    let status: ReservationStatus = serde_json::from_value(serde_json::Value::String(status))
        .map_err(|e| StoreError::Backend(format!("corrupt reservation status: {e}")))?;
    Ok(Reservation {
        id: ReservationId::from_uuid(decode(row, "reservation_id")?),
        store_id: StoreId::from_uuid(decode(row, "store_id")?),
        order_id: OrderId::from_uuid(decode(row, "order_id")?),
        product_id: ProductId::from_uuid(decode(row, "product_id")?),
        quantity: decode(row, "quantity")?,
        created_at: decode(row, "created_at")?,
        expires_at: decode(row, "expires_at")?,
        status,
    })
}

/// Row locks are taken in key order, so batches over the same rows queue on
/// each other instead of deadlocking.
fn lock_order(rows: &[(StockKey, u64)]) -> Vec<(StockKey, u64)> {
    let mut rows = rows.to_vec();
    rows.sort_by_key(|(key, _)| *key);
    rows
}

fn classify_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        // unique_violation, serialization_failure, deadlock_detected
        Some("23505" | "40001" | "40P01") => StoreError::Concurrency(msg),
        _ => StoreError::Backend(msg),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            classify_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
