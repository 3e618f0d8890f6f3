//! Postgres-backed stock store.
//!
//! Schema lives in `migrations/`. Concurrency relies on row locks: every
//! mutation in a [`StockTx`] first loads its row with `SELECT ... FOR UPDATE`,
//! so two transactions touching the same `(product, warehouse, lot)` serialize
//! while transactions on different records proceed in parallel. Lazy creation
//! of a record uses `INSERT ... ON CONFLICT DO NOTHING` followed by the locking
//! select, which is race-free under concurrent first receipts.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation) | `23514` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (lock timeout / serialization) | `55P03`, `40001`, `40P01` | `Backend` |
//! | RowNotFound | N/A | `NotFound` |
//! | Decode / ColumnDecode | N/A | `Serialization` |
//! | Other | N/A | `Backend` |
//!
//! ## Runtime bridging
//!
//! The storage traits are synchronous. This store keeps a tokio runtime
//! [`Handle`] and blocks on it, so it must be called from a thread that is not
//! itself driving that runtime (a plain thread or `spawn_blocking`).

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use uuid::Uuid;

use stockledger_accounting::{Payable, PayableId, PayableStatus};
use stockledger_core::{ActorId, AggregateId, AggregateRoot, ExpectedVersion};
use stockledger_inventory::{
    Lot, MovementEntry, MovementKind, MovementReference, NewMovement, ProductId, StockKey,
    StockRecord, StockRecordId, Warehouse, WarehouseId,
};
use stockledger_purchasing::PurchaseId;
use stockledger_sales::{QuoteId, QuoteReservation, ReservationStatus};

use super::r#trait::{StockStore, StockTx, StoreError};
use crate::config::DatabaseConfig;

const RECORD_COLUMNS: &str = "id, product_id, warehouse_id, lot, quantity, reserved, \
     expiration_date, created_at, updated_at, version";

const MOVEMENT_COLUMNS: &str = "id, stock_record_id, kind, delta, quantity_before, \
     quantity_after, reserved_before, reserved_after, document_id, document_number, \
     actor_id, recorded_at";

const PAYABLE_COLUMNS: &str = "id, purchase_id, original_amount, remaining_balance, due_date, \
     status, created_at, version";

const RESERVATION_COLUMNS: &str = "quote_id, line_no, stock_record_id, product_id, \
     warehouse_id, lot, quantity, status, reserved_at, expires_at, closed_at";

/// Postgres stock store. Cheap to clone (the pool is reference counted).
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Open a pool sized from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }
}

impl StockStore for PostgresStockStore {
    #[instrument(skip(self), err)]
    fn begin(&self) -> Result<Box<dyn StockTx + '_>, StoreError> {
        let tx = self
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresTx {
            tx,
            handle: self.handle.clone(),
        }))
    }

    fn record(&self, key: &StockKey) -> Result<Option<StockRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records \
             WHERE product_id = $1 AND warehouse_id = $2 AND lot = $3"
        );
        let row = self
            .block_on(
                sqlx::query(&sql)
                    .bind(uuid(key.product_id.0))
                    .bind(uuid(key.warehouse_id.0))
                    .bind(key.lot.as_str())
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("record", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    fn record_by_id(&self, id: StockRecordId) -> Result<Option<StockRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM stock_records WHERE id = $1");
        let row = self
            .block_on(sqlx::query(&sql).bind(uuid(id.0)).fetch_optional(&self.pool))
            .map_err(|e| map_sqlx_error("record_by_id", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    fn records_for_product(&self, product_id: ProductId) -> Result<Vec<StockRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records WHERE product_id = $1 ORDER BY created_at, id"
        );
        let rows = self
            .block_on(
                sqlx::query(&sql)
                    .bind(uuid(product_id.0))
                    .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("records_for_product", e))?;
        rows.iter().map(record_from_row).collect()
    }

    fn all_records(&self) -> Result<Vec<StockRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM stock_records ORDER BY created_at, id");
        let rows = self
            .block_on(sqlx::query(&sql).fetch_all(&self.pool))
            .map_err(|e| map_sqlx_error("all_records", e))?;
        rows.iter().map(record_from_row).collect()
    }

    fn movements(&self, stock_record_id: StockRecordId) -> Result<Vec<MovementEntry>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE stock_record_id = $1 ORDER BY id ASC"
        );
        let rows = self
            .block_on(
                sqlx::query(&sql)
                    .bind(uuid(stock_record_id.0))
                    .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("movements", e))?;
        rows.iter().map(movement_from_row).collect()
    }

    fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        let rows = self
            .block_on(
                sqlx::query("SELECT id, name, active FROM warehouses ORDER BY seq ASC")
                    .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("warehouses", e))?;
        rows.iter()
            .map(|row| {
                Ok(Warehouse {
                    id: WarehouseId::new(AggregateId::from_uuid(get(row, "id")?)),
                    name: get(row, "name")?,
                    active: get(row, "active")?,
                })
            })
            .collect()
    }

    fn register_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        self.block_on(
            sqlx::query("INSERT INTO warehouses (id, name, active) VALUES ($1, $2, $3)")
                .bind(uuid(warehouse.id.0))
                .bind(&warehouse.name)
                .bind(warehouse.active)
                .execute(&self.pool),
        )
        .map_err(|e| map_sqlx_error("register_warehouse", e))?;
        Ok(())
    }

    fn payable_for_purchase(&self, purchase_id: PurchaseId) -> Result<Option<Payable>, StoreError> {
        let sql = format!("SELECT {PAYABLE_COLUMNS} FROM payables WHERE purchase_id = $1");
        let row = self
            .block_on(
                sqlx::query(&sql)
                    .bind(uuid(purchase_id.0))
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("payable_for_purchase", e))?;
        row.as_ref().map(payable_from_row).transpose()
    }

    fn payables(&self) -> Result<Vec<Payable>, StoreError> {
        let sql = format!("SELECT {PAYABLE_COLUMNS} FROM payables ORDER BY due_date, created_at");
        let rows = self
            .block_on(sqlx::query(&sql).fetch_all(&self.pool))
            .map_err(|e| map_sqlx_error("payables", e))?;
        rows.iter().map(payable_from_row).collect()
    }

    fn reservations_for_quote(&self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM quote_reservations WHERE quote_id = $1 \
             ORDER BY line_no, stock_record_id"
        );
        let rows = self
            .block_on(sqlx::query(&sql).bind(uuid(quote_id.0)).fetch_all(&self.pool))
            .map_err(|e| map_sqlx_error("reservations_for_quote", e))?;
        rows.iter().map(reservation_from_row).collect()
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
    handle: Handle,
}

impl StockTx for PostgresTx {
    fn lock_record(&mut self, key: &StockKey) -> Result<Option<StockRecord>, StoreError> {
        let Self { tx, handle } = self;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records \
             WHERE product_id = $1 AND warehouse_id = $2 AND lot = $3 FOR UPDATE"
        );
        let row = handle
            .block_on(
                sqlx::query(&sql)
                    .bind(uuid(key.product_id.0))
                    .bind(uuid(key.warehouse_id.0))
                    .bind(key.lot.as_str())
                    .fetch_optional(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("lock_record", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    fn lock_or_create_record(
        &mut self,
        key: &StockKey,
        at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        {
            let Self { tx, handle } = &mut *self;
            let inserted = handle
                .block_on(
                    sqlx::query(
                        "INSERT INTO stock_records \
                         (id, product_id, warehouse_id, lot, quantity, reserved, expiration_date, created_at, updated_at, version) \
                         VALUES ($1, $2, $3, $4, 0, 0, NULL, $5, $5, 0) \
                         ON CONFLICT (product_id, warehouse_id, lot) DO NOTHING",
                    )
                    .bind(Uuid::now_v7())
                    .bind(uuid(key.product_id.0))
                    .bind(uuid(key.warehouse_id.0))
                    .bind(key.lot.as_str())
                    .bind(at)
                    .execute(&mut **tx),
                )
                .map_err(|e| map_sqlx_error("create_record", e))?;
            if inserted.rows_affected() == 1 {
                debug!(key = %key, "created stock record");
            }
        }

        self.lock_record(key)?
            .ok_or_else(|| StoreError::NotFound(format!("stock record {key}")))
    }

    fn save_record(
        &mut self,
        record: &StockRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        let result = handle
            .block_on(
                sqlx::query(
                    "UPDATE stock_records \
                     SET quantity = $2, reserved = $3, expiration_date = $4, updated_at = $5, version = $6 \
                     WHERE id = $1 AND ($7::BIGINT IS NULL OR version = $7)",
                )
                .bind(uuid(record.record_id().0))
                .bind(record.quantity())
                .bind(record.reserved())
                .bind(record.expiration_date())
                .bind(record.updated_at())
                .bind(record.version() as i64)
                .bind(expected_version(expected))
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("save_record", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "stock record {} not at {expected:?}",
                record.key()
            )));
        }
        Ok(())
    }

    fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry, StoreError> {
        let Self { tx, handle } = self;
        let row = handle
            .block_on(
                sqlx::query(
                    "INSERT INTO stock_movements \
                     (stock_record_id, kind, delta, quantity_before, quantity_after, reserved_before, \
                      reserved_after, document_id, document_number, actor_id, recorded_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
                )
                .bind(uuid(movement.stock_record_id.0))
                .bind(movement.kind.as_str())
                .bind(movement.delta)
                .bind(movement.quantity_before)
                .bind(movement.quantity_after)
                .bind(movement.reserved_before)
                .bind(movement.reserved_after)
                .bind(movement.reference.document_id.map(uuid))
                .bind(&movement.reference.document_number)
                .bind(Uuid::from(movement.actor))
                .bind(movement.recorded_at)
                .fetch_one(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("append_movement", e))?;

        let id: i64 = get(&row, "id")?;
        Ok(movement.into_entry(id))
    }

    fn claim_receipt(
        &mut self,
        purchase_id: PurchaseId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Self { tx, handle } = self;
        let result = handle
            .block_on(
                sqlx::query(
                    "INSERT INTO purchase_receipts (purchase_id, received_at) VALUES ($1, $2) \
                     ON CONFLICT (purchase_id) DO NOTHING",
                )
                .bind(uuid(purchase_id.0))
                .bind(at)
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("claim_receipt", e))?;
        Ok(result.rows_affected() == 1)
    }

    fn lock_payable(&mut self, purchase_id: PurchaseId) -> Result<Option<Payable>, StoreError> {
        let Self { tx, handle } = self;
        let sql = format!("SELECT {PAYABLE_COLUMNS} FROM payables WHERE purchase_id = $1 FOR UPDATE");
        let row = handle
            .block_on(
                sqlx::query(&sql)
                    .bind(uuid(purchase_id.0))
                    .fetch_optional(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("lock_payable", e))?;
        row.as_ref().map(payable_from_row).transpose()
    }

    fn insert_payable(&mut self, payable: &Payable) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        handle
            .block_on(
                sqlx::query(
                    "INSERT INTO payables \
                     (id, purchase_id, original_amount, remaining_balance, due_date, status, created_at, version) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(uuid(payable.payable_id().0))
                .bind(uuid(payable.purchase_id().0))
                .bind(payable.original_amount())
                .bind(payable.remaining_balance())
                .bind(payable.due_date())
                .bind(payable.status().as_str())
                .bind(payable.created_at())
                .bind(payable.version() as i64)
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("insert_payable", e))?;
        Ok(())
    }

    fn save_payable(
        &mut self,
        payable: &Payable,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        let result = handle
            .block_on(
                sqlx::query(
                    "UPDATE payables SET remaining_balance = $2, status = $3, version = $4 \
                     WHERE id = $1 AND ($5::BIGINT IS NULL OR version = $5)",
                )
                .bind(uuid(payable.payable_id().0))
                .bind(payable.remaining_balance())
                .bind(payable.status().as_str())
                .bind(payable.version() as i64)
                .bind(expected_version(expected))
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("save_payable", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "payable {} not at {expected:?}",
                payable.payable_id()
            )));
        }
        Ok(())
    }

    fn claim_quote(&mut self, quote_id: QuoteId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let Self { tx, handle } = self;
        let result = handle
            .block_on(
                sqlx::query(
                    "INSERT INTO quote_reservation_claims (quote_id, claimed_at) VALUES ($1, $2) \
                     ON CONFLICT (quote_id) DO NOTHING",
                )
                .bind(uuid(quote_id.0))
                .bind(at)
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("claim_quote", e))?;
        Ok(result.rows_affected() == 1)
    }

    fn release_quote_claim(&mut self, quote_id: QuoteId) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        handle
            .block_on(
                sqlx::query("DELETE FROM quote_reservation_claims WHERE quote_id = $1")
                    .bind(uuid(quote_id.0))
                    .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("release_quote_claim", e))?;
        Ok(())
    }

    fn lock_reservations(&mut self, quote_id: QuoteId) -> Result<Vec<QuoteReservation>, StoreError> {
        let Self { tx, handle } = self;
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM quote_reservations \
             WHERE quote_id = $1 ORDER BY line_no, stock_record_id FOR UPDATE"
        );
        let rows = handle
            .block_on(sqlx::query(&sql).bind(uuid(quote_id.0)).fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error("lock_reservations", e))?;
        rows.iter().map(reservation_from_row).collect()
    }

    fn insert_reservation(&mut self, reservation: &QuoteReservation) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        handle
            .block_on(
                sqlx::query(
                    "INSERT INTO quote_reservations \
                     (quote_id, line_no, stock_record_id, product_id, warehouse_id, lot, quantity, \
                      status, reserved_at, expires_at, closed_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                )
                .bind(uuid(reservation.quote_id.0))
                .bind(reservation.line_no as i32)
                .bind(uuid(reservation.stock_record_id.0))
                .bind(uuid(reservation.key.product_id.0))
                .bind(uuid(reservation.key.warehouse_id.0))
                .bind(reservation.key.lot.as_str())
                .bind(reservation.quantity)
                .bind(reservation.status.as_str())
                .bind(reservation.reserved_at)
                .bind(reservation.expires_at)
                .bind(reservation.closed_at)
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        Ok(())
    }

    fn save_reservation(&mut self, reservation: &QuoteReservation) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        let result = handle
            .block_on(
                sqlx::query(
                    "UPDATE quote_reservations SET status = $4, expires_at = $5, closed_at = $6 \
                     WHERE quote_id = $1 AND line_no = $2 AND stock_record_id = $3",
                )
                .bind(uuid(reservation.quote_id.0))
                .bind(reservation.line_no as i32)
                .bind(uuid(reservation.stock_record_id.0))
                .bind(reservation.status.as_str())
                .bind(reservation.expires_at)
                .bind(reservation.closed_at)
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("save_reservation", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "reservation of quote {} line {} on stock record {}",
                reservation.quote_id, reservation.line_no, reservation.stock_record_id
            )));
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTx { tx, handle } = *self;
        handle
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit", e))
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTx { tx, handle } = *self;
        handle
            .block_on(tx.rollback())
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn uuid(id: AggregateId) -> Uuid {
    id.into()
}

fn expected_version(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("column {column}: {e}")))
}

fn aggregate_id(row: &PgRow, column: &str) -> Result<AggregateId, StoreError> {
    Ok(AggregateId::from_uuid(get(row, column)?))
}

fn record_from_row(row: &PgRow) -> Result<StockRecord, StoreError> {
    let key = StockKey::new(
        ProductId::new(aggregate_id(row, "product_id")?),
        WarehouseId::new(aggregate_id(row, "warehouse_id")?),
        Lot::new(get::<String>(row, "lot")?),
    );
    let version: i64 = get(row, "version")?;

    StockRecord::restore(
        StockRecordId::new(aggregate_id(row, "id")?),
        key,
        get(row, "quantity")?,
        get(row, "reserved")?,
        get::<Option<NaiveDate>>(row, "expiration_date")?,
        get(row, "created_at")?,
        get(row, "updated_at")?,
        version as u64,
    )
    .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn movement_from_row(row: &PgRow) -> Result<MovementEntry, StoreError> {
    let kind: String = get(row, "kind")?;
    let document_id: Option<Uuid> = get(row, "document_id")?;
    let actor: Uuid = get(row, "actor_id")?;

    Ok(MovementEntry {
        id: get(row, "id")?,
        stock_record_id: StockRecordId::new(aggregate_id(row, "stock_record_id")?),
        kind: MovementKind::parse(&kind).map_err(|e| StoreError::Serialization(e.to_string()))?,
        delta: get(row, "delta")?,
        quantity_before: get(row, "quantity_before")?,
        quantity_after: get(row, "quantity_after")?,
        reserved_before: get(row, "reserved_before")?,
        reserved_after: get(row, "reserved_after")?,
        reference: MovementReference {
            document_id: document_id.map(AggregateId::from_uuid),
            document_number: get(row, "document_number")?,
        },
        actor: ActorId::from_uuid(actor),
        recorded_at: get(row, "recorded_at")?,
    })
}

fn payable_from_row(row: &PgRow) -> Result<Payable, StoreError> {
    let status: String = get(row, "status")?;
    let version: i64 = get(row, "version")?;

    Ok(Payable::restore(
        PayableId::new(aggregate_id(row, "id")?),
        PurchaseId::new(aggregate_id(row, "purchase_id")?),
        get(row, "original_amount")?,
        get(row, "remaining_balance")?,
        get(row, "due_date")?,
        PayableStatus::parse(&status).map_err(|e| StoreError::Serialization(e.to_string()))?,
        get(row, "created_at")?,
        version as u64,
    ))
}

fn reservation_from_row(row: &PgRow) -> Result<QuoteReservation, StoreError> {
    let status: String = get(row, "status")?;
    let line_no: i32 = get(row, "line_no")?;

    Ok(QuoteReservation {
        quote_id: QuoteId::new(aggregate_id(row, "quote_id")?),
        line_no: line_no as u32,
        stock_record_id: StockRecordId::new(aggregate_id(row, "stock_record_id")?),
        key: StockKey::new(
            ProductId::new(aggregate_id(row, "product_id")?),
            WarehouseId::new(aggregate_id(row, "warehouse_id")?),
            Lot::new(get::<String>(row, "lot")?),
        ),
        quantity: get(row, "quantity")?,
        status: ReservationStatus::parse(&status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        reserved_at: get(row, "reserved_at")?,
        expires_at: get(row, "expires_at")?,
        closed_at: get(row, "closed_at")?,
    })
}

/// Map SQLx errors to `StoreError` (see the module-level table).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode failure in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
