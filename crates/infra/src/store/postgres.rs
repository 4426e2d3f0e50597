//! Postgres-backed inventory store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError | Scenario |
//! |------------|-----------------|------------|----------|
//! | Database (unique violation) on reservation insert | `23505` | `DuplicateOrder` | Concurrent delivery of the same order |
//! | Database (unique violation) elsewhere | `23505` | `Conflict` | Concurrent writer |
//! | Database (check violation) | `23514` | `Conflict` | Counts would go negative under a concurrent writer |
//! | Database (other) / PoolClosed / other | any | `Backend` | Connectivity, schema, etc. |
//!
//! Stock rows carry a `version` column; every write is conditioned on the
//! version the row was loaded at, so two transactions cannot both apply a
//! reservation computed from the same snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{Span, instrument};

use stockhold_core::{AggregateRoot, MessageId, OrderId, ReservationId, Sku, UserId};
use stockhold_inventory::{ReservationLine, ReservationStatus, StockItem, StockReservation};

use super::r#trait::{
    InventoryStore, OutboxStats, OutboxStore, ReservationStore, StockChanges, StockStore,
    StoreError,
};
use crate::outbox::OutboxRecord;

/// Postgres-backed implementation of every storage port.
///
/// Uses the SQLx connection pool (thread-safe). `commit` runs in one
/// transaction.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the bundled schema (idempotent).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("../../migrations/0001_inventory.sql"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StockStore for PostgresInventoryStore {
    #[instrument(skip(self, skus), fields(sku_count = skus.len(), found = tracing::field::Empty), err)]
    async fn get_by_skus(&self, skus: &[Sku]) -> Result<HashMap<Sku, StockItem>, StoreError> {
        if skus.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = skus.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query(
            r#"
            SELECT sku, available, reserved, version, updated_at
            FROM inventory_stock_items
            WHERE sku = ANY($1)
            "#,
        )
        .bind(keys)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_by_skus", e))?;

        let mut items = HashMap::with_capacity(rows.len());
        for row in rows {
            let item = StockItemRow::from_row(&row)
                .map_err(|e| StoreError::backend(format!("failed to read stock row: {e}")))?
                .into_item()?;
            items.insert(item.sku().clone(), item);
        }

        Span::current().record("found", items.len());
        Ok(items)
    }

    #[instrument(skip(self, items), fields(item_count = items.len()), err)]
    async fn upsert_many(&self, items: &[StockItem]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        upsert_items(&mut tx, items).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait::async_trait]
impl ReservationStore for PostgresInventoryStore {
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn get_by_order_id(
        &self,
        order_id: OrderId,
    ) -> Result<Option<StockReservation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, user_id, status, reserved_at, released_at
            FROM inventory_reservations
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_reservation", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let header = ReservationRow::from_row(&row)
            .map_err(|e| StoreError::backend(format!("failed to read reservation row: {e}")))?;

        let line_rows = sqlx::query(
            r#"
            SELECT sku, quantity
            FROM inventory_reservation_lines
            WHERE reservation_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(header.id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_reservation_lines", e))?;

        let mut lines = Vec::with_capacity(line_rows.len());
        for row in line_rows {
            let sku: String = row
                .try_get("sku")
                .map_err(|e| StoreError::backend(format!("failed to read line sku: {e}")))?;
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| StoreError::backend(format!("failed to read line quantity: {e}")))?;
            let sku = Sku::parse(sku).map_err(|e| StoreError::Serialization(e.to_string()))?;
            lines.push(
                ReservationLine::new(sku, quantity)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            );
        }

        header.into_reservation(lines).map(Some)
    }

    #[instrument(skip(self, reservation), fields(order_id = %reservation.order_id()), err)]
    async fn insert(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_reservation(&mut tx, reservation).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, reservation), fields(order_id = %reservation.order_id()), err)]
    async fn update(&self, reservation: &StockReservation) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        update_reservation(&mut conn, reservation).await
    }
}

#[async_trait::async_trait]
impl OutboxStore for PostgresInventoryStore {
    #[instrument(skip(self, record), fields(message_id = %record.id, event_type = %record.event_type), err)]
    async fn enqueue(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_outbox(&mut conn, record).await
    }

    #[instrument(skip(self), err)]
    async fn get_pending_batch(
        &self,
        max_retry: u32,
        batch_size: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, payload, occurred_at, retry_count, processed_at
            FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count < $1
            ORDER BY occurred_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(retry_limit(max_retry)?)
        .bind(batch_size as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_pending_batch", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self, record), fields(message_id = %record.id, retry_count = record.retry_count), err)]
    async fn save(&self, record: &OutboxRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, type, payload, occurred_at, retry_count, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                retry_count = EXCLUDED.retry_count,
                processed_at = EXCLUDED.processed_at
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.occurred_at)
        .bind(stored_retry_count(record.retry_count))
        .bind(record.processed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_outbox", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_dead_lettered(
        &self,
        max_retry: u32,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, payload, occurred_at, retry_count, processed_at
            FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count >= $1
            ORDER BY occurred_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(retry_limit(max_retry)?)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_dead_lettered", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self, max_retry: u32) -> Result<OutboxStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE processed_at IS NULL AND retry_count < $1) AS pending,
                COUNT(*) FILTER (WHERE processed_at IS NOT NULL) AS processed,
                COUNT(*) FILTER (WHERE processed_at IS NULL AND retry_count >= $1) AS dead_lettered
            FROM outbox_messages
            "#,
        )
        .bind(retry_limit(max_retry)?)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("outbox_stats", e))?;

        let count = |column: &str| -> Result<u64, StoreError> {
            let n: i64 = row
                .try_get(column)
                .map_err(|e| StoreError::backend(format!("failed to read {column}: {e}")))?;
            Ok(n.max(0) as u64)
        };

        Ok(OutboxStats {
            pending: count("pending")?,
            processed: count("processed")?,
            dead_lettered: count("dead_lettered")?,
        })
    }

    #[instrument(skip(self), err)]
    async fn count_dead_lettered(&self, max_retry: u32) -> Result<u64, StoreError> {
        let dead: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count >= $1
            "#,
        )
        .bind(retry_limit(max_retry)?)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_dead_lettered", e))?;
        Ok(dead.max(0) as u64)
    }

    #[instrument(skip(self), fields(message_id = %id), err)]
    async fn requeue(&self, id: MessageId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = 0
            WHERE id = $1 AND processed_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_outbox", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM outbox_messages WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("requeue_outbox", e))?
            .is_some();

        if exists {
            Err(StoreError::conflict(format!(
                "outbox record {id} was already processed"
            )))
        } else {
            Err(StoreError::NotFound(format!("outbox record {id}")))
        }
    }
}

#[async_trait::async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[instrument(
        skip(self, changes),
        fields(
            items = changes.items.len(),
            outbox = changes.outbox.len(),
            new_reservation = changes.new_reservation.is_some(),
            updated_reservation = changes.updated_reservation.is_some()
        ),
        err
    )]
    async fn commit(&self, changes: StockChanges) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Dropping `tx` on any `?` below rolls the transaction back.
        if let Some(reservation) = &changes.new_reservation {
            insert_reservation(&mut tx, reservation).await?;
        }
        upsert_items(&mut tx, &changes.items).await?;
        if let Some(reservation) = &changes.updated_reservation {
            update_reservation(&mut tx, reservation).await?;
        }
        for record in &changes.outbox {
            insert_outbox(&mut tx, record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

async fn upsert_items(conn: &mut PgConnection, items: &[StockItem]) -> Result<(), StoreError> {
    for item in items {
        let result = if item.version() == 0 {
            sqlx::query(
                r#"
                INSERT INTO inventory_stock_items (sku, available, reserved, version, updated_at)
                VALUES ($1, $2, $3, 1, $4)
                ON CONFLICT (sku) DO NOTHING
                "#,
            )
            .bind(item.sku().as_str())
            .bind(item.available())
            .bind(item.reserved())
            .bind(item.updated_at())
            .execute(&mut *conn)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE inventory_stock_items
                SET available = $2, reserved = $3, updated_at = $4, version = version + 1
                WHERE sku = $1 AND version = $5
                "#,
            )
            .bind(item.sku().as_str())
            .bind(item.available())
            .bind(item.reserved())
            .bind(item.updated_at())
            .bind(item.version() as i64)
            .execute(&mut *conn)
            .await
        };
        let result = result.map_err(|e| map_sqlx_error("upsert_stock_item", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::conflict(format!(
                "stock item {} changed since version {}",
                item.sku(),
                item.version()
            )));
        }
    }
    Ok(())
}

async fn insert_reservation(
    conn: &mut PgConnection,
    reservation: &StockReservation,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO inventory_reservations (id, order_id, user_id, status, reserved_at, released_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(reservation.id_typed().as_uuid())
    .bind(reservation.order_id().as_uuid())
    .bind(reservation.user_id().as_uuid())
    .bind(reservation.status().as_str())
    .bind(reservation.reserved_at())
    .bind(reservation.released_at())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::DuplicateOrder(reservation.order_id())
        } else {
            map_sqlx_error("insert_reservation", e)
        }
    })?;

    for (line_no, line) in reservation.lines().iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO inventory_reservation_lines (reservation_id, line_no, sku, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reservation.id_typed().as_uuid())
        .bind(line_no as i32)
        .bind(line.sku().as_str())
        .bind(line.quantity())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_reservation_line", e))?;
    }
    Ok(())
}

async fn update_reservation(
    conn: &mut PgConnection,
    reservation: &StockReservation,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE inventory_reservations
        SET status = $2, released_at = $3
        WHERE order_id = $1
        "#,
    )
    .bind(reservation.order_id().as_uuid())
    .bind(reservation.status().as_str())
    .bind(reservation.released_at())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_reservation", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!(
            "reservation for order {}",
            reservation.order_id()
        )));
    }
    Ok(())
}

async fn insert_outbox(conn: &mut PgConnection, record: &OutboxRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, type, payload, occurred_at, retry_count, processed_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(&record.event_type)
    .bind(&record.payload)
    .bind(record.occurred_at)
    .bind(stored_retry_count(record.retry_count))
    .bind(record.processed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_outbox", e))?;
    Ok(())
}

fn outbox_from_row(row: &sqlx::postgres::PgRow) -> Result<OutboxRecord, StoreError> {
    OutboxRow::from_row(row)
        .map(Into::into)
        .map_err(|e| StoreError::backend(format!("failed to read outbox row: {e}")))
}

/// `retry_count` is an INT column; larger budgets cannot be compared against it.
fn retry_limit(max_retry: u32) -> Result<i32, StoreError> {
    i32::try_from(max_retry).map_err(|_| {
        StoreError::backend(format!("max_retry {max_retry} exceeds the retry_count column range"))
    })
}

fn stored_retry_count(retry_count: u32) -> i32 {
    i32::try_from(retry_count).unwrap_or(i32::MAX)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct StockItemRow {
    sku: String,
    available: i64,
    reserved: i64,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StockItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockItemRow {
            sku: row.try_get("sku")?,
            available: row.try_get("available")?,
            reserved: row.try_get("reserved")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StockItemRow {
    fn into_item(self) -> Result<StockItem, StoreError> {
        let sku = Sku::parse(&self.sku).map_err(|e| StoreError::Serialization(e.to_string()))?;
        StockItem::restore(
            sku,
            self.available,
            self.reserved,
            self.updated_at,
            self.version.max(0) as u64,
        )
        .map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[derive(Debug)]
struct ReservationRow {
    id: uuid::Uuid,
    order_id: uuid::Uuid,
    user_id: uuid::Uuid,
    status: String,
    reserved_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ReservationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReservationRow {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            reserved_at: row.try_get("reserved_at")?,
            released_at: row.try_get("released_at")?,
        })
    }
}

impl ReservationRow {
    fn into_reservation(self, lines: Vec<ReservationLine>) -> Result<StockReservation, StoreError> {
        let status = ReservationStatus::parse(&self.status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StockReservation::restore(
            ReservationId::from_uuid(self.id),
            OrderId::from_uuid(self.order_id),
            UserId::from_uuid(self.user_id),
            status,
            self.reserved_at,
            self.released_at,
            lines,
        ))
    }
}

#[derive(Debug)]
struct OutboxRow {
    id: uuid::Uuid,
    event_type: String,
    payload: String,
    occurred_at: DateTime<Utc>,
    retry_count: i32,
    processed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            event_type: row.try_get("type")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            retry_count: row.try_get("retry_count")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            id: MessageId::from_uuid(row.id),
            event_type: row.event_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            retry_count: row.retry_count.max(0) as u32,
            processed_at: row.processed_at,
        }
    }
}
