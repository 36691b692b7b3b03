//! Postgres-backed receiving store.
//!
//! ## Schema
//!
//! See `migrations/0001_purchase_receiving.sql`:
//! - `purchase_orders` / `purchase_order_items`: order header and lines, with
//!   `0 <= quantity_received <= quantity_ordered` enforced by a CHECK constraint
//! - `inventory_adjustments`: append-only ledger (UPDATE/DELETE rejected by trigger)
//! - `variant_stock`: cached on-hand quantity, `quantity >= 0`
//! - `purchase_order_audit`: per-order audit trail
//!
//! ## Locking
//!
//! Every transaction sets a local `lock_timeout`, so `SELECT ... FOR UPDATE` on a
//! busy order fails with SQLSTATE `55P03` instead of waiting forever.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_core::{AggregateId, AggregateRoot, ExpectedVersion, UserId};
use stockledger_inventory::{
    AdjustmentId, AdjustmentReference, AdjustmentType, InventoryAdjustment, VariantId,
    VariantStock,
};
use stockledger_purchasing::{
    AuditAction, ProductId, PurchaseOrder, PurchaseOrderAuditEntry, PurchaseOrderId,
    PurchaseOrderItem, PurchaseOrderItemId, PurchaseOrderRecord, PurchaseOrderStatus, SupplierId,
};

use super::r#trait::{ReceivingStore, StoreError, UnitOfWork};

/// Postgres-backed receiving store.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresReceivingStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresReceivingStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One Postgres transaction.
///
/// Dropping it without `commit` rolls back (sqlx issues the ROLLBACK when the
/// connection returns to the pool).
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUnitOfWork").finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, order_number, supplier_id, status, total_amount,
                created_by, created_at, received_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*order.id_typed().as_uuid())
        .bind(order.order_number())
        .bind(*order.supplier_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.total_amount())
        .bind(*order.created_by().as_uuid())
        .bind(order.created_at())
        .bind(order.received_at())
        .bind(order.updated_at())
        .bind(version_to_db(order.version())?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        for item in order.items() {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_items (
                    id, purchase_order_id, line_no, product_id, variant_id,
                    quantity_ordered, quantity_received, unit_cost, subtotal
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(*item.id.as_uuid())
            .bind(*order.id_typed().as_uuid())
            .bind(item.line_no as i32)
            .bind(*item.product_id.as_uuid())
            .bind(*item.variant_id.as_uuid())
            .bind(item.quantity_ordered)
            .bind(item.quantity_received)
            .bind(item.unit_cost)
            .bind(item.subtotal)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order_item", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn lock_order(
        &mut self,
        order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        fetch_order(&mut *self.tx, order_id, true).await
    }

    #[instrument(skip(self), fields(order_id = %order_id, item_id = %item_id), err)]
    async fn apply_receipt(
        &mut self,
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE purchase_order_items
            SET quantity_received = quantity_received + $3
            WHERE id = $2
              AND purchase_order_id = $1
              AND $3 > 0
              AND quantity_received + $3 <= quantity_ordered
            RETURNING quantity_received
            "#,
        )
        .bind(*order_id.as_uuid())
        .bind(*item_id.as_uuid())
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("apply_receipt", e))?;

        match row {
            Some(row) => row
                .try_get::<i64, _>("quantity_received")
                .map_err(|e| map_sqlx_error("apply_receipt", e)),
            None => Err(StoreError::Constraint(format!(
                "item {item_id} of order {order_id} cannot receive {delta} more units"
            ))),
        }
    }

    #[instrument(
        skip(self, order),
        fields(order_id = %order.id_typed(), status = %order.status(), expected_version = ?expected_version),
        err
    )]
    async fn update_order_header(
        &mut self,
        order: &PurchaseOrder,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let expected = match expected_version {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)?),
        };

        // received_at is write-once: an existing value always wins.
        let result = sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = $2,
                received_at = COALESCE(received_at, $3),
                updated_at = $4,
                version = $5
            WHERE id = $1
              AND ($6::BIGINT IS NULL OR version = $6)
            "#,
        )
        .bind(*order.id_typed().as_uuid())
        .bind(order.status().as_str())
        .bind(order.received_at())
        .bind(order.updated_at())
        .bind(version_to_db(order.version())?)
        .bind(expected)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_order_header", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM purchase_orders WHERE id = $1")
            .bind(*order.id_typed().as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_order_header", e))?
            .is_some();
        if exists {
            Err(StoreError::Concurrency(format!(
                "order {}: version check failed (expected {expected_version:?})",
                order.id_typed()
            )))
        } else {
            Err(StoreError::NotFound(format!("purchase order {}", order.id_typed())))
        }
    }

    #[instrument(skip(self, entry), fields(order_id = %entry.purchase_order_id, action = entry.action.as_str()), err)]
    async fn append_audit(&mut self, entry: &PurchaseOrderAuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO purchase_order_audit (id, purchase_order_id, action, actor, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(*entry.purchase_order_id.as_uuid())
        .bind(entry.action.as_str())
        .bind(*entry.actor.as_uuid())
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, adjustment),
        fields(variant_id = %adjustment.variant_id, quantity = adjustment.quantity),
        err
    )]
    async fn append_adjustment(&mut self, adjustment: &InventoryAdjustment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_adjustments (
                id, variant_id, adjustment_type, quantity,
                document_id, line_id, operation_id, reason, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*adjustment.id.as_uuid())
        .bind(*adjustment.variant_id.as_uuid())
        .bind(adjustment.adjustment_type.as_str())
        .bind(adjustment.quantity)
        .bind(*adjustment.reference.document_id.as_uuid())
        .bind(adjustment.reference.line_id.map(|l| *l.as_uuid()))
        .bind(adjustment.reference.operation_id)
        .bind(adjustment.reason.as_deref())
        .bind(*adjustment.created_by.as_uuid())
        .bind(adjustment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_adjustment", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    async fn increment_stock(&mut self, variant_id: VariantId, delta: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO variant_stock (variant_id, quantity, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (variant_id) DO UPDATE
            SET quantity = variant_stock.quantity + EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            RETURNING quantity
            "#,
        )
        .bind(*variant_id.as_uuid())
        .bind(delta)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("increment_stock", e))?;

        row.try_get::<i64, _>("quantity")
            .map_err(|e| map_sqlx_error("increment_stock", e))
    }

    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    async fn rebuild_stock(&mut self, variant_id: VariantId) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO variant_stock (variant_id, quantity, updated_at)
            SELECT $1, COALESCE(SUM(quantity), 0)::BIGINT, $2
            FROM inventory_adjustments
            WHERE variant_id = $1
            ON CONFLICT (variant_id) DO UPDATE
            SET quantity = EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            RETURNING quantity
            "#,
        )
        .bind(*variant_id.as_uuid())
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("rebuild_stock", e))?;

        row.try_get::<i64, _>("quantity")
            .map_err(|e| map_sqlx_error("rebuild_stock", e))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl ReceivingStore for PostgresReceivingStore {
    type Tx = PostgresUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(PostgresUnitOfWork { tx })
    }

    async fn next_order_number(&self) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT nextval('purchase_order_number_seq') AS n")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("next_order_number", e))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| map_sqlx_error("next_order_number", e))?;
        Ok(format!("PO-{n}"))
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn load_order(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        fetch_order(&mut *conn, order_id, false).await
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn audit_trail(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<Vec<PurchaseOrderAuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, purchase_order_id, action, actor, details, created_at
            FROM purchase_order_audit
            WHERE purchase_order_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(*order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("audit_trail", e))?;

        rows.iter().map(audit_from_row).collect()
    }

    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    async fn ledger_sum_for_variant(&self, variant_id: VariantId) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT AS total FROM inventory_adjustments WHERE variant_id = $1",
        )
        .bind(*variant_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_sum_for_variant", e))?;
        row.try_get("total")
            .map_err(|e| map_sqlx_error("ledger_sum_for_variant", e))
    }

    async fn ledger_sum_for_line(
        &self,
        document_id: AggregateId,
        line_id: AggregateId,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT AS total
            FROM inventory_adjustments
            WHERE document_id = $1 AND line_id = $2
            "#,
        )
        .bind(*document_id.as_uuid())
        .bind(*line_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_sum_for_line", e))?;
        row.try_get("total")
            .map_err(|e| map_sqlx_error("ledger_sum_for_line", e))
    }

    #[instrument(skip(self), fields(variant_id = %variant_id, row_count), err)]
    async fn adjustments_for_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Vec<InventoryAdjustment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, variant_id, adjustment_type, quantity, document_id, line_id,
                   operation_id, reason, created_by, created_at
            FROM inventory_adjustments
            WHERE variant_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(*variant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("adjustments_for_variant", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(adjustment_from_row).collect()
    }

    async fn variant_stock(&self, variant_id: VariantId) -> Result<Option<VariantStock>, StoreError> {
        let row = sqlx::query("SELECT quantity, updated_at FROM variant_stock WHERE variant_id = $1")
            .bind(*variant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("variant_stock", e))?;

        row.map(|row| {
            Ok(VariantStock {
                variant_id,
                quantity: row.try_get("quantity").map_err(|e| map_sqlx_error("variant_stock", e))?,
                updated_at: row
                    .try_get("updated_at")
                    .map_err(|e| map_sqlx_error("variant_stock", e))?,
            })
        })
        .transpose()
    }

    async fn known_variants(&self) -> Result<Vec<VariantId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT variant_id FROM inventory_adjustments
            UNION
            SELECT variant_id FROM variant_stock
            ORDER BY variant_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("known_variants", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("variant_id")
                    .map(VariantId::from_uuid)
                    .map_err(|e| map_sqlx_error("known_variants", e))
            })
            .collect()
    }
}

/// Load an order header and its items; `lock` takes the header row lock.
async fn fetch_order(
    conn: &mut PgConnection,
    order_id: PurchaseOrderId,
    lock: bool,
) -> Result<Option<PurchaseOrder>, StoreError> {
    let sql = if lock {
        r#"
        SELECT id, order_number, supplier_id, status, total_amount, created_by,
               created_at, received_at, updated_at, version
        FROM purchase_orders
        WHERE id = $1
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT id, order_number, supplier_id, status, total_amount, created_by,
               created_at, received_at, updated_at, version
        FROM purchase_orders
        WHERE id = $1
        "#
    };

    let Some(header) = sqlx::query(sql)
        .bind(*order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_order", e))?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query(
        r#"
        SELECT id, line_no, product_id, variant_id, quantity_ordered,
               quantity_received, unit_cost, subtotal
        FROM purchase_order_items
        WHERE purchase_order_id = $1
        ORDER BY line_no ASC
        "#,
    )
    .bind(*order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_order_items", e))?;

    let items = item_rows
        .iter()
        .map(item_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let record = order_from_row(&header, items)?;

    PurchaseOrder::from_record(record)
        .map(Some)
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn order_from_row(row: &PgRow, items: Vec<PurchaseOrderItem>) -> Result<PurchaseOrderRecord, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_order", e);
    let status: String = row.try_get("status").map_err(get)?;
    let version: i64 = row.try_get("version").map_err(get)?;

    Ok(PurchaseOrderRecord {
        id: PurchaseOrderId::from_uuid(row.try_get("id").map_err(get)?),
        order_number: row.try_get("order_number").map_err(get)?,
        supplier_id: SupplierId::from_uuid(row.try_get("supplier_id").map_err(get)?),
        status: status
            .parse::<PurchaseOrderStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        total_amount: row.try_get("total_amount").map_err(get)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(get)?),
        created_at: row.try_get("created_at").map_err(get)?,
        received_at: row.try_get("received_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
        version: u64::try_from(version)
            .map_err(|_| StoreError::Corrupt(format!("negative order version {version}")))?,
        items,
    })
}

fn item_from_row(row: &PgRow) -> Result<PurchaseOrderItem, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_order_item", e);
    let line_no: i32 = row.try_get("line_no").map_err(get)?;

    Ok(PurchaseOrderItem {
        id: PurchaseOrderItemId::from_uuid(row.try_get("id").map_err(get)?),
        line_no: u32::try_from(line_no)
            .map_err(|_| StoreError::Corrupt(format!("negative line number {line_no}")))?,
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(get)?),
        variant_id: VariantId::from_uuid(row.try_get("variant_id").map_err(get)?),
        quantity_ordered: row.try_get("quantity_ordered").map_err(get)?,
        quantity_received: row.try_get("quantity_received").map_err(get)?,
        unit_cost: row.try_get("unit_cost").map_err(get)?,
        subtotal: row.try_get("subtotal").map_err(get)?,
    })
}

fn adjustment_from_row(row: &PgRow) -> Result<InventoryAdjustment, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_adjustment", e);
    let adjustment_type: String = row.try_get("adjustment_type").map_err(get)?;
    let line_id: Option<Uuid> = row.try_get("line_id").map_err(get)?;

    Ok(InventoryAdjustment {
        id: AdjustmentId::from_uuid(row.try_get("id").map_err(get)?),
        variant_id: VariantId::from_uuid(row.try_get("variant_id").map_err(get)?),
        adjustment_type: adjustment_type
            .parse::<AdjustmentType>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        quantity: row.try_get("quantity").map_err(get)?,
        reference: AdjustmentReference::new(
            AggregateId::from_uuid(row.try_get("document_id").map_err(get)?),
            line_id.map(AggregateId::from_uuid),
            row.try_get("operation_id").map_err(get)?,
        ),
        reason: row.try_get("reason").map_err(get)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(get)?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(get)?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<PurchaseOrderAuditEntry, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_audit", e);
    let action: String = row.try_get("action").map_err(get)?;

    Ok(PurchaseOrderAuditEntry {
        id: row.try_get("id").map_err(get)?,
        purchase_order_id: PurchaseOrderId::from_uuid(row.try_get("purchase_order_id").map_err(get)?),
        action: action
            .parse::<AuditAction>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        actor: UserId::from_uuid(row.try_get("actor").map_err(get)?),
        details: row.try_get("details").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {version} out of range")))
}

/// Map sqlx errors to [`StoreError`] by SQLSTATE.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // lock_not_available
                Some("55P03") => StoreError::LockTimeout(msg),
                // unique_violation, check_violation, numeric_value_out_of_range
                Some("23505") | Some("23514") | Some("22003") => StoreError::Constraint(msg),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};

    #[derive(Debug)]
    struct SqlState(&'static str);

    impl fmt::Display for SqlState {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sqlstate {}", self.0)
        }
    }

    impl StdError for SqlState {}

    impl DatabaseError for SqlState {
        fn message(&self) -> &str {
            "simulated"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn mapped(code: &'static str) -> StoreError {
        map_sqlx_error("test", sqlx::Error::Database(Box::new(SqlState(code))))
    }

    #[test]
    fn maps_sqlstates_to_store_errors() {
        assert!(matches!(mapped("55P03"), StoreError::LockTimeout(_)));
        assert!(matches!(mapped("23505"), StoreError::Constraint(_)));
        assert!(matches!(mapped("23514"), StoreError::Constraint(_)));
        assert!(matches!(mapped("40001"), StoreError::Concurrency(_)));
        assert!(matches!(mapped("40P01"), StoreError::Concurrency(_)));
        assert!(matches!(mapped("08006"), StoreError::Backend(_)));
    }

    #[test]
    fn numeric_overflow_is_a_final_constraint_error() {
        assert!(matches!(mapped("22003"), StoreError::Constraint(_)));
    }
}
