use async_trait::async_trait;
use thiserror::Error;

use stockledger_core::{AggregateId, ExpectedVersion};
use stockledger_inventory::{InventoryAdjustment, VariantId, VariantStock};
use stockledger_purchasing::{
    PurchaseOrder, PurchaseOrderAuditEntry, PurchaseOrderId, PurchaseOrderItemId,
};

/// Storage operation error.
///
/// These are **infrastructure errors** (locking, constraints, connectivity) as
/// opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired within the configured wait.
    #[error("timed out waiting for lock: {0}")]
    LockTimeout(String),

    /// Another transaction changed the row first (version mismatch, serialization failure, deadlock).
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("record not found: {0}")]
    NotFound(String),

    /// A storage-level constraint rejected the write (uniqueness, non-negative stock, bounds).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Stored data could not be mapped back into domain types.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Connectivity, commit or other backend failure.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether repeating the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout(_) | StoreError::Concurrency(_) | StoreError::Backend(_)
        )
    }
}

/// One atomic unit of work against the receiving state.
///
/// Everything written through a unit of work becomes visible together on
/// [`commit`](UnitOfWork::commit) or not at all. Dropping it without committing
/// rolls back and releases every lock it holds.
///
/// Methods are grouped by the store they touch:
/// - **purchase orders**: `insert_order`, `lock_order`, `apply_receipt`, `update_order_header`, `append_audit`
/// - **ledger**: `append_adjustment` (append-only; there is no update or delete)
/// - **stock projection**: `increment_stock`, `rebuild_stock`
#[async_trait]
pub trait UnitOfWork: Send {
    /// Persist a brand-new order with its items.
    async fn insert_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError>;

    /// Load an order and hold its row lock until commit/rollback.
    ///
    /// Waits at most the configured lock timeout, then fails with `LockTimeout`.
    async fn lock_order(
        &mut self,
        order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    /// Increase one item's received quantity by `delta`; returns the new received quantity.
    ///
    /// Fails with `Constraint` if the item would exceed its ordered quantity.
    async fn apply_receipt(
        &mut self,
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        delta: i64,
    ) -> Result<i64, StoreError>;

    /// Persist status, `received_at`, `updated_at` and version of a locked order.
    async fn update_order_header(
        &mut self,
        order: &PurchaseOrder,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError>;

    async fn append_audit(&mut self, entry: &PurchaseOrderAuditEntry) -> Result<(), StoreError>;

    /// Append one immutable ledger row.
    async fn append_adjustment(&mut self, adjustment: &InventoryAdjustment) -> Result<(), StoreError>;

    /// Atomically add `delta` to the variant's cached stock; returns the new quantity.
    ///
    /// Creates the projection row on first touch. Fails with `Constraint` if the
    /// result would be negative.
    async fn increment_stock(&mut self, variant_id: VariantId, delta: i64) -> Result<i64, StoreError>;

    /// Reset the variant's cached stock to its ledger sum; returns the new quantity.
    async fn rebuild_stock(&mut self, variant_id: VariantId) -> Result<i64, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Storage boundary for purchase orders, the adjustment ledger and the stock projection.
///
/// Writes only happen through a [`UnitOfWork`]; the methods here are plain reads
/// of committed state.
#[async_trait]
pub trait ReceivingStore: Send + Sync {
    type Tx: UnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Next human-readable order number (`PO-<n>`), unique per store.
    async fn next_order_number(&self) -> Result<String, StoreError>;

    async fn load_order(&self, order_id: PurchaseOrderId)
    -> Result<Option<PurchaseOrder>, StoreError>;

    async fn audit_trail(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<Vec<PurchaseOrderAuditEntry>, StoreError>;

    async fn ledger_sum_for_variant(&self, variant_id: VariantId) -> Result<i64, StoreError>;

    /// Sum of ledger deltas caused by one document line (e.g. order + item).
    async fn ledger_sum_for_line(
        &self,
        document_id: AggregateId,
        line_id: AggregateId,
    ) -> Result<i64, StoreError>;

    /// Ledger rows for a variant in insertion order.
    async fn adjustments_for_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Vec<InventoryAdjustment>, StoreError>;

    async fn variant_stock(&self, variant_id: VariantId) -> Result<Option<VariantStock>, StoreError>;

    /// Every variant that has a ledger row or a projection row.
    async fn known_variants(&self) -> Result<Vec<VariantId>, StoreError>;
}
