//! Receive orchestration.
//!
//! One receive call is one unit of work:
//!
//! ```text
//! ReceiveRequest
//!   ↓
//! 1. Validate shape (no IO)
//!   ↓
//! 2. Begin, lock the order row (bounded wait)
//!   ↓
//! 3. Plan clamped deltas against the *locked* quantities
//!   ↓
//! 4. Per non-zero delta: ledger row → stock increment → item receipt
//!   ↓
//! 5. Order header (version-guarded) + audit entry
//!   ↓
//! 6. Commit (or roll back everything)
//! ```
//!
//! Deltas are computed after the lock is held, so replaying a request (or
//! racing two full receives on the same order) never applies a unit twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info, instrument};
use uuid::Uuid;

use stockledger_core::{AggregateRoot, ExpectedVersion, UserId};
use stockledger_inventory::{AdjustmentId, AdjustmentReference, NewAdjustment, VariantId};
use stockledger_purchasing::{
    ItemQuantities, PurchaseOrderAuditEntry, PurchaseOrderId, PurchaseOrderItemId,
    PurchaseOrderStatus, validate_item_quantities,
};

use super::error::ReceivingError;
use super::finish;
use crate::store::{ReceivingStore, UnitOfWork};

/// A receive call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub purchase_order_id: PurchaseOrderId,
    pub actor: UserId,
    pub notes: Option<String>,
    /// Units to receive now per item; `None` receives everything outstanding.
    pub item_quantities: Option<ItemQuantities>,
}

impl ReceiveRequest {
    /// Receive everything still outstanding.
    pub fn complete(purchase_order_id: PurchaseOrderId, actor: UserId) -> Self {
        Self {
            purchase_order_id,
            actor,
            notes: None,
            item_quantities: None,
        }
    }

    pub fn partial(
        purchase_order_id: PurchaseOrderId,
        actor: UserId,
        item_quantities: ItemQuantities,
    ) -> Self {
        Self {
            purchase_order_id,
            actor,
            notes: None,
            item_quantities: Some(item_quantities),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Units applied to one item by a receive call (zero when nothing was outstanding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReceipt {
    pub item_id: PurchaseOrderItemId,
    pub variant_id: VariantId,
    pub quantity_applied: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveResult {
    /// Identifies this call; every ledger row it wrote references it.
    pub receipt_id: Uuid,
    pub purchase_order_id: PurchaseOrderId,
    pub order_status: PurchaseOrderStatus,
    pub previous_status: PurchaseOrderStatus,
    pub items: Vec<ItemReceipt>,
    pub adjustments_created: usize,
    pub received_at: Option<DateTime<Utc>>,
}

impl ReceiveResult {
    pub fn total_applied(&self) -> i64 {
        self.items.iter().map(|i| i.quantity_applied).sum()
    }

    /// Whether the call changed nothing.
    pub fn is_noop(&self) -> bool {
        self.adjustments_created == 0
    }
}

/// Applies receive requests through a [`ReceivingStore`].
#[derive(Debug, Clone)]
pub struct ReceiveOrchestrator<S> {
    store: S,
}

impl<S> ReceiveOrchestrator<S>
where
    S: ReceivingStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Receive goods against a purchase order.
    ///
    /// Errors:
    /// - `Validation`: negative quantity, or an item that is not on the order
    /// - `NotFound`: unknown order
    /// - `Conflict`: cancelled order, or the order row stayed locked past the timeout
    ///
    /// A fully received order is not an error: every delta is zero and nothing is written.
    #[instrument(
        skip(self, request),
        fields(
            order_id = %request.purchase_order_id,
            actor = %request.actor,
            receipt_id,
            adjustments
        ),
        err
    )]
    pub async fn receive(&self, request: ReceiveRequest) -> Result<ReceiveResult, ReceivingError> {
        if let Some(quantities) = &request.item_quantities {
            validate_item_quantities(quantities)?;
        }

        let mut tx = self.store.begin().await?;
        let outcome = apply(&mut tx, &request).await;
        let result = finish(tx, outcome).await?;

        let span = Span::current();
        span.record("receipt_id", tracing::field::display(result.receipt_id));
        span.record("adjustments", result.adjustments_created);

        if result.is_noop() {
            info!(status = %result.order_status, "receive applied nothing");
        } else {
            info!(
                previous_status = %result.previous_status,
                status = %result.order_status,
                units = result.total_applied(),
                "receipt committed"
            );
        }
        Ok(result)
    }
}

async fn apply<U>(tx: &mut U, request: &ReceiveRequest) -> Result<ReceiveResult, ReceivingError>
where
    U: UnitOfWork,
{
    let order_id = request.purchase_order_id;
    let mut order = tx
        .lock_order(order_id)
        .await?
        .ok_or_else(|| ReceivingError::NotFound(format!("purchase order {order_id}")))?;

    let previous_status = order.status();
    let plan = order.plan_receipt(request.item_quantities.as_ref())?;
    let expected = ExpectedVersion::Exact(order.version());
    let receipt_id = Uuid::now_v7();
    let now = Utc::now();
    let reason = format!("received on {}", order.order_number());

    let mut adjustments_created = 0;
    for line in plan.applicable() {
        let reference = AdjustmentReference::new(order_id.0, Some(line.item_id.0), receipt_id);
        let adjustment = NewAdjustment::purchase_receipt(
            line.variant_id,
            line.quantity,
            reference,
            request.actor,
            Some(reason.clone()),
        )
        .into_adjustment(AdjustmentId::new(), now)?;

        tx.append_adjustment(&adjustment).await?;
        let on_hand = tx.increment_stock(line.variant_id, line.quantity).await?;
        let received = tx.apply_receipt(order_id, line.item_id, line.quantity).await?;
        order.apply_receipt(line.item_id, line.quantity, now)?;

        debug!(
            item_id = %line.item_id,
            variant_id = %line.variant_id,
            quantity = line.quantity,
            received,
            on_hand,
            "receipt line applied"
        );
        adjustments_created += 1;
    }

    if adjustments_created > 0 {
        tx.update_order_header(&order, expected).await?;
        let entry = PurchaseOrderAuditEntry::received(
            &order,
            receipt_id,
            previous_status,
            plan.lines(),
            request.notes.as_deref(),
            request.actor,
            now,
        );
        tx.append_audit(&entry).await?;
    }

    Ok(ReceiveResult {
        receipt_id,
        purchase_order_id: order_id,
        order_status: order.status(),
        previous_status,
        items: plan
            .lines()
            .iter()
            .map(|line| ItemReceipt {
                item_id: line.item_id,
                variant_id: line.variant_id,
                quantity_applied: line.quantity,
            })
            .collect(),
        adjustments_created,
        received_at: order.received_at(),
    })
}
