use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use stockledger_inventory::VariantId;
use stockledger_purchasing::{PurchaseOrderId, PurchaseOrderItemId, ReceivingSummary};

use super::error::ReceivingError;
use crate::store::ReceivingStore;

/// One order item compared with the ledger rows that reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReconciliation {
    pub item_id: PurchaseOrderItemId,
    pub variant_id: VariantId,
    pub quantity_received: i64,
    pub ledger_quantity: i64,
}

impl LineReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.quantity_received == self.ledger_quantity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptReconciliation {
    pub purchase_order_id: PurchaseOrderId,
    pub lines: Vec<LineReconciliation>,
}

impl ReceiptReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.lines.iter().all(LineReconciliation::is_consistent)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &LineReconciliation> {
        self.lines.iter().filter(|l| !l.is_consistent())
    }
}

/// Read-only receiving progress.
#[derive(Debug, Clone)]
pub struct SummaryAggregator<S> {
    store: S,
}

impl<S> SummaryAggregator<S>
where
    S: ReceivingStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn summarize(&self, order_id: PurchaseOrderId) -> Result<ReceivingSummary, ReceivingError> {
        let order = self
            .store
            .load_order(order_id)
            .await?
            .ok_or_else(|| ReceivingError::NotFound(format!("purchase order {order_id}")))?;
        Ok(ReceivingSummary::from_order(&order))
    }

    /// Compare every item's received quantity with the ledger rows written for it.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn cross_check(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<ReceiptReconciliation, ReceivingError> {
        let order = self
            .store
            .load_order(order_id)
            .await?
            .ok_or_else(|| ReceivingError::NotFound(format!("purchase order {order_id}")))?;

        let mut lines = Vec::with_capacity(order.items().len());
        for item in order.items() {
            let ledger_quantity = self.store.ledger_sum_for_line(order_id.0, item.id.0).await?;
            lines.push(LineReconciliation {
                item_id: item.id,
                variant_id: item.variant_id,
                quantity_received: item.quantity_received,
                ledger_quantity,
            });
        }

        let reconciliation = ReceiptReconciliation {
            purchase_order_id: order_id,
            lines,
        };
        for line in reconciliation.mismatches() {
            warn!(
                item_id = %line.item_id,
                received = line.quantity_received,
                ledger = line.ledger_quantity,
                "order item disagrees with ledger"
            );
        }
        Ok(reconciliation)
    }
}
