//! Receipt planning: which deltas a receive call would apply, computed against
//! the order's *current* outstanding quantities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};
use stockledger_inventory::VariantId;

use crate::order::{
    ProductId, PurchaseOrder, PurchaseOrderItemId, PurchaseOrderStatus,
};

/// Quantities to receive in one call, per item. Not cumulative targets.
pub type ItemQuantities = BTreeMap<PurchaseOrderItemId, i64>;

/// Reject malformed requests before touching storage.
pub fn validate_item_quantities(quantities: &ItemQuantities) -> DomainResult<()> {
    for (item_id, qty) in quantities {
        if *qty < 0 {
            return Err(DomainError::validation(format!(
                "item {item_id}: quantity to receive cannot be negative ({qty})"
            )));
        }
    }
    Ok(())
}

/// One planned line of a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub item_id: PurchaseOrderItemId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    /// What the caller asked for; `None` on a complete receive.
    pub requested: Option<i64>,
    /// Delta that will actually be applied (clamped to the outstanding amount).
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptPlan {
    lines: Vec<ReceiptLine>,
}

impl ReceiptPlan {
    pub fn lines(&self) -> &[ReceiptLine] {
        &self.lines
    }

    /// Lines with a non-zero delta.
    pub fn applicable(&self) -> impl Iterator<Item = &ReceiptLine> {
        self.lines.iter().filter(|l| l.quantity > 0)
    }

    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.total_quantity() == 0
    }
}

impl PurchaseOrder {
    /// Decide the deltas for a receive call without mutating the order.
    ///
    /// - `None` receives everything outstanding on every item.
    /// - `Some(map)` receives `min(requested, outstanding)` per listed item.
    ///
    /// A fully received order yields an all-zero plan. A cancelled order is a conflict.
    pub fn plan_receipt(&self, requested: Option<&ItemQuantities>) -> DomainResult<ReceiptPlan> {
        if self.status() == PurchaseOrderStatus::Cancelled {
            return Err(DomainError::conflict(format!(
                "order {} is cancelled",
                self.order_number()
            )));
        }

        let lines = match requested {
            None => self
                .items()
                .iter()
                .map(|item| ReceiptLine {
                    item_id: item.id,
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    requested: None,
                    quantity: item.outstanding(),
                })
                .collect(),
            Some(quantities) => {
                validate_item_quantities(quantities)?;
                let mut lines = Vec::with_capacity(quantities.len());
                for (item_id, qty) in quantities {
                    let item = self.item(*item_id).ok_or_else(|| {
                        DomainError::validation(format!(
                            "item {item_id} does not belong to order {}",
                            self.order_number()
                        ))
                    })?;
                    lines.push(ReceiptLine {
                        item_id: item.id,
                        product_id: item.product_id,
                        variant_id: item.variant_id,
                        requested: Some(*qty),
                        quantity: (*qty).min(item.outstanding()),
                    });
                }
                lines
            }
        };

        Ok(ReceiptPlan { lines })
    }
}
