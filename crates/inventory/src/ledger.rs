//! Ledger arithmetic: the ledger sum is what stock *is*.

use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError, DomainResult};

use crate::adjustment::InventoryAdjustment;
use crate::stock::VariantId;

/// Sum of the signed deltas of `adjustments` for one variant.
pub fn sum_deltas<'a>(
    variant_id: VariantId,
    adjustments: impl IntoIterator<Item = &'a InventoryAdjustment>,
) -> DomainResult<i64> {
    checked_sum(
        adjustments
            .into_iter()
            .filter(|a| a.variant_id == variant_id)
            .map(|a| a.quantity),
    )
}

/// Sum of the deltas caused by one document line (e.g. a purchase order item).
pub fn sum_for_line<'a>(
    document_id: AggregateId,
    line_id: AggregateId,
    adjustments: impl IntoIterator<Item = &'a InventoryAdjustment>,
) -> DomainResult<i64> {
    checked_sum(
        adjustments
            .into_iter()
            .filter(|a| a.reference.refers_to_line(document_id, line_id))
            .map(|a| a.quantity),
    )
}

fn checked_sum(quantities: impl Iterator<Item = i64>) -> DomainResult<i64> {
    let mut total: i64 = 0;
    for q in quantities {
        total = total
            .checked_add(q)
            .ok_or_else(|| DomainError::invariant("ledger sum overflow"))?;
    }
    Ok(total)
}

/// Projection vs ledger comparison for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCheck {
    pub variant_id: VariantId,
    /// Cached quantity; `None` when the variant has no projection row.
    pub projected: Option<i64>,
    pub ledger_sum: i64,
}

impl StockCheck {
    pub fn is_consistent(&self) -> bool {
        self.projected.unwrap_or(0) == self.ledger_sum
    }

    /// How far the cache is off (`projected - ledger`).
    pub fn drift(&self) -> i64 {
        self.projected.unwrap_or(0).saturating_sub(self.ledger_sum)
    }
}
