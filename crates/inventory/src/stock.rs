use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, aggregate_id_newtype};

aggregate_id_newtype!(
    /// Product variant identifier (the unit stock is counted in).
    VariantId
);

/// Cached on-hand quantity for one variant.
///
/// Only ever moved by a delta that is written to the ledger in the same
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStock {
    pub variant_id: VariantId,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

impl VariantStock {
    pub fn empty(variant_id: VariantId, at: DateTime<Utc>) -> Self {
        Self {
            variant_id,
            quantity: 0,
            updated_at: at,
        }
    }

    /// Apply a ledger delta, returning the new quantity.
    pub fn apply_delta(&mut self, delta: i64, at: DateTime<Utc>) -> DomainResult<i64> {
        let next = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant("stock quantity overflow"))?;
        if next < 0 {
            return Err(DomainError::conflict(format!(
                "stock for variant {} cannot go negative ({} + {})",
                self.variant_id, self.quantity, delta
            )));
        }
        self.quantity = next;
        self.updated_at = at;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_accumulate() {
        let now = Utc::now();
        let mut stock = VariantStock::empty(VariantId::new(), now);
        assert_eq!(stock.apply_delta(50, now).unwrap(), 50);
        assert_eq!(stock.apply_delta(-20, now).unwrap(), 30);
    }

    #[test]
    fn cannot_go_negative() {
        let now = Utc::now();
        let mut stock = VariantStock::empty(VariantId::new(), now);
        stock.apply_delta(5, now).unwrap();

        let err = stock.apply_delta(-6, now).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(stock.quantity, 5);
    }
}
