use tracing::{info, instrument, warn};

use stockledger_inventory::{StockCheck, VariantId};

use crate::receiving::{ReceivingError, finish};
use crate::store::{ReceivingStore, UnitOfWork};

/// Stock projection maintenance.
///
/// The cached `variant_stock` rows are disposable: the ledger sum is what stock
/// is. This compares the two and rebuilds a cached row from the ledger.
#[derive(Debug, Clone)]
pub struct StockReconciler<S> {
    store: S,
}

impl<S> StockReconciler<S>
where
    S: ReceivingStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    pub async fn check_variant(&self, variant_id: VariantId) -> Result<StockCheck, ReceivingError> {
        let projected = self
            .store
            .variant_stock(variant_id)
            .await?
            .map(|s| s.quantity);
        let ledger_sum = self.store.ledger_sum_for_variant(variant_id).await?;

        let check = StockCheck {
            variant_id,
            projected,
            ledger_sum,
        };
        if !check.is_consistent() {
            warn!(projected = ?projected, ledger_sum, drift = check.drift(), "stock projection drift");
        }
        Ok(check)
    }

    /// Check every variant that has a ledger row or a projection row.
    pub async fn check_all(&self) -> Result<Vec<StockCheck>, ReceivingError> {
        let variants = self.store.known_variants().await?;
        let mut checks = Vec::with_capacity(variants.len());
        for variant_id in variants {
            checks.push(self.check_variant(variant_id).await?);
        }
        Ok(checks)
    }

    /// Reset the cached row to the ledger sum; returns the check taken before the repair.
    #[instrument(skip(self), fields(variant_id = %variant_id), err)]
    pub async fn rebuild_variant(&self, variant_id: VariantId) -> Result<StockCheck, ReceivingError> {
        let before = self.check_variant(variant_id).await?;

        let mut tx = self.store.begin().await?;
        let outcome = tx.rebuild_stock(variant_id).await.map_err(ReceivingError::from);
        let quantity = finish(tx, outcome).await?;

        info!(quantity, drift = before.drift(), "stock projection rebuilt");
        Ok(before)
    }
}
