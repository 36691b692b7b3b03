//! Purchasing service: the entry points callers use.
//!
//! Every write goes through one unit of work on the store; reads go straight
//! to committed state.

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{AggregateRoot, ExpectedVersion, UserId};
use stockledger_inventory::{
    AdjustmentId, AdjustmentType, InventoryAdjustment, NewAdjustment, VariantId,
};
use stockledger_purchasing::{
    NewPurchaseOrder, PurchaseOrder, PurchaseOrderAuditEntry, PurchaseOrderId, ReceivingSummary,
};

use crate::projections::StockReconciler;
use crate::receiving::{
    ReceiptReconciliation, ReceiveOrchestrator, ReceiveRequest, ReceiveResult, ReceivingError,
    SummaryAggregator, finish,
};
use crate::store::{ReceivingStore, UnitOfWork};

#[derive(Debug, Clone)]
pub struct PurchasingService<S> {
    store: S,
    orchestrator: ReceiveOrchestrator<S>,
    summaries: SummaryAggregator<S>,
    reconciler: StockReconciler<S>,
}

impl<S> PurchasingService<S>
where
    S: ReceivingStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            orchestrator: ReceiveOrchestrator::new(store.clone()),
            summaries: SummaryAggregator::new(store.clone()),
            reconciler: StockReconciler::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reconciler(&self) -> &StockReconciler<S> {
        &self.reconciler
    }

    /// Create an order with a fresh `PO-<n>` number.
    #[instrument(skip(self, new), fields(actor = %actor, items = new.items.len()), err)]
    pub async fn create_purchase_order(
        &self,
        new: NewPurchaseOrder,
        actor: UserId,
    ) -> Result<PurchaseOrder, ReceivingError> {
        let order_number = self.store.next_order_number().await?;
        let order = PurchaseOrder::create(PurchaseOrderId::new(), order_number, new, actor, Utc::now())?;

        let mut tx = self.store.begin().await?;
        let outcome = async {
            tx.insert_order(&order).await?;
            tx.append_audit(&PurchaseOrderAuditEntry::created(&order, actor))
                .await?;
            Ok::<_, ReceivingError>(())
        }
        .await;
        finish(tx, outcome).await?;

        info!(
            order_id = %order.id_typed(),
            order_number = order.order_number(),
            status = %order.status(),
            "purchase order created"
        );
        Ok(order)
    }

    /// Submit a draft to the supplier. A no-op on an order that is already `ordered`.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn mark_ordered(
        &self,
        order_id: PurchaseOrderId,
        actor: UserId,
    ) -> Result<PurchaseOrder, ReceivingError> {
        let mut tx = self.store.begin().await?;
        let outcome = async {
            let mut order = lock(&mut tx, order_id).await?;
            let previous = order.status();
            let expected = ExpectedVersion::Exact(order.version());
            let now = Utc::now();
            if order.mark_ordered(now)? {
                tx.update_order_header(&order, expected).await?;
                tx.append_audit(&PurchaseOrderAuditEntry::status_changed(
                    &order, previous, actor, None, now,
                ))
                .await?;
            }
            Ok::<_, ReceivingError>(order)
        }
        .await;
        finish(tx, outcome).await
    }

    /// Cancel an order that has not received anything.
    #[instrument(skip(self, reason), fields(order_id = %order_id), err)]
    pub async fn cancel(
        &self,
        order_id: PurchaseOrderId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<PurchaseOrder, ReceivingError> {
        let mut tx = self.store.begin().await?;
        let outcome = async {
            let mut order = lock(&mut tx, order_id).await?;
            let previous = order.status();
            let expected = ExpectedVersion::Exact(order.version());
            let now = Utc::now();
            order.cancel(now)?;
            tx.update_order_header(&order, expected).await?;
            tx.append_audit(&PurchaseOrderAuditEntry::status_changed(
                &order,
                previous,
                actor,
                reason.as_deref(),
                now,
            ))
            .await?;
            Ok::<_, ReceivingError>(order)
        }
        .await;
        let order = finish(tx, outcome).await?;
        info!(order_number = order.order_number(), "purchase order cancelled");
        Ok(order)
    }

    pub async fn receive(&self, request: ReceiveRequest) -> Result<ReceiveResult, ReceivingError> {
        self.orchestrator.receive(request).await
    }

    pub async fn summarize(&self, order_id: PurchaseOrderId) -> Result<ReceivingSummary, ReceivingError> {
        self.summaries.summarize(order_id).await
    }

    pub async fn cross_check(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<ReceiptReconciliation, ReceivingError> {
        self.summaries.cross_check(order_id).await
    }

    pub async fn get_order(&self, order_id: PurchaseOrderId) -> Result<PurchaseOrder, ReceivingError> {
        self.store
            .load_order(order_id)
            .await?
            .ok_or_else(|| ReceivingError::NotFound(format!("purchase order {order_id}")))
    }

    /// Cached on-hand quantity. `NotFound` if the variant was never stocked.
    pub async fn get_variant_stock(&self, variant_id: VariantId) -> Result<i64, ReceivingError> {
        self.store
            .variant_stock(variant_id)
            .await?
            .map(|s| s.quantity)
            .ok_or_else(|| ReceivingError::NotFound(format!("no stock recorded for variant {variant_id}")))
    }

    /// Record a sale, return or manual correction.
    ///
    /// Purchase receipts are rejected: only receiving writes them, so every
    /// receipt row stays tied to an order item.
    #[instrument(
        skip(self, new),
        fields(variant_id = %new.variant_id, kind = new.adjustment_type.as_str(), quantity = new.quantity),
        err
    )]
    pub async fn record_adjustment(
        &self,
        new: NewAdjustment,
    ) -> Result<InventoryAdjustment, ReceivingError> {
        if new.adjustment_type == AdjustmentType::PurchaseReceipt {
            return Err(ReceivingError::Validation(
                "purchase receipts are recorded by receiving a purchase order".to_string(),
            ));
        }
        let adjustment = new.into_adjustment(AdjustmentId::new(), Utc::now())?;

        let mut tx = self.store.begin().await?;
        let outcome = async {
            tx.append_adjustment(&adjustment).await?;
            let on_hand = tx
                .increment_stock(adjustment.variant_id, adjustment.quantity)
                .await?;
            Ok::<_, ReceivingError>(on_hand)
        }
        .await;
        let on_hand = finish(tx, outcome).await?;

        info!(on_hand, "stock adjustment recorded");
        Ok(adjustment)
    }

    pub async fn audit_trail(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<Vec<PurchaseOrderAuditEntry>, ReceivingError> {
        if self.store.load_order(order_id).await?.is_none() {
            return Err(ReceivingError::NotFound(format!("purchase order {order_id}")));
        }
        Ok(self.store.audit_trail(order_id).await?)
    }
}

async fn lock<U>(tx: &mut U, order_id: PurchaseOrderId) -> Result<PurchaseOrder, ReceivingError>
where
    U: UnitOfWork,
{
    tx.lock_order(order_id)
        .await?
        .ok_or_else(|| ReceivingError::NotFound(format!("purchase order {order_id}")))
}
