use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use stockledger_core::{AggregateId, DomainError, ExpectedVersion};
use stockledger_inventory::{
    AdjustmentId, InventoryAdjustment, VariantId, VariantStock, sum_deltas, sum_for_line,
};
use stockledger_purchasing::{
    PurchaseOrder, PurchaseOrderAuditEntry, PurchaseOrderId, PurchaseOrderItemId,
    PurchaseOrderRecord, PurchaseOrderStatus,
};

use super::r#trait::{ReceivingStore, StoreError, UnitOfWork};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone)]
struct State {
    orders: HashMap<PurchaseOrderId, PurchaseOrderRecord>,
    order_numbers: HashSet<String>,
    ledger: Vec<InventoryAdjustment>,
    adjustment_ids: HashSet<AdjustmentId>,
    stock: HashMap<VariantId, VariantStock>,
    audit: Vec<PurchaseOrderAuditEntry>,
}

#[derive(Debug, Clone, Copy)]
struct OrderHeader {
    status: PurchaseOrderStatus,
    received_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    version: u64,
}

/// A write buffered by a unit of work until commit.
#[derive(Debug, Clone)]
enum PendingWrite {
    InsertOrder(PurchaseOrderRecord),
    ApplyReceipt {
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        delta: i64,
    },
    UpdateHeader {
        order_id: PurchaseOrderId,
        header: OrderHeader,
        expected: ExpectedVersion,
    },
    Audit(PurchaseOrderAuditEntry),
    Adjustment(InventoryAdjustment),
    StockDelta {
        variant_id: VariantId,
        delta: i64,
    },
    RebuildStock(VariantId),
}

fn apply_item_receipt(
    record: &mut PurchaseOrderRecord,
    item_id: PurchaseOrderItemId,
    delta: i64,
) -> Result<i64, StoreError> {
    let item = record
        .items
        .iter_mut()
        .find(|i| i.id == item_id)
        .ok_or_else(|| StoreError::NotFound(format!("purchase order item {item_id}")))?;
    let next = item.quantity_received + delta;
    if delta <= 0 || next > item.quantity_ordered {
        return Err(StoreError::Constraint(format!(
            "item {item_id}: quantity_received {next} outside 0..={}",
            item.quantity_ordered
        )));
    }
    item.quantity_received = next;
    Ok(next)
}

fn apply_header(
    record: &mut PurchaseOrderRecord,
    header: OrderHeader,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    if !expected.matches(record.version) {
        return Err(StoreError::Concurrency(format!(
            "order {}: expected {expected:?}, found version {}",
            record.id, record.version
        )));
    }
    record.status = header.status;
    record.received_at = header.received_at;
    record.updated_at = header.updated_at;
    record.version = header.version;
    Ok(())
}

fn constraint(err: DomainError) -> StoreError {
    StoreError::Constraint(err.to_string())
}

impl State {
    fn apply(&mut self, write: PendingWrite, now: DateTime<Utc>) -> Result<(), StoreError> {
        match write {
            PendingWrite::InsertOrder(record) => {
                if self.orders.contains_key(&record.id) {
                    return Err(StoreError::Constraint(format!(
                        "purchase order {} already exists",
                        record.id
                    )));
                }
                if !self.order_numbers.insert(record.order_number.clone()) {
                    return Err(StoreError::Constraint(format!(
                        "order number {} already in use",
                        record.order_number
                    )));
                }
                self.orders.insert(record.id, record);
            }
            PendingWrite::ApplyReceipt {
                order_id,
                item_id,
                delta,
            } => {
                let record = self.order_mut(order_id)?;
                apply_item_receipt(record, item_id, delta)?;
            }
            PendingWrite::UpdateHeader {
                order_id,
                header,
                expected,
            } => {
                let record = self.order_mut(order_id)?;
                apply_header(record, header, expected)?;
            }
            PendingWrite::Audit(entry) => self.audit.push(entry),
            PendingWrite::Adjustment(adjustment) => {
                if !self.adjustment_ids.insert(adjustment.id) {
                    return Err(StoreError::Constraint(format!(
                        "adjustment {} already recorded",
                        adjustment.id
                    )));
                }
                let duplicate_receipt = adjustment.reference.line_id.is_some()
                    && self.ledger.iter().any(|a| {
                        a.reference.operation_id == adjustment.reference.operation_id
                            && a.reference.line_id == adjustment.reference.line_id
                    });
                if duplicate_receipt {
                    return Err(StoreError::Constraint(format!(
                        "operation {} already adjusted line {:?}",
                        adjustment.reference.operation_id, adjustment.reference.line_id
                    )));
                }
                self.ledger.push(adjustment);
            }
            PendingWrite::StockDelta { variant_id, delta } => {
                let row = self
                    .stock
                    .entry(variant_id)
                    .or_insert_with(|| VariantStock::empty(variant_id, now));
                row.apply_delta(delta, now).map_err(constraint)?;
            }
            PendingWrite::RebuildStock(variant_id) => {
                let sum = sum_deltas(variant_id, &self.ledger).map_err(constraint)?;
                let row = self
                    .stock
                    .entry(variant_id)
                    .or_insert_with(|| VariantStock::empty(variant_id, now));
                row.quantity = sum;
                row.updated_at = now;
            }
        }
        Ok(())
    }

    fn order_mut(&mut self, order_id: PurchaseOrderId) -> Result<&mut PurchaseOrderRecord, StoreError> {
        self.orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::NotFound(format!("purchase order {order_id}")))
    }
}

type OrderLocks = Mutex<HashMap<PurchaseOrderId, Arc<tokio::sync::Mutex<()>>>>;

/// In-memory receiving store.
///
/// Intended for tests/dev. Not optimized for performance: a commit replays the
/// buffered writes onto a copy of the state and swaps it in, so either every
/// write lands or none does. Order row locks are per-order async mutexes.
#[derive(Debug, Clone)]
pub struct InMemoryReceivingStore {
    state: Arc<RwLock<State>>,
    locks: Arc<OrderLocks>,
    order_seq: Arc<AtomicU64>,
    lock_timeout: Duration,
    fail_next_commit: Arc<AtomicBool>,
}

impl Default for InMemoryReceivingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReceivingStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            order_seq: Arc::new(AtomicU64::new(0)),
            lock_timeout,
            fail_next_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next commit fail with a backend error (failure injection for tests).
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of ledger rows written so far.
    #[cfg(test)]
    pub(crate) fn ledger_len(&self) -> usize {
        self.state.read().expect("store state poisoned").ledger.len()
    }

    /// Overwrite a projection row without a ledger entry, simulating a drifted cache.
    #[cfg(test)]
    pub(crate) fn corrupt_stock(&self, variant_id: VariantId, quantity: i64) {
        let mut state = self.state.write().expect("store state poisoned");
        let row = state
            .stock
            .entry(variant_id)
            .or_insert_with(|| VariantStock::empty(variant_id, Utc::now()));
        row.quantity = quantity;
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

/// Unit of work over [`InMemoryReceivingStore`].
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    state: Arc<RwLock<State>>,
    locks: Arc<OrderLocks>,
    lock_timeout: Duration,
    fail_next_commit: Arc<AtomicBool>,
    held: HashMap<PurchaseOrderId, OwnedMutexGuard<()>>,
    pending: Vec<PendingWrite>,
}

impl InMemoryUnitOfWork {
    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Committed record overlaid with this unit of work's own pending writes.
    fn view_order(&self, order_id: PurchaseOrderId) -> Result<Option<PurchaseOrderRecord>, StoreError> {
        let inserted = self.pending.iter().find_map(|w| match w {
            PendingWrite::InsertOrder(r) if r.id == order_id => Some(r.clone()),
            _ => None,
        });
        let mut record = match inserted {
            Some(r) => r,
            None => match self.read()?.orders.get(&order_id) {
                Some(r) => r.clone(),
                None => return Ok(None),
            },
        };

        for write in &self.pending {
            match write {
                PendingWrite::ApplyReceipt {
                    order_id: id,
                    item_id,
                    delta,
                } if *id == order_id => {
                    apply_item_receipt(&mut record, *item_id, *delta)?;
                }
                PendingWrite::UpdateHeader {
                    order_id: id,
                    header,
                    expected,
                } if *id == order_id => {
                    apply_header(&mut record, *header, *expected)?;
                }
                _ => {}
            }
        }
        Ok(Some(record))
    }

    async fn acquire(&mut self, order_id: PurchaseOrderId) -> Result<(), StoreError> {
        if self.held.contains_key(&order_id) {
            return Ok(());
        }
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| StoreError::Backend("lock table poisoned".to_string()))?;
            locks.entry(order_id).or_default().clone()
        };
        let guard = tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                StoreError::LockTimeout(format!(
                    "purchase order {order_id} locked for more than {:?}",
                    self.lock_timeout
                ))
            })?;
        self.held.insert(order_id, guard);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        self.pending.push(PendingWrite::InsertOrder(order.to_record()));
        Ok(())
    }

    async fn lock_order(
        &mut self,
        order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        self.acquire(order_id).await?;
        match self.view_order(order_id)? {
            Some(record) => PurchaseOrder::from_record(record)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
            None => {
                self.held.remove(&order_id);
                Ok(None)
            }
        }
    }

    async fn apply_receipt(
        &mut self,
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let mut record = self
            .view_order(order_id)?
            .ok_or_else(|| StoreError::NotFound(format!("purchase order {order_id}")))?;
        let received = apply_item_receipt(&mut record, item_id, delta)?;
        self.pending.push(PendingWrite::ApplyReceipt {
            order_id,
            item_id,
            delta,
        });
        Ok(received)
    }

    async fn update_order_header(
        &mut self,
        order: &PurchaseOrder,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let order_id = order.id_typed();
        let mut record = self
            .view_order(order_id)?
            .ok_or_else(|| StoreError::NotFound(format!("purchase order {order_id}")))?;
        let header = OrderHeader {
            status: order.status(),
            received_at: order.received_at(),
            updated_at: order.updated_at(),
            version: stockledger_core::AggregateRoot::version(order),
        };
        apply_header(&mut record, header, expected_version)?;
        self.pending.push(PendingWrite::UpdateHeader {
            order_id,
            header,
            expected: expected_version,
        });
        Ok(())
    }

    async fn append_audit(&mut self, entry: &PurchaseOrderAuditEntry) -> Result<(), StoreError> {
        self.pending.push(PendingWrite::Audit(entry.clone()));
        Ok(())
    }

    async fn append_adjustment(&mut self, adjustment: &InventoryAdjustment) -> Result<(), StoreError> {
        self.pending.push(PendingWrite::Adjustment(adjustment.clone()));
        Ok(())
    }

    async fn increment_stock(&mut self, variant_id: VariantId, delta: i64) -> Result<i64, StoreError> {
        let committed = self
            .read()?
            .stock
            .get(&variant_id)
            .map(|s| s.quantity)
            .unwrap_or(0);
        let overflow =
            || StoreError::Constraint(format!("stock for variant {variant_id} overflows"));
        let staged = self
            .pending
            .iter()
            .filter_map(|w| match w {
                PendingWrite::StockDelta { variant_id: v, delta } if *v == variant_id => Some(*delta),
                _ => None,
            })
            .try_fold(0i64, i64::checked_add)
            .ok_or_else(overflow)?;
        let next = committed
            .checked_add(staged)
            .and_then(|n| n.checked_add(delta))
            .ok_or_else(overflow)?;
        if next < 0 {
            return Err(StoreError::Constraint(format!(
                "stock for variant {variant_id} cannot go negative ({next})"
            )));
        }
        self.pending.push(PendingWrite::StockDelta { variant_id, delta });
        Ok(next)
    }

    async fn rebuild_stock(&mut self, variant_id: VariantId) -> Result<i64, StoreError> {
        let state = self.read()?;
        let staged = self.pending.iter().filter_map(|w| match w {
            PendingWrite::Adjustment(a) => Some(a),
            _ => None,
        });
        let sum = sum_deltas(variant_id, state.ledger.iter().chain(staged)).map_err(constraint)?;
        drop(state);
        self.pending.push(PendingWrite::RebuildStock(variant_id));
        Ok(sum)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected commit failure".to_string()));
        }

        let now = Utc::now();
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let mut next = state.clone();
        for write in self.pending.drain(..) {
            next.apply(write, now)?;
        }
        *state = next;
        drop(state);

        self.held.clear();
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.pending.clear();
        self.held.clear();
        Ok(())
    }
}

#[async_trait]
impl ReceivingStore for InMemoryReceivingStore {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryUnitOfWork {
            state: self.state.clone(),
            locks: self.locks.clone(),
            lock_timeout: self.lock_timeout,
            fail_next_commit: self.fail_next_commit.clone(),
            held: HashMap::new(),
            pending: Vec::new(),
        })
    }

    async fn next_order_number(&self) -> Result<String, StoreError> {
        let n = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("PO-{n}"))
    }

    async fn load_order(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let record = self.read()?.orders.get(&order_id).cloned();
        record
            .map(PurchaseOrder::from_record)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn audit_trail(
        &self,
        order_id: PurchaseOrderId,
    ) -> Result<Vec<PurchaseOrderAuditEntry>, StoreError> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|e| e.purchase_order_id == order_id)
            .cloned()
            .collect())
    }

    async fn ledger_sum_for_variant(&self, variant_id: VariantId) -> Result<i64, StoreError> {
        sum_deltas(variant_id, &self.read()?.ledger).map_err(constraint)
    }

    async fn ledger_sum_for_line(
        &self,
        document_id: AggregateId,
        line_id: AggregateId,
    ) -> Result<i64, StoreError> {
        sum_for_line(document_id, line_id, &self.read()?.ledger).map_err(constraint)
    }

    async fn adjustments_for_variant(
        &self,
        variant_id: VariantId,
    ) -> Result<Vec<InventoryAdjustment>, StoreError> {
        Ok(self
            .read()?
            .ledger
            .iter()
            .filter(|a| a.variant_id == variant_id)
            .cloned()
            .collect())
    }

    async fn variant_stock(&self, variant_id: VariantId) -> Result<Option<VariantStock>, StoreError> {
        Ok(self.read()?.stock.get(&variant_id).cloned())
    }

    async fn known_variants(&self) -> Result<Vec<VariantId>, StoreError> {
        let state = self.read()?;
        let variants: BTreeSet<VariantId> = state
            .ledger
            .iter()
            .map(|a| a.variant_id)
            .chain(state.stock.keys().copied())
            .collect();
        Ok(variants.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::UserId;
    use stockledger_inventory::{AdjustmentReference, NewAdjustment};
    use stockledger_purchasing::{NewLineItem, NewPurchaseOrder, ProductId, SupplierId};
    use uuid::Uuid;

    fn order(number: &str) -> PurchaseOrder {
        PurchaseOrder::create(
            PurchaseOrderId::new(),
            number,
            NewPurchaseOrder {
                supplier_id: SupplierId::new(),
                items: vec![NewLineItem {
                    product_id: ProductId::new(),
                    variant_id: VariantId::new(),
                    quantity_ordered: 10,
                    unit_cost: 15,
                }],
                submit: true,
            },
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = InMemoryReceivingStore::new();
        let po = order("PO-1");

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&po).await.unwrap();
        tx.increment_stock(VariantId::new(), 5).await.unwrap();
        assert!(store.load_order(po.id_typed()).await.unwrap().is_none());
        tx.rollback().await.unwrap();

        assert!(store.load_order(po.id_typed()).await.unwrap().is_none());
        assert!(store.known_variants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let store = InMemoryReceivingStore::new();
        let po = order("PO-1");
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&po).await.unwrap();
        tx.commit().await.unwrap();

        // Second insert of the same order number fails at commit; the stock delta
        // staged beside it must not land either.
        let variant = VariantId::new();
        let mut tx = store.begin().await.unwrap();
        tx.increment_stock(variant, 7).await.unwrap();
        tx.insert_order(&order("PO-1")).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Constraint(_))));

        assert!(store.variant_stock(variant).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_locker_times_out() {
        let store = InMemoryReceivingStore::with_lock_timeout(Duration::from_millis(20));
        let po = order("PO-1");
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&po).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        assert!(first.lock_order(po.id_typed()).await.unwrap().is_some());

        let mut second = store.begin().await.unwrap();
        let err = second.lock_order(po.id_typed()).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        first.rollback().await.unwrap();
        assert!(second.lock_order(po.id_typed()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn receipts_cannot_exceed_ordered_quantity() {
        let store = InMemoryReceivingStore::new();
        let po = order("PO-1");
        let item = po.items()[0].id;
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&po).await.unwrap();
        assert_eq!(tx.apply_receipt(po.id_typed(), item, 6).await.unwrap(), 6);
        let err = tx.apply_receipt(po.id_typed(), item, 5).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn rebuild_resets_the_projection_to_the_ledger_sum() {
        let store = InMemoryReceivingStore::new();
        let variant = VariantId::new();
        let adjustment = NewAdjustment::purchase_receipt(
            variant,
            8,
            AdjustmentReference::new(AggregateId::new(), Some(AggregateId::new()), Uuid::now_v7()),
            UserId::new(),
            None,
        )
        .into_adjustment(AdjustmentId::new(), Utc::now())
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.append_adjustment(&adjustment).await.unwrap();
        tx.increment_stock(variant, 8).await.unwrap();
        tx.commit().await.unwrap();

        store.corrupt_stock(variant, 3);
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.rebuild_stock(variant).await.unwrap(), 8);
        tx.commit().await.unwrap();

        assert_eq!(store.variant_stock(variant).await.unwrap().unwrap().quantity, 8);
        assert_eq!(store.ledger_sum_for_variant(variant).await.unwrap(), 8);
    }
}
