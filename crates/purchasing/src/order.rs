use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    AggregateRoot, DomainError, DomainResult, Entity, UserId, aggregate_id_newtype,
};
use stockledger_inventory::VariantId;

aggregate_id_newtype!(
    /// Purchase order identifier.
    PurchaseOrderId
);

aggregate_id_newtype!(
    /// Purchase order line item identifier.
    PurchaseOrderItemId
);

aggregate_id_newtype!(
    /// Supplier reference (owned by the supplier catalog).
    SupplierId
);

aggregate_id_newtype!(
    /// Product reference (owned by the product catalog).
    ProductId
);

/// Purchase order status lifecycle.
///
/// ```text
/// draft ──► ordered ──► partially_received ──► received
///   │          │                                  ▲
///   │          └──────────────────────────────────┘
///   └──► cancelled ◄── ordered   (only before any receiving)
/// ```
///
/// `received` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled
        )
    }

    /// Whether at least one unit has been received in this status.
    pub fn is_receiving(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::PartiallyReceived | PurchaseOrderStatus::Received
        )
    }

    /// Position along the forward path. Cancellation sits outside of it.
    pub fn rank(self) -> u8 {
        match self {
            PurchaseOrderStatus::Draft => 0,
            PurchaseOrderStatus::Ordered => 1,
            PurchaseOrderStatus::PartiallyReceived => 2,
            PurchaseOrderStatus::Received => 3,
            PurchaseOrderStatus::Cancelled => 4,
        }
    }

    pub fn can_transition_to(self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!(
            (self, next),
            (Draft, Ordered)
                | (Draft | Ordered, PartiallyReceived)
                | (Draft | Ordered | PartiallyReceived, Received)
                | (Draft | Ordered, Cancelled)
        )
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PurchaseOrderStatus::Draft),
            "ordered" => Ok(PurchaseOrderStatus::Ordered),
            "partially_received" => Ok(PurchaseOrderStatus::PartiallyReceived),
            "received" => Ok(PurchaseOrderStatus::Received),
            "cancelled" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status '{other}'"
            ))),
        }
    }
}

/// Purchase order line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: PurchaseOrderItemId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    /// Unit cost in minor currency units.
    pub unit_cost: i64,
    pub subtotal: i64,
}

impl PurchaseOrderItem {
    /// Units still expected from the supplier.
    pub fn outstanding(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_complete(&self) -> bool {
        self.quantity_received == self.quantity_ordered
    }

    fn check_bounds(&self) -> DomainResult<()> {
        if self.quantity_ordered <= 0 {
            return Err(DomainError::invariant(format!(
                "item {}: quantity_ordered must be positive",
                self.id
            )));
        }
        if self.quantity_received < 0 || self.quantity_received > self.quantity_ordered {
            return Err(DomainError::invariant(format!(
                "item {}: quantity_received {} outside 0..={}",
                self.id, self.quantity_received, self.quantity_ordered
            )));
        }
        Ok(())
    }
}

impl Entity for PurchaseOrderItem {
    type Id = PurchaseOrderItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input line for a new purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity_ordered: i64,
    pub unit_cost: i64,
}

/// Input for a new purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: SupplierId,
    pub items: Vec<NewLineItem>,
    /// Start in `ordered` instead of `draft`.
    #[serde(default)]
    pub submit: bool,
}

/// Persisted shape of a purchase order, used to rebuild the aggregate from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrderRecord {
    pub id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: SupplierId,
    pub status: PurchaseOrderStatus,
    pub total_amount: i64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub items: Vec<PurchaseOrderItem>,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    order_number: String,
    supplier_id: SupplierId,
    status: PurchaseOrderStatus,
    total_amount: i64,
    created_by: UserId,
    created_at: DateTime<Utc>,
    received_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    version: u64,
    items: Vec<PurchaseOrderItem>,
}

impl PurchaseOrder {
    /// Build a new order. Every item starts with nothing received.
    pub fn create(
        id: PurchaseOrderId,
        order_number: impl Into<String>,
        new: NewPurchaseOrder,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let order_number = order_number.into();
        if order_number.trim().is_empty() {
            return Err(DomainError::validation("order number cannot be empty"));
        }
        if new.items.is_empty() {
            return Err(DomainError::validation(
                "purchase order needs at least one item",
            ));
        }

        let mut items = Vec::with_capacity(new.items.len());
        let mut total_amount: i64 = 0;
        let mut total_ordered: i64 = 0;
        for (idx, line) in new.items.into_iter().enumerate() {
            if line.quantity_ordered <= 0 {
                return Err(DomainError::validation(format!(
                    "line {}: quantity must be positive",
                    idx + 1
                )));
            }
            if line.unit_cost < 0 {
                return Err(DomainError::validation(format!(
                    "line {}: unit cost cannot be negative",
                    idx + 1
                )));
            }
            let subtotal = line
                .quantity_ordered
                .checked_mul(line.unit_cost)
                .ok_or_else(|| DomainError::validation("line subtotal overflow"))?;
            total_amount = total_amount
                .checked_add(subtotal)
                .ok_or_else(|| DomainError::validation("order total overflow"))?;
            total_ordered = total_ordered
                .checked_add(line.quantity_ordered)
                .ok_or_else(|| DomainError::validation("order quantity overflow"))?;

            items.push(PurchaseOrderItem {
                id: PurchaseOrderItemId::new(),
                line_no: (idx as u32) + 1,
                product_id: line.product_id,
                variant_id: line.variant_id,
                quantity_ordered: line.quantity_ordered,
                quantity_received: 0,
                unit_cost: line.unit_cost,
                subtotal,
            });
        }

        let status = if new.submit {
            PurchaseOrderStatus::Ordered
        } else {
            PurchaseOrderStatus::Draft
        };

        Ok(Self {
            id,
            order_number,
            supplier_id: new.supplier_id,
            status,
            total_amount,
            created_by,
            created_at: now,
            received_at: None,
            updated_at: now,
            version: 1,
            items,
        })
    }

    /// Rebuild from storage, re-checking every invariant.
    pub fn from_record(record: PurchaseOrderRecord) -> DomainResult<Self> {
        for item in &record.items {
            item.check_bounds()?;
        }
        if ordered_units(&record.items).is_none() {
            return Err(DomainError::invariant(format!(
                "order {}: ordered quantity overflows",
                record.id
            )));
        }

        let order = Self {
            id: record.id,
            order_number: record.order_number,
            supplier_id: record.supplier_id,
            status: record.status,
            total_amount: record.total_amount,
            created_by: record.created_by,
            created_at: record.created_at,
            received_at: record.received_at,
            updated_at: record.updated_at,
            version: record.version,
            items: record.items,
        };

        let received = order.total_received();
        if order.status.is_receiving() != order.received_at.is_some() {
            return Err(DomainError::invariant(format!(
                "order {}: received_at does not match status {}",
                order.id, order.status
            )));
        }
        if received > 0 && !order.status.is_receiving() {
            return Err(DomainError::invariant(format!(
                "order {}: {received} units received but status is {}",
                order.id, order.status
            )));
        }
        if order.status == PurchaseOrderStatus::Received
            && !order.items.iter().all(PurchaseOrderItem::is_complete)
        {
            return Err(DomainError::invariant(format!(
                "order {}: marked received with outstanding items",
                order.id
            )));
        }

        Ok(order)
    }

    /// Persisted shape of this order.
    pub fn to_record(&self) -> PurchaseOrderRecord {
        PurchaseOrderRecord {
            id: self.id,
            order_number: self.order_number.clone(),
            supplier_id: self.supplier_id,
            status: self.status,
            total_amount: self.total_amount,
            created_by: self.created_by,
            created_at: self.created_at,
            received_at: self.received_at,
            updated_at: self.updated_at,
            version: self.version,
            items: self.items.clone(),
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn supplier_id(&self) -> SupplierId {
        self.supplier_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn items(&self) -> &[PurchaseOrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: PurchaseOrderItemId) -> Option<&PurchaseOrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Fits in `i64`: `create` and `from_record` reject larger totals.
    pub fn total_ordered(&self) -> i64 {
        self.items.iter().map(|i| i.quantity_ordered).sum()
    }

    pub fn total_received(&self) -> i64 {
        self.items.iter().map(|i| i.quantity_received).sum()
    }

    /// Move a draft into `ordered`. Already-ordered orders are left alone.
    ///
    /// Returns whether the status changed.
    pub fn mark_ordered(&mut self, now: DateTime<Utc>) -> DomainResult<bool> {
        if self.status == PurchaseOrderStatus::Ordered {
            return Ok(false);
        }
        self.transition(PurchaseOrderStatus::Ordered, now)?;
        Ok(true)
    }

    /// Cancel an order that has not received anything yet.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.total_received() > 0 {
            return Err(DomainError::conflict(format!(
                "order {} already has received items and cannot be cancelled",
                self.order_number
            )));
        }
        self.transition(PurchaseOrderStatus::Cancelled, now)
    }

    /// Record `delta` more units received on one item and re-derive the order status.
    ///
    /// Sets `received_at` the first time the order enters a receiving status.
    pub fn apply_receipt(
        &mut self,
        item_id: PurchaseOrderItemId,
        delta: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<PurchaseOrderStatus> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "order {} is {} and accepts no receipts",
                self.order_number, self.status
            )));
        }
        if delta <= 0 {
            return Err(DomainError::validation("receipt delta must be positive"));
        }

        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| DomainError::not_found(format!("purchase order item {item_id}")))?;
        if delta > item.outstanding() {
            return Err(DomainError::invariant(format!(
                "item {item_id}: receiving {delta} exceeds outstanding {}",
                item.outstanding()
            )));
        }
        item.quantity_received += delta;

        let derived = self.derive_status();
        if derived != self.status {
            self.transition(derived, now)?;
        } else {
            self.touch(now);
        }
        Ok(self.status)
    }

    /// Status implied by the items' received quantities. Never lower than the current one.
    fn derive_status(&self) -> PurchaseOrderStatus {
        if self.items.iter().all(PurchaseOrderItem::is_complete) {
            PurchaseOrderStatus::Received
        } else if self.total_received() > 0 {
            PurchaseOrderStatus::PartiallyReceived
        } else {
            self.status
        }
    }

    fn transition(&mut self, next: PurchaseOrderStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "order {} is {} (terminal)",
                self.order_number, self.status
            )));
        }
        if !self.status.can_transition_to(next) {
            return Err(DomainError::conflict(format!(
                "order {}: illegal transition {} -> {}",
                self.order_number, self.status, next
            )));
        }

        self.status = next;
        if next.is_receiving() && self.received_at.is_none() {
            self.received_at = Some(now);
        }
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ordered_units(items: &[PurchaseOrderItem]) -> Option<i64> {
    items
        .iter()
        .try_fold(0i64, |acc, i| acc.checked_add(i.quantity_ordered))
}
