//! Per-order audit trail.
//!
//! Every state change on an order is recorded next to it, in the same
//! transaction. Receive notes live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use stockledger_core::{DomainError, UserId};

use crate::order::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};
use crate::receipt::ReceiptLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    StatusChanged,
    Received,
    Cancelled,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::StatusChanged => "status_changed",
            AuditAction::Received => "received",
            AuditAction::Cancelled => "cancelled",
        }
    }
}

impl core::str::FromStr for AuditAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AuditAction::Created),
            "status_changed" => Ok(AuditAction::StatusChanged),
            "received" => Ok(AuditAction::Received),
            "cancelled" => Ok(AuditAction::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown audit action '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderAuditEntry {
    pub id: Uuid,
    pub purchase_order_id: PurchaseOrderId,
    pub action: AuditAction,
    pub actor: UserId,
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl PurchaseOrderAuditEntry {
    pub fn new(
        purchase_order_id: PurchaseOrderId,
        action: AuditAction,
        actor: UserId,
        details: JsonValue,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            purchase_order_id,
            action,
            actor,
            details,
            created_at,
        }
    }

    pub fn created(order: &PurchaseOrder, actor: UserId) -> Self {
        Self::new(
            order.id_typed(),
            AuditAction::Created,
            actor,
            json!({
                "order_number": order.order_number(),
                "status": order.status(),
                "total_amount": order.total_amount(),
                "items": order.items().len(),
            }),
            order.created_at(),
        )
    }

    pub fn status_changed(
        order: &PurchaseOrder,
        previous: PurchaseOrderStatus,
        actor: UserId,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        let action = if order.status() == PurchaseOrderStatus::Cancelled {
            AuditAction::Cancelled
        } else {
            AuditAction::StatusChanged
        };
        Self::new(
            order.id_typed(),
            action,
            actor,
            json!({
                "previous_status": previous,
                "new_status": order.status(),
                "reason": reason,
            }),
            at,
        )
    }

    pub fn received(
        order: &PurchaseOrder,
        receipt_id: Uuid,
        previous: PurchaseOrderStatus,
        lines: &[ReceiptLine],
        notes: Option<&str>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        let applied: Vec<JsonValue> = lines
            .iter()
            .filter(|l| l.quantity > 0)
            .map(|l| {
                json!({
                    "item_id": l.item_id,
                    "variant_id": l.variant_id,
                    "quantity": l.quantity,
                })
            })
            .collect();

        Self::new(
            order.id_typed(),
            AuditAction::Received,
            actor,
            json!({
                "receipt_id": receipt_id,
                "previous_status": previous,
                "new_status": order.status(),
                "notes": notes,
                "items": applied,
            }),
            at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::test_order;

    #[test]
    fn receipt_entry_lists_only_applied_lines() {
        let mut order = test_order(&[5, 5]);
        let plan = order.plan_receipt(None).unwrap();
        let mut lines: Vec<ReceiptLine> = plan.lines().to_vec();
        lines[1].quantity = 0;
        let now = Utc::now();
        order.apply_receipt(lines[0].item_id, 5, now).unwrap();

        let entry = PurchaseOrderAuditEntry::received(
            &order,
            Uuid::now_v7(),
            PurchaseOrderStatus::Ordered,
            &lines,
            Some("pallet 3 damaged"),
            UserId::new(),
            now,
        );

        assert_eq!(entry.action, AuditAction::Received);
        assert_eq!(entry.details["items"].as_array().unwrap().len(), 1);
        assert_eq!(entry.details["notes"], "pallet 3 damaged");
        assert_eq!(entry.details["new_status"], "partially_received");
    }

    #[test]
    fn cancellation_is_recorded_as_cancelled() {
        let mut order = test_order(&[1]);
        order.cancel(Utc::now()).unwrap();
        let entry = PurchaseOrderAuditEntry::status_changed(
            &order,
            PurchaseOrderStatus::Ordered,
            UserId::new(),
            Some("supplier out of stock"),
            Utc::now(),
        );
        assert_eq!(entry.action, AuditAction::Cancelled);
        assert_eq!(entry.details["previous_status"], "ordered");
    }
}
