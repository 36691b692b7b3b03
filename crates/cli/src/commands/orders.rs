//! Purchase order commands.

use anyhow::bail;
use serde_json::json;

use stockledger_core::UserId;
use stockledger_infra::ReceiveRequest;
use stockledger_purchasing::{
    ItemQuantities, NewLineItem, NewPurchaseOrder, PurchaseOrder, PurchaseOrderId,
    PurchaseOrderItemId, SupplierId,
};

use super::{print_json, service};

pub(crate) fn order_json(order: &PurchaseOrder) -> serde_json::Value {
    json!({
        "id": order.id_typed(),
        "order_number": order.order_number(),
        "supplier_id": order.supplier_id(),
        "status": order.status(),
        "total_amount": order.total_amount(),
        "received_at": order.received_at(),
        "items": order.items(),
    })
}

pub async fn create(
    actor: UserId,
    supplier_id: SupplierId,
    items: Vec<NewLineItem>,
    draft: bool,
) -> anyhow::Result<()> {
    let order = service()
        .await?
        .create_purchase_order(
            NewPurchaseOrder {
                supplier_id,
                items,
                submit: !draft,
            },
            actor,
        )
        .await?;
    print_json(&order_json(&order))
}

pub async fn submit(actor: UserId, order_id: PurchaseOrderId) -> anyhow::Result<()> {
    let order = service().await?.mark_ordered(order_id, actor).await?;
    print_json(&order_json(&order))
}

pub async fn cancel(
    actor: UserId,
    order_id: PurchaseOrderId,
    reason: Option<String>,
) -> anyhow::Result<()> {
    let order = service().await?.cancel(order_id, actor, reason).await?;
    print_json(&order_json(&order))
}

pub async fn receive(
    actor: UserId,
    order_id: PurchaseOrderId,
    items: Vec<(PurchaseOrderItemId, i64)>,
    notes: Option<String>,
) -> anyhow::Result<()> {
    let mut request = if items.is_empty() {
        ReceiveRequest::complete(order_id, actor)
    } else {
        let mut quantities = ItemQuantities::new();
        for (item_id, quantity) in items {
            if quantities.insert(item_id, quantity).is_some() {
                bail!("item {item_id} given more than once");
            }
        }
        ReceiveRequest::partial(order_id, actor, quantities)
    };
    request.notes = notes;

    let result = service().await?.receive(request).await?;
    print_json(&result)
}

pub async fn summary(order_id: PurchaseOrderId, check: bool) -> anyhow::Result<()> {
    let service = service().await?;
    let summary = service.summarize(order_id).await?;
    if !check {
        return print_json(&summary);
    }

    let reconciliation = service.cross_check(order_id).await?;
    print_json(&json!({
        "summary": summary,
        "consistent": reconciliation.is_consistent(),
        "lines": reconciliation.lines,
    }))
}

pub async fn audit(order_id: PurchaseOrderId) -> anyhow::Result<()> {
    let trail = service().await?.audit_trail(order_id).await?;
    print_json(&trail)
}
