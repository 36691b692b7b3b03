//! `stockledger demo`: partial then complete receive on a fresh in-memory store.

use serde_json::json;
use uuid::Uuid;

use stockledger_core::{AggregateId, UserId};
use stockledger_infra::{InMemoryReceivingStore, PurchasingService, ReceiveRequest};
use stockledger_inventory::{AdjustmentReference, AdjustmentType, NewAdjustment, VariantId};
use stockledger_purchasing::{ItemQuantities, NewLineItem, NewPurchaseOrder, ProductId, SupplierId};

use super::orders::order_json;
use super::print_json;

pub async fn run(actor: UserId) -> anyhow::Result<()> {
    let service = PurchasingService::new(InMemoryReceivingStore::new());
    let variant = VariantId::new();

    service
        .record_adjustment(NewAdjustment {
            variant_id: variant,
            adjustment_type: AdjustmentType::ManualCorrection,
            quantity: 50,
            reference: AdjustmentReference::new(AggregateId::new(), None, Uuid::now_v7()),
            reason: Some("opening balance".to_string()),
            created_by: actor,
        })
        .await?;

    let order = service
        .create_purchase_order(
            NewPurchaseOrder {
                supplier_id: SupplierId::new(),
                items: vec![NewLineItem {
                    product_id: ProductId::new(),
                    variant_id: variant,
                    quantity_ordered: 10,
                    unit_cost: 15,
                }],
                submit: true,
            },
            actor,
        )
        .await?;
    let order_id = order.id_typed();
    let item = order.items()[0].id;

    let partial = service
        .receive(
            ReceiveRequest::partial(order_id, actor, ItemQuantities::from([(item, 4)]))
                .with_notes("first pallet"),
        )
        .await?;
    let after_partial = json!({
        "receipt": partial,
        "summary": service.summarize(order_id).await?,
        "stock": service.get_variant_stock(variant).await?,
    });

    let rest = service
        .receive(ReceiveRequest::complete(order_id, actor).with_notes("second pallet"))
        .await?;
    let repeat = service.receive(ReceiveRequest::complete(order_id, actor)).await?;

    print_json(&json!({
        "order": order_json(&order),
        "after_partial": after_partial,
        "after_complete": {
            "receipt": rest,
            "summary": service.summarize(order_id).await?,
            "stock": service.get_variant_stock(variant).await?,
        },
        "repeat_is_noop": repeat.is_noop(),
        "ledger_consistent": service.cross_check(order_id).await?.is_consistent(),
        "audit_trail": service.audit_trail(order_id).await?,
    }))
}
