//! Integration tests for the receiving pipeline against the in-memory store.
//!
//! Tests: PurchasingService → ReceiveOrchestrator → UnitOfWork → ledger + projection
//!
//! Verifies:
//! - Receiving is idempotent and clamps to outstanding quantities
//! - Stock always equals the ledger sum, also under concurrent receives
//! - Status only moves forward and `received_at` is fixed once set
//! - Failures leave no trace

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use stockledger_core::{AggregateId, UserId};
use stockledger_inventory::{AdjustmentReference, AdjustmentType, NewAdjustment, VariantId};
use stockledger_purchasing::{
    AuditAction, NewLineItem, NewPurchaseOrder, ProductId, PurchaseOrder, PurchaseOrderId,
    PurchaseOrderStatus, SupplierId,
};

use crate::receiving::{ReceiveRequest, ReceivingError};
use crate::service::PurchasingService;
use crate::store::{InMemoryReceivingStore, ReceivingStore, UnitOfWork};

fn setup() -> (PurchasingService<InMemoryReceivingStore>, UserId) {
    (PurchasingService::new(InMemoryReceivingStore::new()), UserId::new())
}

fn line(variant_id: VariantId, quantity_ordered: i64, unit_cost: i64) -> NewLineItem {
    NewLineItem {
        product_id: ProductId::new(),
        variant_id,
        quantity_ordered,
        unit_cost,
    }
}

async fn create_order(
    service: &PurchasingService<InMemoryReceivingStore>,
    actor: UserId,
    items: Vec<NewLineItem>,
) -> PurchaseOrder {
    service
        .create_purchase_order(
            NewPurchaseOrder {
                supplier_id: SupplierId::new(),
                items,
                submit: true,
            },
            actor,
        )
        .await
        .unwrap()
}

async fn seed_stock(
    service: &PurchasingService<InMemoryReceivingStore>,
    actor: UserId,
    variant_id: VariantId,
    quantity: i64,
) {
    service
        .record_adjustment(NewAdjustment {
            variant_id,
            adjustment_type: AdjustmentType::ManualCorrection,
            quantity,
            reference: AdjustmentReference::new(AggregateId::new(), None, Uuid::now_v7()),
            reason: Some("opening balance".to_string()),
            created_by: actor,
        })
        .await
        .unwrap();
}

async fn assert_stock_matches_ledger(store: &InMemoryReceivingStore, variant_id: VariantId) {
    let projected = store.variant_stock(variant_id).await.unwrap().map(|s| s.quantity);
    let ledger = store.ledger_sum_for_variant(variant_id).await.unwrap();
    assert_eq!(projected.unwrap_or(0), ledger);
}

#[tokio::test]
async fn full_receive_scenario() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    seed_stock(&service, actor, variant, 50).await;

    let order = create_order(&service, actor, vec![line(variant, 10, 15)]).await;
    assert_eq!(order.order_number(), "PO-1");
    assert_eq!(order.total_amount(), 150);

    let result = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap();

    assert_eq!(result.previous_status, PurchaseOrderStatus::Ordered);
    assert_eq!(result.order_status, PurchaseOrderStatus::Received);
    assert_eq!(result.adjustments_created, 1);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].quantity_applied, 10);
    assert!(result.received_at.is_some());

    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 60);
    let item = order.items()[0].id;
    assert_eq!(
        service
            .store()
            .ledger_sum_for_line(order.id_typed().0, item.0)
            .await
            .unwrap(),
        10
    );

    let summary = service.summarize(order.id_typed()).await.unwrap();
    assert_eq!(summary.total_received, 10);
    assert_eq!(summary.total_outstanding, 0);
    assert_eq!(summary.percent_received, 100.0);
    assert_stock_matches_ledger(service.store(), variant).await;
}

#[tokio::test]
async fn partial_receive_scenario() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    seed_stock(&service, actor, variant, 50).await;
    let order = create_order(&service, actor, vec![line(variant, 10, 15)]).await;
    let item = order.items()[0].id;

    let first = service
        .receive(ReceiveRequest::partial(
            order.id_typed(),
            actor,
            BTreeMap::from([(item, 4)]),
        ))
        .await
        .unwrap();
    assert_eq!(first.order_status, PurchaseOrderStatus::PartiallyReceived);
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 54);
    let summary = service.summarize(order.id_typed()).await.unwrap();
    assert_eq!(summary.percent_received, 40.0);
    assert_eq!(summary.total_outstanding, 6);

    let rest = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap();
    assert_eq!(rest.items[0].quantity_applied, 6);
    assert_eq!(rest.order_status, PurchaseOrderStatus::Received);
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 60);
    assert_eq!(rest.received_at, first.received_at);
}

#[tokio::test]
async fn repeated_full_receive_is_a_noop() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    let order = create_order(&service, actor, vec![line(variant, 7, 3), line(VariantId::new(), 2, 1)]).await;

    let first = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap();
    let ledger_rows = service.store().ledger_len();
    let stock = service.get_variant_stock(variant).await.unwrap();

    let second = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap();

    assert!(second.is_noop());
    assert_eq!(second.order_status, PurchaseOrderStatus::Received);
    assert_eq!(second.previous_status, PurchaseOrderStatus::Received);
    assert!(second.items.iter().all(|i| i.quantity_applied == 0));
    assert_eq!(second.received_at, first.received_at);
    assert_eq!(service.store().ledger_len(), ledger_rows);
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), stock);

    let received: Vec<_> = service
        .audit_trail(order.id_typed())
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == AuditAction::Received)
        .collect();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn partial_requests_are_clamped_to_outstanding() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    let order = create_order(&service, actor, vec![line(variant, 10, 1)]).await;
    let item = order.items()[0].id;

    service
        .receive(ReceiveRequest::partial(order.id_typed(), actor, BTreeMap::from([(item, 4)])))
        .await
        .unwrap();
    let result = service
        .receive(ReceiveRequest::partial(order.id_typed(), actor, BTreeMap::from([(item, 10)])))
        .await
        .unwrap();

    assert_eq!(result.items[0].quantity_applied, 6);
    let order = service.get_order(order.id_typed()).await.unwrap();
    assert_eq!(order.items()[0].quantity_received, 10);
    assert_eq!(order.status(), PurchaseOrderStatus::Received);
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 10);
}

#[tokio::test]
async fn partial_result_lists_requested_items_only() {
    let (service, actor) = setup();
    let order = create_order(
        &service,
        actor,
        vec![line(VariantId::new(), 5, 1), line(VariantId::new(), 5, 1), line(VariantId::new(), 5, 1)],
    )
    .await;
    let ids: Vec<_> = order.items().iter().map(|i| i.id).collect();

    let result = service
        .receive(ReceiveRequest::partial(
            order.id_typed(),
            actor,
            BTreeMap::from([(ids[2], 1), (ids[0], 0)]),
        ))
        .await
        .unwrap();

    let mut expected = vec![ids[0], ids[2]];
    expected.sort();
    let listed: Vec<_> = result.items.iter().map(|i| i.item_id).collect();
    assert_eq!(listed, expected);
    assert_eq!(result.adjustments_created, 1);
    assert_eq!(result.order_status, PurchaseOrderStatus::PartiallyReceived);
}

#[tokio::test]
async fn status_only_moves_forward_and_received_at_is_fixed() {
    let (service, actor) = setup();
    let order = create_order(&service, actor, vec![line(VariantId::new(), 9, 1)]).await;
    let item = order.items()[0].id;

    let mut first_received_at = None;
    let mut last_rank = order.status().rank();
    for qty in [2, 3, 0, 4, 5] {
        let result = service
            .receive(ReceiveRequest::partial(order.id_typed(), actor, BTreeMap::from([(item, qty)])))
            .await
            .unwrap();
        assert!(result.order_status.rank() >= last_rank);
        last_rank = result.order_status.rank();
        if first_received_at.is_none() {
            first_received_at = result.received_at;
        }
        assert_eq!(result.received_at, first_received_at);
    }

    let order = service.get_order(order.id_typed()).await.unwrap();
    assert_eq!(order.status(), PurchaseOrderStatus::Received);
    assert_eq!(order.items()[0].quantity_received, 9);
}

#[tokio::test]
async fn cancelled_orders_reject_receipts_without_side_effects() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    let order = create_order(&service, actor, vec![line(variant, 3, 1)]).await;
    let cancelled = service
        .cancel(order.id_typed(), actor, Some("supplier closed".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status(), PurchaseOrderStatus::Cancelled);

    let err = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap_err();
    assert!(matches!(err, ReceivingError::Conflict { .. }));
    assert!(!err.is_retryable());
    assert_eq!(service.store().ledger_len(), 0);
    assert!(matches!(
        service.get_variant_stock(variant).await,
        Err(ReceivingError::NotFound(_))
    ));

    let trail = service.audit_trail(order.id_typed()).await.unwrap();
    assert_eq!(trail.last().unwrap().action, AuditAction::Cancelled);
    assert_eq!(trail.last().unwrap().details["reason"], "supplier closed");
}

#[tokio::test]
async fn orders_with_receipts_cannot_be_cancelled() {
    let (service, actor) = setup();
    let order = create_order(&service, actor, vec![line(VariantId::new(), 3, 1)]).await;
    let item = order.items()[0].id;
    service
        .receive(ReceiveRequest::partial(order.id_typed(), actor, BTreeMap::from([(item, 1)])))
        .await
        .unwrap();

    let err = service.cancel(order.id_typed(), actor, None).await.unwrap_err();
    assert!(matches!(err, ReceivingError::Conflict { .. }));
    assert_eq!(
        service.get_order(order.id_typed()).await.unwrap().status(),
        PurchaseOrderStatus::PartiallyReceived
    );
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let (service, actor) = setup();
    let order = create_order(&service, actor, vec![line(VariantId::new(), 3, 1)]).await;
    let item = order.items()[0].id;

    let negative = service
        .receive(ReceiveRequest::partial(order.id_typed(), actor, BTreeMap::from([(item, -1)])))
        .await
        .unwrap_err();
    assert!(matches!(negative, ReceivingError::Validation(_)));

    let foreign = service
        .receive(ReceiveRequest::partial(
            order.id_typed(),
            actor,
            BTreeMap::from([(stockledger_purchasing::PurchaseOrderItemId::new(), 1)]),
        ))
        .await
        .unwrap_err();
    assert!(matches!(foreign, ReceivingError::Validation(_)));

    let missing = service
        .receive(ReceiveRequest::complete(PurchaseOrderId::new(), actor))
        .await
        .unwrap_err();
    assert!(matches!(missing, ReceivingError::NotFound(_)));

    assert_eq!(service.store().ledger_len(), 0);
}

#[tokio::test]
async fn drafts_can_be_ordered_and_received() {
    let (service, actor) = setup();
    let draft = service
        .create_purchase_order(
            NewPurchaseOrder {
                supplier_id: SupplierId::new(),
                items: vec![line(VariantId::new(), 2, 5)],
                submit: false,
            },
            actor,
        )
        .await
        .unwrap();
    assert_eq!(draft.status(), PurchaseOrderStatus::Draft);

    let ordered = service.mark_ordered(draft.id_typed(), actor).await.unwrap();
    assert_eq!(ordered.status(), PurchaseOrderStatus::Ordered);
    // Second call changes nothing.
    service.mark_ordered(draft.id_typed(), actor).await.unwrap();

    let result = service
        .receive(ReceiveRequest::complete(draft.id_typed(), actor).with_notes("dock 4"))
        .await
        .unwrap();
    assert_eq!(result.order_status, PurchaseOrderStatus::Received);

    let actions: Vec<_> = service
        .audit_trail(draft.id_typed())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![AuditAction::Created, AuditAction::StatusChanged, AuditAction::Received]
    );
}

#[tokio::test]
async fn receive_notes_land_in_the_audit_trail() {
    let (service, actor) = setup();
    let order = create_order(&service, actor, vec![line(VariantId::new(), 1, 1)]).await;
    service
        .receive(ReceiveRequest::complete(order.id_typed(), actor).with_notes("box crushed"))
        .await
        .unwrap();

    let trail = service.audit_trail(order.id_typed()).await.unwrap();
    let received = trail.iter().find(|e| e.action == AuditAction::Received).unwrap();
    assert_eq!(received.details["notes"], "box crushed");
    assert_eq!(received.actor, actor);
}

#[tokio::test]
async fn failed_commit_leaves_no_trace_and_retry_succeeds() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    seed_stock(&service, actor, variant, 50).await;
    let order = create_order(&service, actor, vec![line(variant, 10, 15)]).await;
    let ledger_rows = service.store().ledger_len();

    service.store().fail_next_commit();
    let err = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap_err();
    assert!(matches!(err, ReceivingError::Storage(_)));
    assert!(err.is_retryable());

    assert_eq!(service.store().ledger_len(), ledger_rows);
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 50);
    let unchanged = service.get_order(order.id_typed()).await.unwrap();
    assert_eq!(unchanged.status(), PurchaseOrderStatus::Ordered);
    assert_eq!(unchanged.total_received(), 0);
    assert!(unchanged.received_at().is_none());

    let retried = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap();
    assert_eq!(retried.order_status, PurchaseOrderStatus::Received);
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 60);
}

#[tokio::test]
async fn lock_held_past_timeout_is_a_retryable_conflict() {
    let store = InMemoryReceivingStore::with_lock_timeout(Duration::from_millis(30));
    let service = PurchasingService::new(store.clone());
    let actor = UserId::new();
    let order = create_order(&service, actor, vec![line(VariantId::new(), 4, 1)]).await;

    let mut holder = store.begin().await.unwrap();
    holder.lock_order(order.id_typed()).await.unwrap();

    let err = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap_err();
    assert!(matches!(err, ReceivingError::Conflict { retryable: true, .. }));

    holder.rollback().await.unwrap();
    let result = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap();
    assert_eq!(result.items[0].quantity_applied, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_full_receives_apply_each_unit_once() {
    let (service, actor) = setup();
    let service = Arc::new(service);
    let variant = VariantId::new();
    seed_stock(&service, actor, variant, 50).await;
    let order = create_order(&service, actor, vec![line(variant, 10, 15), line(variant, 5, 2)]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        let order_id = order.id_typed();
        handles.push(tokio::spawn(async move {
            service.receive(ReceiveRequest::complete(order_id, actor)).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        applied += handle.await.unwrap().unwrap().total_applied();
    }

    assert_eq!(applied, 15);
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 65);
    assert_stock_matches_ledger(service.store(), variant).await;
    assert!(service.cross_check(order.id_typed()).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn orders_sharing_a_variant_conserve_stock() {
    let (service, actor) = setup();
    let service = Arc::new(service);
    let variant = VariantId::new();

    let mut orders = Vec::new();
    for qty in [3, 4, 5, 6] {
        orders.push(create_order(&service, actor, vec![line(variant, qty, 1)]).await);
    }

    let mut handles = Vec::new();
    for order in &orders {
        let item = order.items()[0].id;
        let order_id = order.id_typed();
        for _ in 0..3 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .receive(ReceiveRequest::partial(order_id, actor, BTreeMap::from([(item, 2)])))
                    .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut expected = 0;
    for order in &orders {
        let current = service.get_order(order.id_typed()).await.unwrap();
        let received = current.total_received();
        assert_eq!(received, current.total_ordered().min(6));
        expected += received;
    }
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), expected);
    assert_stock_matches_ledger(service.store(), variant).await;
}

#[tokio::test]
async fn manual_adjustments_respect_the_ledger_rules() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    seed_stock(&service, actor, variant, 5).await;

    let receipt = NewAdjustment::purchase_receipt(
        variant,
        3,
        AdjustmentReference::new(AggregateId::new(), Some(AggregateId::new()), Uuid::now_v7()),
        actor,
        None,
    );
    assert!(matches!(
        service.record_adjustment(receipt).await,
        Err(ReceivingError::Validation(_))
    ));

    let oversell = NewAdjustment {
        variant_id: variant,
        adjustment_type: AdjustmentType::Sale,
        quantity: -6,
        reference: AdjustmentReference::new(AggregateId::new(), None, Uuid::now_v7()),
        reason: None,
        created_by: actor,
    };
    assert!(matches!(
        service.record_adjustment(oversell).await,
        Err(ReceivingError::Conflict { .. })
    ));
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 5);
    assert_stock_matches_ledger(service.store(), variant).await;
}

#[tokio::test]
async fn reconciler_detects_and_repairs_drift() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    let order = create_order(&service, actor, vec![line(variant, 8, 1)]).await;
    service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap();

    let checks = service.reconciler().check_all().await.unwrap();
    assert!(checks.iter().all(|c| c.is_consistent()));

    service.store().corrupt_stock(variant, 3);
    let drifted = service.reconciler().check_variant(variant).await.unwrap();
    assert_eq!(drifted.drift(), -5);

    let before = service.reconciler().rebuild_variant(variant).await.unwrap();
    assert_eq!(before.projected, Some(3));
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), 8);
    assert!(service.reconciler().check_variant(variant).await.unwrap().is_consistent());
}

#[tokio::test]
async fn receive_that_would_overflow_stock_is_rejected() {
    let (service, actor) = setup();
    let variant = VariantId::new();
    seed_stock(&service, actor, variant, i64::MAX - 5).await;
    let order = create_order(&service, actor, vec![line(variant, 10, 1)]).await;
    let ledger_rows = service.store().ledger_len();

    let err = service
        .receive(ReceiveRequest::complete(order.id_typed(), actor))
        .await
        .unwrap_err();

    assert!(matches!(err, ReceivingError::Conflict { retryable: false, .. }));
    assert!(!err.is_retryable());
    assert_eq!(service.get_variant_stock(variant).await.unwrap(), i64::MAX - 5);
    assert_eq!(service.store().ledger_len(), ledger_rows);
    let unchanged = service.get_order(order.id_typed()).await.unwrap();
    assert_eq!(unchanged.status(), PurchaseOrderStatus::Ordered);
    assert_eq!(unchanged.total_received(), 0);
}

#[tokio::test]
async fn order_with_overflowing_quantity_is_rejected() {
    let (service, actor) = setup();
    let err = service
        .create_purchase_order(
            NewPurchaseOrder {
                supplier_id: SupplierId::new(),
                items: vec![line(VariantId::new(), i64::MAX, 0), line(VariantId::new(), i64::MAX, 0)],
                submit: true,
            },
            actor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReceivingError::Validation(_)));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of partial and full receives, cached stock
        /// equals the ledger sum, every item stays within its ordered quantity
        /// and each item's received quantity equals its ledger rows.
        #[test]
        fn receives_conserve_stock(
            ordered in prop::collection::vec(1i64..15i64, 1..4),
            steps in prop::collection::vec((0usize..4, 0i64..20i64, any::<bool>()), 1..20)
        ) {
            runtime().block_on(async {
                let (service, actor) = setup();
                let variant = VariantId::new();
                let lines = ordered.iter().map(|q| line(variant, *q, 1)).collect();
                let order = create_order(&service, actor, lines).await;
                let ids: Vec<_> = order.items().iter().map(|i| i.id).collect();

                for (idx, qty, complete) in steps {
                    let request = if complete {
                        ReceiveRequest::complete(order.id_typed(), actor)
                    } else {
                        ReceiveRequest::partial(
                            order.id_typed(),
                            actor,
                            BTreeMap::from([(ids[idx % ids.len()], qty)]),
                        )
                    };
                    service.receive(request).await.unwrap();
                }

                let current = service.get_order(order.id_typed()).await.unwrap();
                for item in current.items() {
                    assert!(item.quantity_received <= item.quantity_ordered);
                }
                assert!(service.cross_check(order.id_typed()).await.unwrap().is_consistent());
                assert_stock_matches_ledger(service.store(), variant).await;
                assert_eq!(
                    service.store().ledger_sum_for_variant(variant).await.unwrap(),
                    current.total_received()
                );
            });
        }
    }
}
