//! Stock queries and projection maintenance.

use serde_json::json;

use stockledger_inventory::VariantId;

use super::{print_json, service};

pub async fn show(variant_id: VariantId) -> anyhow::Result<()> {
    let quantity = service().await?.get_variant_stock(variant_id).await?;
    print_json(&json!({ "variant_id": variant_id, "quantity": quantity }))
}

pub async fn reconcile(repair: bool) -> anyhow::Result<()> {
    let service = service().await?;
    let reconciler = service.reconciler();

    let checks = reconciler.check_all().await?;
    let drifted: Vec<_> = checks.iter().filter(|c| !c.is_consistent()).copied().collect();
    tracing::info!(variants = checks.len(), drifted = drifted.len(), "reconciliation finished");

    if repair {
        for check in &drifted {
            reconciler.rebuild_variant(check.variant_id).await?;
        }
    }

    print_json(&json!({
        "checked": checks.len(),
        "drifted": drifted,
        "repaired": repair,
    }))
}
