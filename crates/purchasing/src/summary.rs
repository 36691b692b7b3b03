use serde::{Deserialize, Serialize};

use crate::order::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};

/// Receiving progress of one purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivingSummary {
    pub purchase_order_id: PurchaseOrderId,
    pub order_number: String,
    pub status: PurchaseOrderStatus,
    pub total_items: usize,
    pub total_ordered: i64,
    pub total_received: i64,
    pub total_outstanding: i64,
    /// Percentage received, rounded to two decimal places.
    pub percent_received: f64,
}

impl ReceivingSummary {
    pub fn from_order(order: &PurchaseOrder) -> Self {
        let total_ordered = order.total_ordered();
        let total_received = order.total_received();
        let percent = if order.status() == PurchaseOrderStatus::Received {
            100.0
        } else {
            percent_received(total_received, total_ordered)
        };

        Self {
            purchase_order_id: order.id_typed(),
            order_number: order.order_number().to_string(),
            status: order.status(),
            total_items: order.items().len(),
            total_ordered,
            total_received,
            total_outstanding: total_ordered - total_received,
            percent_received: percent,
        }
    }
}

/// `received / ordered * 100`, rounded to two decimals. Zero when nothing is ordered.
pub fn percent_received(received: i64, ordered: i64) -> f64 {
    if ordered <= 0 {
        return 0.0;
    }
    let basis_points = (received as f64 * 10_000.0 / ordered as f64).round();
    basis_points / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::test_order;
    use chrono::Utc;

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(percent_received(4, 10), 40.0);
        assert_eq!(percent_received(1, 3), 33.33);
        assert_eq!(percent_received(2, 3), 66.67);
        assert_eq!(percent_received(0, 0), 0.0);
    }

    #[test]
    fn summary_tracks_partial_progress() {
        let mut order = test_order(&[10]);
        let item = order.items()[0].id;
        order.apply_receipt(item, 4, Utc::now()).unwrap();

        let summary = ReceivingSummary::from_order(&order);
        assert_eq!(summary.total_items, 1);
        assert_eq!(summary.total_ordered, 10);
        assert_eq!(summary.total_received, 4);
        assert_eq!(summary.total_outstanding, 6);
        assert_eq!(summary.percent_received, 40.0);
        assert_eq!(summary.status, PurchaseOrderStatus::PartiallyReceived);
    }

    #[test]
    fn received_orders_report_exactly_one_hundred() {
        let mut order = test_order(&[3, 7]);
        let ids: Vec<_> = order.items().iter().map(|i| (i.id, i.quantity_ordered)).collect();
        for (id, qty) in ids {
            order.apply_receipt(id, qty, Utc::now()).unwrap();
        }
        assert_eq!(ReceivingSummary::from_order(&order).percent_received, 100.0);
    }
}
