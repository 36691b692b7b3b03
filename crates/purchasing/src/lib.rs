//! Purchasing domain module (purchase orders and their receiving lifecycle).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no storage). Infrastructure loads an order,
//! asks it what a receipt would change, writes the ledger, and persists the order.

pub mod audit;
pub mod order;
pub mod receipt;
pub mod summary;

pub use audit::{AuditAction, PurchaseOrderAuditEntry};
pub use order::{
    NewLineItem, NewPurchaseOrder, ProductId, PurchaseOrder, PurchaseOrderId, PurchaseOrderItem,
    PurchaseOrderItemId, PurchaseOrderRecord, PurchaseOrderStatus, SupplierId,
};
pub use receipt::{ItemQuantities, ReceiptLine, ReceiptPlan, validate_item_quantities};
pub use summary::{ReceivingSummary, percent_received};
