//! Inventory domain module: the adjustment ledger and the stock projection.
//!
//! This crate contains business rules for stock movements, implemented purely as
//! deterministic domain logic (no IO, no storage). The ledger is the source of
//! truth; [`VariantStock`] is a cache that must always equal the ledger sum.

pub mod adjustment;
pub mod ledger;
pub mod stock;

pub use adjustment::{
    AdjustmentId, AdjustmentReference, AdjustmentType, InventoryAdjustment, NewAdjustment,
};
pub use ledger::{StockCheck, sum_deltas, sum_for_line};
pub use stock::{VariantId, VariantStock};
