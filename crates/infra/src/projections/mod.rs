//! Projection maintenance.
//!
//! The stock projection is written co-transactionally with the ledger; this
//! module only checks and repairs it.

pub mod stock;

pub use stock::StockReconciler;
