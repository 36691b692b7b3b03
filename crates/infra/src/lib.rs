//! Infrastructure layer: storage backends, receiving orchestration, config.
//!
//! Domain rules live in `stockledger-purchasing` and `stockledger-inventory`;
//! this crate wires them to storage inside units of work.

pub mod config;
pub mod projections;
pub mod receiving;
pub mod service;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use projections::StockReconciler;
pub use receiving::{
    ItemReceipt, LineReconciliation, ReceiptReconciliation, ReceiveOrchestrator, ReceiveRequest,
    ReceiveResult, ReceivingError, SummaryAggregator,
};
pub use service::PurchasingService;
pub use store::{
    InMemoryReceivingStore, PostgresReceivingStore, ReceivingStore, StoreError, UnitOfWork,
};

#[cfg(test)]
mod integration_tests;
