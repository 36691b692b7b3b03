//! Storage boundary for purchase orders, the stock ledger and the stock projection.
//!
//! Two implementations share one trait pair:
//! - `in_memory`: tests and local runs
//! - `postgres`: production, row locks and server-side increments

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryReceivingStore, InMemoryUnitOfWork};
pub use postgres::{PostgresReceivingStore, PostgresUnitOfWork};
pub use r#trait::{ReceivingStore, StoreError, UnitOfWork};
