//! Receiving pipeline: apply supplier deliveries to purchase orders and stock.

pub mod error;
pub mod orchestrator;
pub mod summary;

pub use error::ReceivingError;
pub use orchestrator::{ItemReceipt, ReceiveOrchestrator, ReceiveRequest, ReceiveResult};
pub use summary::{LineReconciliation, ReceiptReconciliation, SummaryAggregator};

use tracing::warn;

use crate::store::UnitOfWork;

/// Commit on success, roll back on failure.
///
/// A failed rollback is logged and the original error returned.
pub(crate) async fn finish<U, T>(tx: U, outcome: Result<T, ReceivingError>) -> Result<T, ReceivingError>
where
    U: UnitOfWork,
{
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, original = %err, "rollback failed");
            }
            Err(err)
        }
    }
}
