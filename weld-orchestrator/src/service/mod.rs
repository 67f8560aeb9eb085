//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and gateways and contain the
//! domain logic: parameter resolution, run start, stop, commit statuses,
//! events and artifacts.

pub mod artifact;
pub mod commit_status;
pub mod event;
pub mod inherit;
pub mod interpolate;
pub mod parameters;
pub mod payload;
pub mod process;
pub mod run;
pub mod stop;

// Re-export for convenience
pub use artifact as artifact_service;
pub use commit_status as commit_status_service;
pub use event as event_service;
pub use run as run_service;
pub use stop as stop_service;

use crate::error::{Result, ResultExt};
use crate::repository::Transaction;

/// Commits `tx` when `result` is a success, rolls it back otherwise
pub(crate) async fn finish<T: Send>(tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await.context("commit")?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("Rollback failed: {}", rollback);
            }
            Err(err)
        }
    }
}
