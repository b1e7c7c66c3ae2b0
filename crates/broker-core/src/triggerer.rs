//! The trigger collaborator: starts a long-running BOSH operation for one
//! instance.

use async_trait::async_trait;

use crate::types::{Instance, OperationOutcome};

/// Begins an operation (upgrade, recreate, ...) against a single instance.
///
/// Pure-function semantics from the iterator's point of view: calling it
/// twice for the same instance in the same process is meaningless (the
/// iterator never does so -- see invariant P3), and the concrete
/// implementation (which operation type to send) is selected once, at
/// [`crate::builder::Builder`] time.
#[async_trait]
pub trait Triggerer: Send + Sync {
    async fn trigger_operation(&self, instance: &Instance) -> anyhow::Result<OperationOutcome>;
}
