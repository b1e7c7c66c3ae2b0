//! The polling collaborator: asks for the latest status of an in-flight
//! operation.

use async_trait::async_trait;

use crate::types::{Guid, OperationHandle, OperationOutcome};

/// Polls the latest status of a previously triggered operation.
///
/// Must be idempotent and side-effect-free on the remote system: the
/// iterator may call `check` many times for the same handle while an
/// operation is in flight.
#[async_trait]
pub trait StateChecker: Send + Sync {
    async fn check(&self, guid: &Guid, handle: &OperationHandle) -> anyhow::Result<OperationOutcome>;
}
