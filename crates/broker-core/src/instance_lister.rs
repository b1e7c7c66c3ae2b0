//! The fleet-listing collaborator: a read-only view of the instances the
//! platform knows about.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{CanarySelectionParams, Instance};

/// Errors an [`InstanceLister`] can return.
///
/// [`ListerError::NotFound`] is the one sentinel the iterator interprets
/// specially: it means the instance was deleted out from under the
/// iteration, not that the refresh call itself failed.
#[derive(Debug, Error)]
pub enum ListerError {
    #[error("instance not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Read-only view of the fleet.
///
/// Implementations must not mutate platform state; the iterator relies on
/// being able to call `latest_instance_info` repeatedly without
/// side effects.
#[async_trait]
pub trait InstanceLister: Send + Sync {
    /// List every instance the platform currently knows about.
    async fn instances(&self) -> Result<Vec<Instance>, ListerError>;

    /// List instances matching a tag filter, used to select canaries.
    ///
    /// An empty `filter` is never passed by the iterator (see
    /// [`crate::builder::Builder`]'s canary-selection rules); a filter
    /// implementation is free to treat one as "match nothing" regardless.
    async fn filtered_instances(
        &self,
        filter: &CanarySelectionParams,
    ) -> Result<Vec<Instance>, ListerError>;

    /// Re-fetch the latest known state of a single instance.
    ///
    /// Returns [`ListerError::NotFound`] if the instance has since been
    /// deleted; the iterator treats that as a terminal `InstanceNotFound`
    /// outcome rather than a trigger failure.
    async fn latest_instance_info(&self, instance: &Instance) -> Result<Instance, ListerError>;
}
