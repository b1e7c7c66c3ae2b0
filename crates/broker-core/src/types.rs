//! Core data types shared by every collaborator interface and by
//! [`crate::state::IteratorState`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identity of a service instance, as assigned by the platform.
pub type Guid = String;

/// A service instance known to the platform.
///
/// Identity is the GUID; the remaining fields are metadata carried along
/// for canary selection and reporting. Instances are immutable within an
/// iteration except when [`crate::instance_lister::InstanceLister::latest_instance_info`]
/// returns a refreshed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub guid: Guid,
    pub plan_unique_id: String,
    #[serde(default)]
    pub space_guid: Option<String>,
    #[serde(default)]
    pub org_guid: Option<String>,
}

impl Instance {
    pub fn new(guid: impl Into<String>, plan_unique_id: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            plan_unique_id: plan_unique_id.into(),
            space_guid: None,
            org_guid: None,
        }
    }
}

/// The BOSH operation to trigger against an instance.
///
/// New operation types may be added without changing the iterator: it only
/// ever treats this as an opaque label to pass to the Triggerer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Upgrade,
    Recreate,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Upgrade => "upgrade",
            OperationType::Recreate => "recreate",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle correlating a triggered BOSH task with later polls.
///
/// Produced by a [`crate::triggerer::Triggerer`], consumed by a
/// [`crate::state_checker::StateChecker`]. The iterator never inspects its
/// fields beyond `bosh_task_id`, which it surfaces in the `WaitingFor`
/// listener event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub bosh_task_id: i64,
    pub operation_type: OperationType,
    #[serde(default)]
    pub bosh_context_id: Option<String>,
}

/// Tag describing the result of triggering or polling an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeTag {
    Accepted,
    OrphanDeployment,
    InstanceNotFound,
    OperationAlreadyInProgress,
    OperationSucceeded,
    OperationFailed,
    OperationPending,
    OperationSkipped,
}

impl OutcomeTag {
    /// Whether this tag is a terminal status for the owning entry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutcomeTag::OrphanDeployment
                | OutcomeTag::InstanceNotFound
                | OutcomeTag::OperationSucceeded
                | OutcomeTag::OperationFailed
                | OutcomeTag::OperationSkipped
        )
    }
}

impl std::fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeTag::Accepted => "accepted",
            OutcomeTag::OrphanDeployment => "orphan_deployment",
            OutcomeTag::InstanceNotFound => "instance_not_found",
            OutcomeTag::OperationAlreadyInProgress => "operation_already_in_progress",
            OutcomeTag::OperationSucceeded => "operation_succeeded",
            OutcomeTag::OperationFailed => "operation_failed",
            OutcomeTag::OperationPending => "operation_pending",
            OutcomeTag::OperationSkipped => "operation_skipped",
        };
        f.write_str(s)
    }
}

/// Result of triggering or polling an operation against an instance.
///
/// A tagged variant, not a free-form string: every collaborator that
/// produces one of these commits to exactly the cases the iterator knows
/// how to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub tag: OutcomeTag,
    pub handle: Option<OperationHandle>,
    pub description: Option<String>,
}

impl OperationOutcome {
    pub fn new(tag: OutcomeTag) -> Self {
        Self {
            tag,
            handle: None,
            description: None,
        }
    }

    pub fn with_handle(mut self, handle: OperationHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Tag-map filter used to select a canary subset from the fleet.
///
/// `BTreeMap` (rather than `HashMap`) so filter contents format
/// deterministically in error messages and logs.
pub type CanarySelectionParams = BTreeMap<String, String>;

/// Counts derived from an [`crate::state::IteratorState`] at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub orphaned: usize,
    pub succeeded: usize,
    pub busy: usize,
    pub deleted: usize,
    pub failed: usize,
}
