//! The reporting sink: fan-out of lifecycle events emitted by the iterator.
//!
//! `Listener` methods are synchronous and must return promptly -- they are
//! called inline from the iterator's single thread of control between
//! collaborator awaits, never spawned off. An implementation that wants to
//! forward events elsewhere (a channel, a metrics sink) is responsible for
//! its own synchronization; the iterator guarantees only that calls happen
//! in event order and never interleave with another event for the same
//! GUID mid-flight.

use std::time::Duration;

use crate::types::{CanarySelectionParams, Guid, Instance, OutcomeTag};

/// Whether a finished operation succeeded or failed, as reported to
/// [`Listener::instance_operation_finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    Success,
    Failure,
}

impl std::fmt::Display for FinishOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FinishOutcome::Success => "success",
            FinishOutcome::Failure => "failure",
        })
    }
}

/// Fan-out sink for iterator lifecycle events. See §6 of the design for the
/// full event table and ordering guarantees.
pub trait Listener: Send + Sync {
    fn starting(&self, max_in_flight: usize);

    fn retry_attempt(&self, attempt_num: usize, limit: usize);

    fn retry_canaries_attempt(&self, attempt_num: usize, limit: usize, remaining_canaries: usize);

    fn canaries_starting(&self, canary_count: usize, filter: &CanarySelectionParams);

    fn canaries_finished(&self);

    fn instances_to_process(&self, instances: &[Instance]);

    fn instance_operation_starting(
        &self,
        guid: &Guid,
        index: usize,
        total_in_phase: usize,
        is_canary: bool,
    );

    fn instance_operation_start_result(&self, guid: &Guid, tag: OutcomeTag);

    fn waiting_for(&self, guid: &Guid, bosh_task_id: i64);

    fn instance_operation_finished(&self, guid: &Guid, outcome: FinishOutcome);

    fn failed_to_refresh_instance_info(&self, guid: &Guid);

    fn progress(
        &self,
        attempt_interval: Duration,
        orphaned: usize,
        processed: usize,
        to_retry: usize,
        deleted: usize,
    );

    fn finished(
        &self,
        orphaned: usize,
        finished: usize,
        deleted: usize,
        busy: &[Guid],
        failed: &[Guid],
    );
}
