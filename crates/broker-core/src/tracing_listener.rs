//! The default [`Listener`]: one structured `tracing` line per event.
//!
//! Lifecycle events log at `info`; refresh failures (a transient,
//! self-healing condition) log at `warn`. `tracing`'s macros are
//! thread-safe by construction, so this implementation needs no locking
//! of its own even though `Listener` only promises single-thread calls.

use std::time::Duration;

use tracing::{info, warn};

use crate::listener::{FinishOutcome, Listener};
use crate::types::{CanarySelectionParams, Guid, Instance, OutcomeTag};

/// Emits every [`Listener`] event as a `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl Listener for TracingListener {
    fn starting(&self, max_in_flight: usize) {
        info!(max_in_flight, "starting iteration");
    }

    fn retry_attempt(&self, attempt_num: usize, limit: usize) {
        info!(attempt_num, limit, "retry attempt");
    }

    fn retry_canaries_attempt(&self, attempt_num: usize, limit: usize, remaining_canaries: usize) {
        info!(attempt_num, limit, remaining_canaries, "retry canaries attempt");
    }

    fn canaries_starting(&self, canary_count: usize, filter: &CanarySelectionParams) {
        info!(canary_count, ?filter, "canaries starting");
    }

    fn canaries_finished(&self) {
        info!("canaries finished");
    }

    fn instances_to_process(&self, instances: &[Instance]) {
        info!(count = instances.len(), "instances to process");
    }

    fn instance_operation_starting(&self, guid: &Guid, index: usize, total_in_phase: usize, is_canary: bool) {
        info!(guid = %guid, index, total_in_phase, is_canary, "instance operation starting");
    }

    fn instance_operation_start_result(&self, guid: &Guid, tag: OutcomeTag) {
        info!(guid = %guid, %tag, "instance operation start result");
    }

    fn waiting_for(&self, guid: &Guid, bosh_task_id: i64) {
        info!(guid = %guid, bosh_task_id, "waiting for bosh task");
    }

    fn instance_operation_finished(&self, guid: &Guid, outcome: FinishOutcome) {
        info!(guid = %guid, %outcome, "instance operation finished");
    }

    fn failed_to_refresh_instance_info(&self, guid: &Guid) {
        warn!(guid = %guid, "failed to refresh instance info, continuing with stale data");
    }

    fn progress(
        &self,
        attempt_interval: Duration,
        orphaned: usize,
        processed: usize,
        to_retry: usize,
        deleted: usize,
    ) {
        info!(
            attempt_interval_secs = attempt_interval.as_secs(),
            orphaned, processed, to_retry, deleted, "progress"
        );
    }

    fn finished(&self, orphaned: usize, finished: usize, deleted: usize, busy: &[Guid], failed: &[Guid]) {
        info!(
            orphaned,
            finished,
            deleted,
            busy = ?busy,
            failed = ?failed,
            "finished"
        );
    }
}
