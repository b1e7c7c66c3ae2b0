//! The driver loop: glues the collaborators and [`crate::state::IteratorState`]
//! together into a bounded-concurrency, retry-driven pipeline with a canary
//! phase and a main phase.
//!
//! Runs as a single `tokio` task -- no `tokio::spawn` inside this module.
//! Parallelism over the fleet comes from tracking up to `max_in_flight`
//! outstanding remote operations in [`crate::state::IteratorState`], not
//! from spawning a worker per instance; each collaborator call here is
//! awaited in sequence, and the remote operation it kicks off runs
//! asynchronously on the cluster manager, not on this task.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::{AggregateError, InstanceFailure, IterateError};
use crate::instance_lister::{InstanceLister, ListerError};
use crate::listener::{FinishOutcome, Listener};
use crate::sleeper::Sleeper;
use crate::state::{EntryStatus, IteratorState};
use crate::state_checker::StateChecker;
use crate::triggerer::Triggerer;
use crate::types::{CanarySelectionParams, Guid, Instance, OutcomeTag};

/// Fleet-wide driver: walks every instance, triggers an operation, and
/// tracks each to completion under partial failure, retry, and quota
/// pressure. See [`crate::builder::Builder`] for construction.
pub struct Iterator {
    pub(crate) lister: Arc<dyn InstanceLister>,
    pub(crate) triggerer: Arc<dyn Triggerer>,
    pub(crate) state_checker: Arc<dyn StateChecker>,
    pub(crate) listener: Arc<dyn Listener>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) max_in_flight: usize,
    pub(crate) canaries: usize,
    pub(crate) canary_selection_params: CanarySelectionParams,
    pub(crate) polling_interval: Duration,
    pub(crate) attempt_interval: Duration,
    pub(crate) attempt_limit: usize,
    pub(crate) cancellation: CancellationToken,
}

impl Iterator {
    /// Constructed only through [`crate::builder::Builder`], which is
    /// responsible for validating the configuration fields below.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        lister: Arc<dyn InstanceLister>,
        triggerer: Arc<dyn Triggerer>,
        state_checker: Arc<dyn StateChecker>,
        listener: Arc<dyn Listener>,
        sleeper: Arc<dyn Sleeper>,
        max_in_flight: usize,
        canaries: usize,
        canary_selection_params: CanarySelectionParams,
        polling_interval: Duration,
        attempt_interval: Duration,
        attempt_limit: usize,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            lister,
            triggerer,
            state_checker,
            listener,
            sleeper,
            max_in_flight,
            canaries,
            canary_selection_params,
            polling_interval,
            attempt_interval,
            attempt_limit,
            cancellation,
        }
    }

    /// Run the fleet-wide operation to completion or failure.
    pub async fn iterate(&self) -> Result<(), IterateError> {
        self.listener.starting(self.max_in_flight);

        let all_instances = match self.lister.instances().await {
            Ok(instances) => instances,
            Err(err) => {
                self.listener.finished(0, 0, 0, &[], &[]);
                return Err(IterateError::Listing(err.into()));
            }
        };

        let canary_instances = match self.select_canaries(&all_instances).await {
            Ok(instances) => instances,
            Err(err) => {
                self.listener.finished(0, 0, 0, &[], &[]);
                return Err(err);
            }
        };
        let canary_target = canary_instances.len();

        self.listener.instances_to_process(&all_instances);

        let mut state = match IteratorState::new(&canary_instances, all_instances, canary_target) {
            Ok(state) => state,
            Err(err) => {
                self.listener.finished(0, 0, 0, &[], &[]);
                return Err(IterateError::Listing(err.into()));
            }
        };

        if canary_target > 0 {
            self.listener
                .canaries_starting(canary_target, &self.canary_selection_params);
            if let Err(err) = self.run_attempt_loop(&mut state, true).await {
                self.emit_finished(&state);
                return Err(err);
            }
            self.listener.canaries_finished();
            state.mark_canaries_completed();
        }

        let result = self.run_attempt_loop(&mut state, false).await;
        self.emit_finished(&state);
        result
    }

    /// Resolve the canary subset per §4.3: filter-based selection if
    /// `canary_selection_params` is non-empty, else the first `canaries`
    /// of the full fleet, else none.
    async fn select_canaries(&self, all_instances: &[Instance]) -> Result<Vec<Instance>, IterateError> {
        if !self.canary_selection_params.is_empty() {
            let filtered = self
                .lister
                .filtered_instances(&self.canary_selection_params)
                .await
                .map_err(|err| IterateError::Listing(err.into()))?;
            if filtered.is_empty() && !all_instances.is_empty() {
                return Err(IterateError::NoCanaryMatch {
                    params: format_canary_params(&self.canary_selection_params),
                });
            }
            let target = self.canaries.min(filtered.len());
            Ok(filtered.into_iter().take(target).collect())
        } else if self.canaries > 0 {
            let target = self.canaries.min(all_instances.len());
            Ok(all_instances.iter().take(target).cloned().collect())
        } else {
            Ok(Vec::new())
        }
    }

    /// One phase's worth of attempts: rewind, trigger/poll until quiescent,
    /// report progress, repeat until the phase is complete or the attempt
    /// limit is exhausted, then check for leftover busy instances.
    async fn run_attempt_loop(&self, state: &mut IteratorState, is_canary: bool) -> Result<(), IterateError> {
        for attempt in 1..=self.attempt_limit {
            if self.cancellation.is_cancelled() {
                return Err(IterateError::Interrupted);
            }

            state.rewind_and_reset_busy_instances();
            if is_canary {
                self.listener
                    .retry_canaries_attempt(attempt, self.attempt_limit, state.outstanding_canary_count());
            } else {
                self.listener.retry_attempt(attempt, self.attempt_limit);
            }

            loop {
                if !state.has_instances_to_process() {
                    break;
                }

                if self.cancellation.is_cancelled() {
                    // No new triggers past this point; anything already in
                    // flight keeps running on the remote system, we just
                    // stop watching it.
                    return Err(IterateError::Interrupted);
                }

                if !state.has_failures() {
                    if let Some(failure) = self.trigger_operations(state, is_canary).await {
                        state.record_failure(failure);
                    }
                }

                for failure in self.poll_running_tasks(state).await {
                    state.record_failure(failure);
                }

                if state.count_in_progress_instances() > 0 {
                    self.sleeper.sleep(self.polling_interval).await;
                    continue;
                }

                if state.has_failures() {
                    return Err(IterateError::Aggregate(AggregateError::new(
                        state.take_failures(),
                        is_canary,
                    )));
                }

                if is_canary && state.current_phase_is_complete() {
                    return Ok(());
                }

                break;
            }

            self.report_progress(state);

            if state.current_phase_is_complete() {
                break;
            }

            self.sleeper.sleep(self.attempt_interval).await;
        }

        self.check_still_busy(state, is_canary)
    }

    /// Trigger new operations up to the available parallelism. Returns the
    /// first trigger failure, if any -- triggering stops at the first one
    /// (P6); in-flight operations are still polled afterwards.
    ///
    /// `needed` counts only instances that actually become `Accepted`: a
    /// tag other than `Accepted` does not consume a parallelism slot, so
    /// the loop keeps pulling from `next_pending()` until `needed`
    /// instances are accepted or the pending pool is exhausted.
    async fn trigger_operations(&self, state: &mut IteratorState, is_canary: bool) -> Option<InstanceFailure> {
        let mut needed = self.max_in_flight.saturating_sub(state.count_in_progress_instances());
        if is_canary {
            needed = needed.min(state.outstanding_canary_count());
        }
        let phase_total = state.count_instances_in_current_phase();

        let mut accepted_count = 0;
        while accepted_count < needed {
            let Some(instance) = state.next_pending() else {
                break;
            };
            let guid = instance.guid.clone();
            let index = state.phase_index_of(&guid);
            self.listener
                .instance_operation_starting(&guid, index, phase_total, is_canary);

            let refreshed = match self.lister.latest_instance_info(&instance).await {
                Ok(refreshed) => refreshed,
                Err(ListerError::NotFound) => {
                    state.set_state(&guid, EntryStatus::InstanceNotFound);
                    self.listener
                        .instance_operation_start_result(&guid, OutcomeTag::InstanceNotFound);
                    continue;
                }
                Err(ListerError::Other(_)) => {
                    self.listener.failed_to_refresh_instance_info(&guid);
                    instance
                }
            };

            let outcome = match self.triggerer.trigger_operation(&refreshed).await {
                Ok(outcome) => outcome,
                Err(err) => return Some(InstanceFailure { guid, error: err }),
            };

            if let Some(handle) = outcome.handle.clone() {
                state.set_operation(&guid, handle.clone());
                if let Some(description) = &outcome.description {
                    state.set_description(&guid, description.clone());
                }
                if outcome.tag == OutcomeTag::Accepted {
                    state.set_state(&guid, EntryStatus::Accepted);
                    self.listener.instance_operation_start_result(&guid, outcome.tag);
                    self.listener.waiting_for(&guid, handle.bosh_task_id);
                    accepted_count += 1;
                    continue;
                }
            }

            state.set_state(&guid, entry_status_from_tag(outcome.tag));
            self.listener.instance_operation_start_result(&guid, outcome.tag);
        }

        None
    }

    /// Poll every in-flight entry once. Returns any newly observed
    /// per-instance failures; succeeded/failed entries are set terminal
    /// directly rather than returned.
    async fn poll_running_tasks(&self, state: &mut IteratorState) -> Vec<InstanceFailure> {
        let mut failures = Vec::new();

        for instance in state.in_progress_instances() {
            let guid = instance.guid.clone();
            let Some(handle) = state.get_operation(&guid) else {
                continue;
            };

            match self.state_checker.check(&guid, &handle).await {
                Err(err) => {
                    state.set_state(&guid, EntryStatus::Failed);
                    failures.push(InstanceFailure { guid, error: err });
                }
                Ok(outcome) => match outcome.tag {
                    OutcomeTag::OperationSucceeded => {
                        state.set_state(&guid, EntryStatus::Succeeded);
                        self.listener.instance_operation_finished(&guid, FinishOutcome::Success);
                    }
                    OutcomeTag::OperationFailed => {
                        state.set_state(&guid, EntryStatus::Failed);
                        let description = outcome.description.clone().unwrap_or_default();
                        let bosh_task_id = handle.bosh_task_id;
                        self.listener.instance_operation_finished(&guid, FinishOutcome::Failure);
                        failures.push(InstanceFailure {
                            guid,
                            error: anyhow::anyhow!("bosh task {bosh_task_id}: {description}"),
                        });
                    }
                    other => {
                        state.set_state(&guid, entry_status_from_tag(other));
                    }
                },
            }
        }

        failures
    }

    fn report_progress(&self, state: &IteratorState) {
        let summary = state.summary();
        self.listener.progress(
            self.attempt_interval,
            summary.orphaned,
            summary.succeeded,
            summary.busy,
            summary.deleted,
        );
    }

    fn emit_finished(&self, state: &IteratorState) {
        let summary = state.summary();
        let busy = state.get_guids_in_states(&[EntryStatus::Busy]);
        let failed = state.get_guids_in_states(&[EntryStatus::Failed]);
        self.listener
            .finished(summary.orphaned, summary.succeeded, summary.deleted, &busy, &failed);
    }

    fn check_still_busy(&self, state: &IteratorState, is_canary: bool) -> Result<(), IterateError> {
        let busy: Vec<Guid> = state.get_guids_in_states(&[EntryStatus::Busy]);
        if busy.is_empty() {
            return Ok(());
        }
        if is_canary {
            Err(IterateError::CanariesStillBusy {
                attempted: state.canary_target(),
                processed: state.canary_target() - busy.len(),
            })
        } else {
            Err(IterateError::StillBusy(busy))
        }
    }
}

fn entry_status_from_tag(tag: OutcomeTag) -> EntryStatus {
    match tag {
        OutcomeTag::Accepted => EntryStatus::Accepted,
        OutcomeTag::OrphanDeployment => EntryStatus::OrphanDeployment,
        OutcomeTag::InstanceNotFound => EntryStatus::InstanceNotFound,
        OutcomeTag::OperationAlreadyInProgress => EntryStatus::Busy,
        OutcomeTag::OperationSucceeded => EntryStatus::Succeeded,
        OutcomeTag::OperationFailed => EntryStatus::Failed,
        OutcomeTag::OperationPending => EntryStatus::InProgress,
        OutcomeTag::OperationSkipped => EntryStatus::Skipped,
    }
}

fn format_canary_params(params: &CanarySelectionParams) -> String {
    let parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    format!("{{{}}}", parts.join(", "))
}
