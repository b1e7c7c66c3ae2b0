//! The iterator's pure, in-memory state machine over the working set.
//!
//! `IteratorState` is the sole mutator of per-instance status during an
//! iteration. Concentrating transitions behind one object keeps
//! state-shape bugs out of the driver in [`crate::iterator`] and makes the
//! driver trivially testable: inject fakes for the four collaborator
//! traits plus a state built straight from literal instances.
//!
//! Mutation is confined to a single thread (this codebase calls it
//! single-threaded cooperative, see the crate's concurrency notes); there
//! is deliberately no `Arc<Mutex<_>>` here.

use std::collections::HashMap;

use thiserror::Error;

use crate::errors::InstanceFailure;
use crate::types::{Guid, Instance, OperationHandle, Summary};

/// Status of a single working-set entry.
///
/// Terminal statuses (`Succeeded`, `Failed`, `OrphanDeployment`,
/// `InstanceNotFound`, `Deleted`, `Skipped`) never transition again.
/// `Busy` is transient, cleared back to `Pending` by
/// [`IteratorState::rewind_and_reset_busy_instances`]. `Accepted` is a
/// transient label set by the triggerer; the first successful poll
/// replaces it with whatever the state checker reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    InProgress,
    Accepted,
    Succeeded,
    Failed,
    OrphanDeployment,
    InstanceNotFound,
    Busy,
    Deleted,
    Skipped,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryStatus::Succeeded
                | EntryStatus::Failed
                | EntryStatus::OrphanDeployment
                | EntryStatus::InstanceNotFound
                | EntryStatus::Deleted
                | EntryStatus::Skipped
        )
    }

    /// Whether the entry counts against `max_in_flight` and is eligible to
    /// be polled. The spec treats `Accepted` and `InProgress` as the same
    /// "in flight" concept; this crate keeps them as distinct variants
    /// (for `Finished`/summary reporting) but collapses them here.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, EntryStatus::Accepted | EntryStatus::InProgress)
    }
}

/// One working-set instance tracked by [`IteratorState`].
#[derive(Debug, Clone)]
pub struct InstanceEntry {
    pub instance: Instance,
    pub is_canary: bool,
    pub status: EntryStatus,
    pub handle: Option<OperationHandle>,
    pub last_description: String,
}

/// Canary vs. main: which subset of the working set is currently eligible
/// for triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Canary,
    Main,
}

/// Raised by [`IteratorState::new`] when the canary subset is not a subset
/// of the full fleet by GUID.
#[derive(Debug, Error)]
#[error("canary instance {0} is not present in the full instance listing")]
pub struct CanaryNotInFleet(pub Guid);

/// The iterator's in-memory state: an ordered entry table, the current
/// phase, and a cursor used by [`IteratorState::next_pending`].
pub struct IteratorState {
    entries: Vec<InstanceEntry>,
    index_by_guid: HashMap<Guid, usize>,
    phase: Phase,
    cursor: usize,
    canary_target: usize,
    /// Per-instance failures recorded during the current attempt. Cleared
    /// by [`IteratorState::rewind_and_reset_busy_instances`] at the start
    /// of each attempt.
    failures: Vec<InstanceFailure>,
}

impl IteratorState {
    /// Partition `all_instances` into canary/non-canary entries, marking
    /// every GUID in `canary_instances` as a canary.
    ///
    /// Fails if `canary_instances` is not a subset of `all_instances` by
    /// GUID. Phase begins `Canary` iff `canary_target > 0`, else `Main`.
    pub fn new(
        canary_instances: &[Instance],
        all_instances: Vec<Instance>,
        canary_target: usize,
    ) -> Result<Self, CanaryNotInFleet> {
        let all_guids: std::collections::HashSet<&Guid> =
            all_instances.iter().map(|i| &i.guid).collect();
        for canary in canary_instances {
            if !all_guids.contains(&canary.guid) {
                return Err(CanaryNotInFleet(canary.guid.clone()));
            }
        }

        let canary_guids: std::collections::HashSet<&Guid> =
            canary_instances.iter().map(|i| &i.guid).collect();

        let mut entries = Vec::with_capacity(all_instances.len());
        let mut index_by_guid = HashMap::with_capacity(all_instances.len());
        for instance in all_instances {
            index_by_guid.insert(instance.guid.clone(), entries.len());
            entries.push(InstanceEntry {
                is_canary: canary_guids.contains(&instance.guid),
                instance,
                status: EntryStatus::Pending,
                handle: None,
                last_description: String::new(),
            });
        }

        let phase = if canary_target > 0 {
            Phase::Canary
        } else {
            Phase::Main
        };

        Ok(Self {
            entries,
            index_by_guid,
            phase,
            cursor: 0,
            canary_target,
            failures: Vec::new(),
        })
    }

    fn entry(&self, guid: &Guid) -> &InstanceEntry {
        &self.entries[self.index_by_guid[guid]]
    }

    fn entry_mut(&mut self, guid: &Guid) -> &mut InstanceEntry {
        let idx = self.index_by_guid[guid];
        &mut self.entries[idx]
    }

    /// Whether an entry belongs to the working set of the current phase:
    /// canaries during `Phase::Canary`, everyone else during `Phase::Main`.
    fn in_current_phase(&self, entry: &InstanceEntry) -> bool {
        match self.phase {
            Phase::Canary => entry.is_canary,
            Phase::Main => !entry.is_canary,
        }
    }

    pub fn all_instances(&self) -> Vec<Instance> {
        self.entries.iter().map(|e| e.instance.clone()).collect()
    }

    pub fn is_processing_canaries(&self) -> bool {
        self.phase == Phase::Canary
    }

    pub fn canary_target(&self) -> usize {
        self.canary_target
    }

    /// Canaries not yet in a terminal status.
    pub fn outstanding_canary_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.is_canary && !e.status.is_terminal())
            .count()
    }

    pub fn count_instances_in_current_phase(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| self.in_current_phase(e))
            .count()
    }

    pub fn count_in_progress_instances(&self) -> usize {
        self.entries.iter().filter(|e| e.status.is_in_flight()).count()
    }

    /// Advance the cursor to the next `Pending` entry in the current phase
    /// and return it, without mutating its status. Returns `None` once the
    /// cursor runs off the end.
    pub fn next_pending(&mut self) -> Option<Instance> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            if self.in_current_phase(entry) && matches!(entry.status, EntryStatus::Pending) {
                let instance = entry.instance.clone();
                self.cursor += 1;
                return Some(instance);
            }
            self.cursor += 1;
        }
        None
    }

    pub fn set_operation(&mut self, guid: &Guid, handle: OperationHandle) {
        self.entry_mut(guid).handle = Some(handle);
    }

    pub fn set_state(&mut self, guid: &Guid, status: EntryStatus) {
        self.entry_mut(guid).status = status;
    }

    pub fn set_description(&mut self, guid: &Guid, description: impl Into<String>) {
        self.entry_mut(guid).last_description = description.into();
    }

    pub fn in_progress_instances(&self) -> Vec<Instance> {
        self.entries
            .iter()
            .filter(|e| e.status.is_in_flight())
            .map(|e| e.instance.clone())
            .collect()
    }

    pub fn get_operation(&self, guid: &Guid) -> Option<OperationHandle> {
        self.entry(guid).handle.clone()
    }

    /// 1-based position of `guid` among entries eligible for the current
    /// phase, in lister order. Used only to label `InstanceOperationStarting`
    /// events; stable across retries since it does not depend on status.
    pub fn phase_index_of(&self, guid: &Guid) -> usize {
        self.entries
            .iter()
            .filter(|e| self.in_current_phase(e))
            .position(|e| &e.instance.guid == guid)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn get_guids_in_states(&self, statuses: &[EntryStatus]) -> Vec<Guid> {
        self.entries
            .iter()
            .filter(|e| statuses.contains(&e.status))
            .map(|e| e.instance.guid.clone())
            .collect()
    }

    /// Record a per-instance failure against the current attempt.
    pub fn record_failure(&mut self, failure: InstanceFailure) {
        self.failures.push(failure);
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Drain and return every failure recorded during the current attempt.
    pub fn take_failures(&mut self) -> Vec<InstanceFailure> {
        std::mem::take(&mut self.failures)
    }

    pub fn has_instances_to_process(&self) -> bool {
        self.entries.iter().any(|e| {
            self.in_current_phase(e)
                && (matches!(e.status, EntryStatus::Pending) || e.status.is_in_flight())
        })
    }

    pub fn has_instances_processing(&self) -> bool {
        self.entries
            .iter()
            .any(|e| self.in_current_phase(e) && e.status.is_in_flight())
    }

    pub fn current_phase_is_complete(&self) -> bool {
        self.entries
            .iter()
            .filter(|e| self.in_current_phase(e))
            .all(|e| e.status.is_terminal())
    }

    /// Transition `Canary -> Main` and reset the cursor so the main phase
    /// scans from the start.
    pub fn mark_canaries_completed(&mut self) {
        self.phase = Phase::Main;
        self.cursor = 0;
    }

    /// Reset the cursor to the start, flip every `Busy` entry back to
    /// `Pending`, and clear failures recorded by the previous attempt.
    /// Called at the top of every attempt.
    pub fn rewind_and_reset_busy_instances(&mut self) {
        self.cursor = 0;
        self.failures.clear();
        for entry in &mut self.entries {
            if matches!(entry.status, EntryStatus::Busy) {
                entry.status = EntryStatus::Pending;
            }
        }
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for entry in &self.entries {
            match entry.status {
                EntryStatus::OrphanDeployment => summary.orphaned += 1,
                EntryStatus::Succeeded => summary.succeeded += 1,
                EntryStatus::Busy => summary.busy += 1,
                EntryStatus::Deleted => summary.deleted += 1,
                EntryStatus::Failed => summary.failed += 1,
                _ => {}
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(guid: &str) -> Instance {
        Instance::new(guid, "plan-1")
    }

    #[test]
    fn new_rejects_canary_not_in_fleet() {
        let all = vec![inst("a")];
        let err = IteratorState::new(&[inst("x")], all, 1).unwrap_err();
        assert_eq!(err.0, "x");
    }

    #[test]
    fn phase_starts_canary_when_target_positive() {
        let all = vec![inst("a"), inst("b")];
        let state = IteratorState::new(&[inst("a")], all, 1).unwrap();
        assert!(state.is_processing_canaries());
    }

    #[test]
    fn phase_starts_main_when_no_canaries() {
        let all = vec![inst("a")];
        let state = IteratorState::new(&[], all, 0).unwrap();
        assert!(!state.is_processing_canaries());
    }

    #[test]
    fn next_pending_respects_phase_partition() {
        let all = vec![inst("a"), inst("b"), inst("c")];
        let mut state = IteratorState::new(&[inst("a")], all, 1).unwrap();

        // Canary phase: only "a" is eligible.
        assert_eq!(state.next_pending().unwrap().guid, "a");
        assert_eq!(state.next_pending(), None);

        state.set_state(&"a".to_string(), EntryStatus::Succeeded);
        state.mark_canaries_completed();

        // Main phase: "b" then "c", in lister order.
        assert_eq!(state.next_pending().unwrap().guid, "b");
        assert_eq!(state.next_pending().unwrap().guid, "c");
        assert_eq!(state.next_pending(), None);
    }

    #[test]
    fn rewind_clears_busy_and_resets_cursor() {
        let all = vec![inst("a"), inst("b")];
        let mut state = IteratorState::new(&[], all, 0).unwrap();
        state.next_pending();
        state.set_state(&"a".to_string(), EntryStatus::Busy);
        state.rewind_and_reset_busy_instances();
        assert_eq!(state.next_pending().unwrap().guid, "a");
    }

    #[test]
    fn current_phase_is_complete_ignores_other_phase_entries() {
        let all = vec![inst("a"), inst("b")];
        let mut state = IteratorState::new(&[inst("a")], all, 1).unwrap();
        // "b" (main-phase) is still Pending, but canary phase only cares about "a".
        state.set_state(&"a".to_string(), EntryStatus::Succeeded);
        assert!(state.current_phase_is_complete());
    }

    #[test]
    fn summary_counts_terminal_and_busy_statuses() {
        let all = vec![inst("a"), inst("b"), inst("c"), inst("d"), inst("e")];
        let mut state = IteratorState::new(&[], all, 0).unwrap();
        state.set_state(&"a".to_string(), EntryStatus::Succeeded);
        state.set_state(&"b".to_string(), EntryStatus::Failed);
        state.set_state(&"c".to_string(), EntryStatus::Busy);
        state.set_state(&"d".to_string(), EntryStatus::OrphanDeployment);
        state.set_state(&"e".to_string(), EntryStatus::Deleted);

        let summary = state.summary();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.busy, 1);
        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.deleted, 1);
    }

    #[test]
    fn has_failures_tracks_recorded_failures_and_clears_on_rewind() {
        let all = vec![inst("a")];
        let mut state = IteratorState::new(&[], all, 0).unwrap();
        assert!(!state.has_failures());

        state.record_failure(InstanceFailure {
            guid: "a".to_string(),
            error: anyhow::anyhow!("boom"),
        });
        assert!(state.has_failures());

        let taken = state.take_failures();
        assert_eq!(taken.len(), 1);
        assert!(!state.has_failures());

        state.record_failure(InstanceFailure {
            guid: "a".to_string(),
            error: anyhow::anyhow!("boom again"),
        });
        assert!(state.has_failures());
        state.rewind_and_reset_busy_instances();
        assert!(!state.has_failures());
    }

    #[test]
    fn outstanding_canary_count_excludes_terminal_canaries() {
        let all = vec![inst("a"), inst("b")];
        let mut state = IteratorState::new(&[inst("a"), inst("b")], all, 2).unwrap();
        assert_eq!(state.outstanding_canary_count(), 2);
        state.set_state(&"a".to_string(), EntryStatus::Succeeded);
        assert_eq!(state.outstanding_canary_count(), 1);
    }
}
