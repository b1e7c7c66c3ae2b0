//! The iterator's error taxonomy.
//!
//! These are not meant to be matched on by callers component-by-component;
//! they exist to reproduce, verbatim, the diagnostic strings operators'
//! scripts already grep for. Internally every failure still flows through
//! `anyhow::Result` the way the rest of this codebase does -- only the
//! final, user-facing shapes are typed here.

use thiserror::Error;

use crate::types::Guid;

/// One instance's failure during an attempt, carrying the GUID so it can be
/// surfaced in the `Finished` listener event and in [`IterateError`].
#[derive(Debug)]
pub struct InstanceFailure {
    pub guid: Guid,
    pub error: anyhow::Error,
}

/// Error returned by [`crate::iterator::Iterator::iterate`].
#[derive(Debug, Error)]
pub enum IterateError {
    /// Listing the fleet, or the canary subset, failed before any instance
    /// was touched.
    #[error("error listing service instances: {0}")]
    Listing(anyhow::Error),

    /// `canary_selection_params` matched nothing even though the fleet is
    /// non-empty.
    #[error(
        "Failed to find a match to the canary selection criteria: {params}. \
         Please ensure these selection criteria will match one or more service instances, \
         or remove `canary_selection_params` to disable selecting canaries from a specific org and space."
    )]
    NoCanaryMatch { params: String },

    /// One or more instances failed during an attempt; the attempt loop
    /// returns immediately without retrying.
    #[error("{0}")]
    Aggregate(#[from] AggregateError),

    /// Some instances were still `Busy` after the final attempt.
    #[error("The following instances could not be processed: {}", .0.join(", "))]
    StillBusy(Vec<Guid>),

    /// The canary phase ended with busy canaries left over.
    #[error(
        "canaries didn't process successfully: attempted to process {attempted} canaries, \
         but only found {processed} instances not already in use by another BOSH task."
    )]
    CanariesStillBusy { attempted: usize, processed: usize },

    /// Cancellation was observed (the CLI's `CancellationToken` fired on
    /// SIGINT/SIGTERM). No new operations were triggered after that point;
    /// anything already in flight was left running on the remote system.
    #[error("iteration was interrupted before completion")]
    Interrupted,
}

/// Aggregate of per-instance failures collected during one attempt.
///
/// `Display` reproduces the reference implementation's wrapping exactly:
/// a single failure prints bare, multiple failures get a count header and
/// a `* `-bulleted list.
#[derive(Debug)]
pub struct AggregateError {
    failures: Vec<InstanceFailure>,
    /// Set when this aggregate surfaced during the canary phase; wraps the
    /// formatted message with "canaries didn't process successfully: ".
    during_canaries: bool,
}

impl AggregateError {
    pub fn new(failures: Vec<InstanceFailure>, during_canaries: bool) -> Self {
        Self {
            failures,
            during_canaries,
        }
    }

    pub fn guids(&self) -> Vec<Guid> {
        self.failures.iter().map(|f| f.guid.clone()).collect()
    }

    fn body(&self) -> String {
        match self.failures.len() {
            0 => String::new(),
            1 => self.failures[0].error.to_string(),
            n => {
                let mut out = format!("{n} errors occurred:\n");
                for failure in &self.failures {
                    out.push_str("\n* ");
                    out.push_str(&failure.error.to_string());
                }
                out
            }
        }
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = self.body();
        if self.during_canaries {
            write!(f, "canaries didn't process successfully: {body}")
        } else {
            f.write_str(&body)
        }
    }
}

impl std::error::Error for AggregateError {}

/// Configuration error: a required [`crate::builder::Builder`] option was
/// missing or out of range. Reported once; the iteration never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_in_flight must be at least 1, got {0}")]
    MaxInFlightTooLow(usize),
    #[error("attempt_limit must be at least 1, got {0}")]
    AttemptLimitTooLow(usize),
    #[error("polling_interval must be greater than zero")]
    PollingIntervalZero,
    #[error("attempt_interval must be greater than zero")]
    AttemptIntervalZero,
    #[error("the brokerUsername, brokerPassword and brokerUrl are required to function")]
    MissingBrokerIdentity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn failure(guid: &str, msg: &str) -> InstanceFailure {
        InstanceFailure {
            guid: guid.to_string(),
            error: anyhow!(msg.to_string()),
        }
    }

    #[test]
    fn single_failure_prints_bare() {
        let agg = AggregateError::new(vec![failure("a", "boom")], false);
        assert_eq!(agg.to_string(), "boom");
    }

    #[test]
    fn multiple_failures_get_numbered_header() {
        let agg = AggregateError::new(vec![failure("a", "one"), failure("b", "two")], false);
        let rendered = agg.to_string();
        assert!(rendered.starts_with("2 errors occurred:\n"));
        assert!(rendered.contains("\n* one"));
        assert!(rendered.contains("\n* two"));
    }

    #[test]
    fn canary_failures_are_wrapped() {
        let agg = AggregateError::new(vec![failure("a", "boom")], true);
        assert_eq!(agg.to_string(), "canaries didn't process successfully: boom");
    }

    #[test]
    fn still_busy_lists_guids() {
        let err = IterateError::StillBusy(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            err.to_string(),
            "The following instances could not be processed: a, b"
        );
    }

    #[test]
    fn no_canary_match_names_params() {
        let err = IterateError::NoCanaryMatch {
            params: "{org: o1}".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("Failed to find a match to the canary selection criteria"));
        assert!(rendered.contains("o1"));
    }
}
