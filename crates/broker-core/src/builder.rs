//! Groups iterator configuration and validates it before construction.
//!
//! Collaborators are supplied already-constructed (the CLI wires the
//! Broker Services HTTP client and a `TracingListener`; tests wire fakes).
//! Use [`Builder::new`] for the required collaborators, then chain the
//! optional `with_*` setters for tuning parameters before [`Builder::build`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::ConfigError;
use crate::instance_lister::InstanceLister;
use crate::iterator::Iterator;
use crate::listener::Listener;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::state_checker::StateChecker;
use crate::triggerer::Triggerer;
use crate::types::CanarySelectionParams;

/// Builder for [`Iterator`].
///
/// Tuning defaults mirror the reference CLI's own: `max_in_flight = 1`,
/// no canaries, a 10s polling interval, a 60s attempt interval, and a
/// single attempt.
pub struct Builder {
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
}

impl Builder {
    /// Create a builder with the required collaborators and default tuning.
    pub fn new(
        lister: Arc<dyn InstanceLister>,
        triggerer: Arc<dyn Triggerer>,
        state_checker: Arc<dyn StateChecker>,
        listener: Arc<dyn Listener>,
    ) -> Self {
        Self {
            lister,
            triggerer,
            state_checker,
            listener,
            sleeper: Arc::new(TokioSleeper),
            max_in_flight: 1,
            canaries: 0,
            canary_selection_params: CanarySelectionParams::new(),
            polling_interval: Duration::from_secs(10),
            attempt_interval: Duration::from_secs(60),
            attempt_limit: 1,
            cancellation: CancellationToken::new(),
        }
    }

    /// Override the sleeper (tests inject a [`crate::sleeper::RecordingSleeper`]).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Wire a [`CancellationToken`] (the CLI cancels it on SIGINT/SIGTERM).
    /// Left at its default (never cancelled) if not called.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_canaries(mut self, canaries: usize) -> Self {
        self.canaries = canaries;
        self
    }

    pub fn with_canary_selection_params(mut self, params: CanarySelectionParams) -> Self {
        self.canary_selection_params = params;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_attempt_interval(mut self, interval: Duration) -> Self {
        self.attempt_interval = interval;
        self
    }

    pub fn with_attempt_limit(mut self, attempt_limit: usize) -> Self {
        self.attempt_limit = attempt_limit;
        self
    }

    /// Validate the configuration and construct an [`Iterator`].
    pub fn build(self) -> Result<Iterator, ConfigError> {
        if self.max_in_flight < 1 {
            return Err(ConfigError::MaxInFlightTooLow(self.max_in_flight));
        }
        if self.attempt_limit < 1 {
            return Err(ConfigError::AttemptLimitTooLow(self.attempt_limit));
        }
        if self.polling_interval.is_zero() {
            return Err(ConfigError::PollingIntervalZero);
        }
        if self.attempt_interval.is_zero() {
            return Err(ConfigError::AttemptIntervalZero);
        }

        Ok(Iterator::new(
            self.lister,
            self.triggerer,
            self.state_checker,
            self.listener,
            self.sleeper,
            self.max_in_flight,
            self.canaries,
            self.canary_selection_params,
            self.polling_interval,
            self.attempt_interval,
            self.attempt_limit,
            self.cancellation,
        ))
    }
}
