//! Abstraction over "wait a duration", injectable for tests.
//!
//! The iterator has exactly two suspension points (`pollingInterval` between
//! polls, `attemptInterval` between attempts). Routing both through this
//! trait, rather than calling `tokio::time::sleep` directly, is what makes
//! the attempt loop fast to test under `tokio::time::pause`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Waits for a duration. Implementations must not do anything else
/// observable -- no logging, no I/O -- so that fakes can be swapped in
/// without changing test expectations.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// The production [`Sleeper`]: a thin wrapper over `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test [`Sleeper`] that records the durations it was asked to wait for and
/// returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
    call_count: AtomicUsize,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().unwrap().push(duration);
        self.call_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sleeper_records_every_call_without_waiting() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(30)).await;
        sleeper.sleep(Duration::from_millis(5)).await;
        assert_eq!(sleeper.call_count(), 2);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(30), Duration::from_millis(5)]
        );
    }
}
