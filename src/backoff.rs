// ABOUTME: Bounded retry loops with constant or exponential backoff.
// ABOUTME: Waits race against a caller-supplied cancellation future.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant(Duration),
    /// Doubles after every wait, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Constant(d) => d,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Drives at most `max_attempts` calls of an operation.
///
/// The first `wait_next` returns immediately; later ones sleep for the
/// backoff delay. `wait_next` returns false once the budget is spent or the
/// cancellation future resolves during a wait.
#[derive(Debug, Clone)]
pub struct Retry {
    backoff: Backoff,
    max_attempts: u32,
    calls: u32,
}

impl Retry {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            backoff,
            max_attempts,
            calls: 0,
        }
    }

    /// Number of attempts started so far.
    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub async fn wait_next<F>(&mut self, cancel: F) -> bool
    where
        F: Future<Output = ()>,
    {
        if self.calls >= self.max_attempts {
            return false;
        }
        if self.calls > 0 {
            let delay = self.backoff.delay(self.calls);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel => return false,
            }
        }
        self.calls += 1;
        true
    }
}
