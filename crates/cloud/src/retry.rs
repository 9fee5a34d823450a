//! Bounded retry with a fixed delay for transient fetch failures.

use std::time::Duration;

use tracing::warn;

use crate::error::{CloudError, Result};

/// How often, and how far apart, a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included (at least 1).
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that never retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. Exhaustion yields
    /// [`CloudError::TransientFetch`] carrying the last failure.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= max => {
                    return Err(CloudError::TransientFetch {
                        attempts: attempt,
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!(
                        what,
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "transient failure, retrying in {:?}",
                        self.delay
                    );
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
