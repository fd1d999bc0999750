//! Bounded retry with Fibonacci backoff.
//!
//! Delays start at `base_delay`, grow along the Fibonacci sequence and are capped
//! at `max_delay`. With the defaults the sleeps are
//! 0.5s, 0.5s, 1s, 1.5s, 2.5s, 2.5s, ...
//! Only errors for which [`ProbeError::is_retryable`] holds are retried.

use crate::connect::CancellationToken;
use crate::error::ProbeError;
use std::thread;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(2500),
        }
    }
}

impl RetryPolicy {
    /// A policy that invokes the operation exactly once.
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
    }

    /// Delays slept between consecutive attempts.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            current: self.base_delay,
            next: self.base_delay,
            cap: self.max_delay,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T, ProbeError>
    where
        F: FnMut(u32) -> Result<T, ProbeError>,
    {
        self.run_with_sleep(cancel, thread::sleep, op)
    }

    pub(crate) fn run_with_sleep<T, F, S>(
        &self,
        cancel: &CancellationToken,
        mut sleep: S,
        mut op: F,
    ) -> Result<T, ProbeError>
    where
        F: FnMut(u32) -> Result<T, ProbeError>,
        S: FnMut(Duration),
    {
        let mut delays = self.backoff();
        let mut attempt = 1;
        loop {
            cancel.check()?;
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = delays.next().unwrap_or(self.max_delay);
                    debug!(attempt, ?delay, error = %err, "retrying after transient error");
                    sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Infinite iterator over capped Fibonacci delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    next: Duration,
    cap: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.current.min(self.cap);
        let following = self.current.saturating_add(self.next);
        self.current = self.next;
        self.next = following;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn timeout() -> ProbeError {
        io::Error::new(io::ErrorKind::TimedOut, "dial").into()
    }

    #[test]
    fn test_backoff_schedule() {
        let delays: Vec<u64> = RetryPolicy::default()
            .backoff()
            .take(7)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 500, 1000, 1500, 2500, 2500, 2500]);
    }

    #[test]
    fn test_retries_timeouts_until_success() {
        let mut slept = Vec::new();
        let result = RetryPolicy::default().run_with_sleep(
            &CancellationToken::new(),
            |d| slept.push(d),
            |attempt| if attempt < 3 { Err(timeout()) } else { Ok(attempt) },
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            slept,
            vec![Duration::from_millis(500), Duration::from_millis(500)]
        );
    }

    #[test]
    fn test_terminal_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> =
            RetryPolicy::default().run_with_sleep(&CancellationToken::new(), |_| {}, |_| {
                calls += 1;
                Err(ProbeError::HandshakeFailed {
                    details: "alert handshake failure".to_string(),
                })
            });
        assert!(matches!(result, Err(ProbeError::HandshakeFailed { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut calls = 0;
        let result: Result<(), _> =
            RetryPolicy::default().run_with_sleep(&CancellationToken::new(), |_| {}, |_| {
                calls += 1;
                Err(timeout())
            });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 10);
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::default().run_with_sleep(&cancel, |_| {}, |_| {
            calls += 1;
            Ok(())
        });
        assert!(matches!(result, Err(ProbeError::Cancelled)));
        assert_eq!(calls, 0);
    }
}
