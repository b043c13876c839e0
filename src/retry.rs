//! Bounded retry with an explicit backoff schedule.
//!
//! The sleeper is injectable so schedules can be checked without waiting.

use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `step * n` after the n-th failed attempt: 1s, 2s, 3s...
    Linear(Duration),
    /// `base * 2^(n-1)` after the n-th failed attempt: 1s, 2s, 4s...
    Exponential(Duration),
}

impl Backoff {
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match *self {
            Backoff::Linear(step) => step * failed_attempt,
            Backoff::Exponential(base) => {
                let exp = failed_attempt.saturating_sub(1).min(16);
                base * 2u32.pow(exp)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Spreadsheet saves: 5 attempts, 1s/2s/3s/4s between them.
    pub fn file_lock() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Linear(Duration::from_secs(1)),
        }
    }

    /// External API calls: 3 attempts, 1s/2s between them.
    pub fn rate_limited() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential(Duration::from_secs(1)),
        }
    }

    pub fn run<T, E, F, P>(&self, op: F, is_transient: P) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        self.run_with_sleeper(op, is_transient, thread::sleep)
    }

    /// Calls `op` with the 1-based attempt number until it succeeds, fails
    /// with a non-transient error, or the attempt budget is spent.
    pub fn run_with_sleeper<T, E, F, P, S>(
        &self,
        mut op: F,
        is_transient: P,
        mut sleep: S,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        S: FnMut(Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(Retried { value, attempts: attempt }),
                Err(error) if !is_transient(&error) => {
                    return Err(RetryError::Fatal { error, attempts: attempt })
                }
                Err(error) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted { error, attempts: attempt })
                }
                Err(_) => {
                    sleep(self.backoff.delay_after(attempt));
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {error}")]
    Exhausted { error: E, attempts: u32 },
    #[error("failed on attempt {attempts}: {error}")]
    Fatal { error: E, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Fatal { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { error, .. } | RetryError::Fatal { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_schedule() {
        let backoff = Backoff::Linear(Duration::from_secs(1));
        let delays: Vec<u64> = (1..=4).map(|n| backoff.delay_after(n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 3, 4]);
    }

    #[test]
    fn exponential_schedule() {
        let backoff = Backoff::Exponential(Duration::from_secs(1));
        let delays: Vec<u64> = (1..=3).map(|n| backoff.delay_after(n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4]);
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut slept = Vec::new();
        let result = RetryPolicy::file_lock().run_with_sleeper(
            |attempt| if attempt < 3 { Err("locked") } else { Ok(attempt * 10) },
            |_| true,
            |d| slept.push(d.as_secs()),
        );
        let retried = result.unwrap();
        assert_eq!(retried.value, 30);
        assert_eq!(retried.attempts, 3);
        assert_eq!(slept, [1, 2]);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut calls = 0;
        let result: Result<Retried<()>, _> = RetryPolicy::rate_limited().run_with_sleeper(
            |_| {
                calls += 1;
                Err("timeout")
            },
            |_| true,
            |_| {},
        );
        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut slept = 0;
        let result: Result<Retried<()>, _> = RetryPolicy::file_lock().run_with_sleeper(
            |_| Err("disk full"),
            |e| *e == "locked",
            |_| slept += 1,
        );
        let err = result.unwrap_err();
        assert!(!err.is_exhausted());
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.into_inner(), "disk full");
        assert_eq!(slept, 0);
    }
}
