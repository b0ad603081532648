#![forbid(unsafe_code)]

//! Bounded retry with a fixed pause between attempts.

use anyhow::{Context, Result, anyhow};
use log::warn;
use std::thread;
use std::time::Duration;

/// How many times an operation runs and how long to wait between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Whole-run extraction: 3 attempts, 2 seconds apart.
    pub const fn extraction() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    /// Chat completions: `attempts` tries, 5 seconds apart.
    pub const fn generation(attempts: u32) -> Self {
        Self::new(attempts, Duration::from_secs(5))
    }

    /// Same attempt count without any pause. Used by tests.
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }
}

/// Runs `op` until it succeeds or the policy is exhausted.
///
/// A policy with zero attempts still runs the operation once. The error of the
/// final attempt is returned, annotated with `label`.
pub fn with_retry<T, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!("{label} failed (attempt {attempt}/{attempts}): {err:#}");
                last_error = Some(err);
            }
        }
        if attempt < attempts && !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
    }

    let err = last_error.unwrap_or_else(|| anyhow!("{label} did not run"));
    Err(err).with_context(|| format!("{label} failed after {attempts} attempt(s)"))
}
