//! Error classification and retry-with-backoff.
//!
//! `RetrySchedule` is a small state machine: feed it each failure and it
//! answers with either a delay before the next attempt or a decision to
//! give up. It owns no timers, so its behaviour is testable without a
//! runtime.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::TransportError;

/// Retry taxonomy of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Client-side rejection with field detail. Terminal.
    Validation,
    /// The addressed record does not exist. Terminal.
    NotFound,
    /// Server or network failure. Retried within budget.
    Transient,
    /// Anything else that retrying cannot fix (unsupported operation,
    /// undecodable response). Terminal.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: config.multiplier.max(1.0),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (zero-based), capped at the maximum.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            policy: self.clone(),
            retries: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    /// Surface the failure.
    GiveUp,
}

/// Retry state for one logical request.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    retries: u32,
}

impl RetrySchedule {
    pub fn on_failure(&mut self, error: &TransportError) -> RetryDecision {
        if !error.is_retryable() || self.retries >= self.policy.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = self.policy.backoff(self.retries);
        self.retries += 1;
        RetryDecision::Retry {
            attempt: self.retries + 1,
            delay,
        }
    }

    /// Attempts made or granted so far, counting the first one.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}
