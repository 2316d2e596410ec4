// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fixed-delay bounded retry for opening the printer.
//
// A receipt printer sits next to a person; a steady retry cadence is easier
// to reason about there than backoff, so every retry waits the same delay.

use std::time::Duration;

use printlink_core::ClientConfig;
use tracing::debug;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Maximum retries exhausted.
    Exhausted,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            delay: config.retry_delay(),
        }
    }

    /// Decide what follows failed attempt number `attempt` (zero-based).
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            debug!(attempt, max = self.max_retries, "retry limit exhausted");
            RetryDecision::Exhausted
        } else {
            RetryDecision::RetryAfter(self.delay)
        }
    }
}
