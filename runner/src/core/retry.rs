//! Per-invocation retry policy.

use std::time::Duration;

use crate::core::types::{Classification, ErrorCategory};

/// Backoff multipliers per error category plus a shared attempt cap.
///
/// The delay before retry `n` (1-indexed, counting the failed attempt) is
/// `multiplier * n * unit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub unit: Duration,
    pub empty_output_multiplier: u32,
    pub no_messages_multiplier: u32,
    pub network_multiplier: u32,
    pub generic_error_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            unit: Duration::from_secs(1),
            empty_output_multiplier: 10,
            no_messages_multiplier: 15,
            network_multiplier: 20,
            generic_error_multiplier: 10,
        }
    }
}

/// What to do after classifying one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Accept the result and move on to the next iteration.
    Advance,
    /// Invoke again after `delay`.
    Retry { delay: Duration },
    /// The attempt cap is exhausted.
    GiveUp,
}

impl RetryPolicy {
    fn multiplier(&self, category: ErrorCategory) -> u32 {
        match category {
            ErrorCategory::EmptyOutput => self.empty_output_multiplier,
            ErrorCategory::NoMessagesTransient => self.no_messages_multiplier,
            ErrorCategory::NetworkTransient => self.network_multiplier,
            ErrorCategory::GenericError => self.generic_error_multiplier,
            ErrorCategory::Success => 0,
        }
    }

    /// Backoff before retrying after `attempt` failed with `category`.
    pub fn backoff(&self, category: ErrorCategory, attempt: u32) -> Duration {
        self.unit
            .saturating_mul(self.multiplier(category))
            .saturating_mul(attempt)
    }

    /// Decide the next step after `attempt` (1-indexed) produced `verdict`.
    ///
    /// Completed work short-circuits any error category.
    pub fn decide(&self, verdict: Classification, attempt: u32) -> RetryDecision {
        if verdict.work_completed || !verdict.category.is_error() {
            return RetryDecision::Advance;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.backoff(verdict.category, attempt),
        }
    }
}
