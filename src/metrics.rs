//! Usage metrics for a pipeline run.
//!
//! This module provides `RunMetrics` for tracking token usage,
//! completed steps and failures.

use serde::{Deserialize, Serialize};

use crate::generation::TokenUsage;

/// Aggregated metrics for one pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Input tokens consumed across all completed steps.
    pub input_tokens: u64,
    /// Output tokens generated across all completed steps.
    pub output_tokens: u64,
    /// Input plus output tokens.
    pub total_tokens: u64,
    /// Number of steps that completed successfully.
    pub steps_completed: usize,
    /// Failure messages, at most one per run.
    pub failures: Vec<String>,
}

impl RunMetrics {
    /// Record the usage reported by one generation call.
    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.total_tokens += usage.total();
    }

    /// Increment the steps completed counter.
    pub fn record_step(&mut self) {
        self.steps_completed += 1;
    }

    /// Record a failure message.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failures.push(error.into());
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
