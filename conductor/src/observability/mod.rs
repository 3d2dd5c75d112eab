//! Run statistics and timing.

use crate::core::{Outcome, OutcomeStatus};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Outcome counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Items that completed every stage.
    pub ok: u64,
    /// Items that failed.
    pub error: u64,
    /// Items stopped early.
    pub stopped: u64,
    /// Wall time of the run in milliseconds.
    pub duration_ms: f64,
}

impl RunStats {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome.status {
            OutcomeStatus::Ok => self.ok += 1,
            OutcomeStatus::Error => self.error += 1,
            OutcomeStatus::Stopped => self.stopped += 1,
        }
    }

    /// Total number of outcomes.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.ok + self.error + self.stopped
    }
}

/// Measures the duration of a named span.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
