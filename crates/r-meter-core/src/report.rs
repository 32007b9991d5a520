//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-cycle partition of poll outcomes."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use r_meter_common::model::{CounterId, FailureCause, PollFailure, PollOutcome, PollReading};
use r_meter_common::time::duration_to_millis;
use serde::Serialize;

/// Outcomes of one cycle split into successes and failures. Dropped once the
/// cycle has been persisted and logged.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub successes: Vec<PollReading>,
    pub failures: Vec<PollFailure>,
}

impl CycleReport {
    pub fn new(
        cycle: u64,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcomes: Vec<PollOutcome>,
    ) -> Self {
        let mut successes = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                PollOutcome::Success(reading) => successes.push(reading),
                PollOutcome::Failure(failure) => failures.push(failure),
            }
        }
        Self {
            cycle,
            started_at,
            elapsed,
            successes,
            failures,
        }
    }

    pub fn outcome_count(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn failures_with(&self, cause: FailureCause) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.cause == cause)
            .count()
    }
}

/// What survives a cycle once its report is gone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub counters: usize,
    pub successes: usize,
    pub unreachable: usize,
    pub timeouts: usize,
    pub malformed: usize,
    pub persisted: usize,
    pub persistence_failures: usize,
    /// Counters without a fresh reading this cycle, ascending.
    pub failed_counters: Vec<CounterId>,
}

impl CycleSummary {
    pub(crate) fn from_report(report: &CycleReport, persistence_failures: usize) -> Self {
        let mut failed_counters: Vec<CounterId> = report
            .failures
            .iter()
            .map(|failure| failure.counter_id)
            .collect();
        failed_counters.sort();
        Self {
            cycle: report.cycle,
            started_at: report.started_at,
            elapsed_ms: duration_to_millis(report.elapsed),
            counters: report.outcome_count(),
            successes: report.successes.len(),
            unreachable: report.failures_with(FailureCause::Unreachable),
            timeouts: report.failures_with(FailureCause::Timeout),
            malformed: report.failures_with(FailureCause::MalformedPayload),
            persisted: report.successes.len() - persistence_failures,
            persistence_failures,
            failed_counters,
        }
    }

    pub fn failures(&self) -> usize {
        self.unreachable + self.timeouts + self.malformed
    }
}
