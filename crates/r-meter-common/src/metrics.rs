//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

const MAX_SAMPLES: usize = 4096;

/// Collects absolute schedule drift samples (nanoseconds). Only the most recent
/// samples are retained.
#[derive(Debug, Default)]
pub struct DriftHistogram {
    samples: Mutex<VecDeque<f64>>,
}

impl DriftHistogram {
    pub fn record(&self, drift: Duration) {
        let nanos = drift.as_secs_f64() * 1_000_000_000.0;
        let mut samples = self.samples.lock();
        if samples.len() == MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    pub fn summary(&self) -> Option<DriftSummary> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = if samples.len() > 1 {
            let sum_sq = samples
                .iter()
                .map(|value| {
                    let delta = value - mean;
                    delta * delta
                })
                .sum::<f64>();
            sum_sq / (count - 1.0)
        } else {
            0.0
        };
        let max = samples.iter().copied().fold(f64::MIN, f64::max);
        let min = samples.iter().copied().fold(f64::MAX, f64::min);
        Some(DriftSummary {
            mean_ns: mean,
            std_dev_ns: variance.sqrt(),
            max_ns: max,
            min_ns: min,
            samples: samples.len() as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftSummary {
    pub mean_ns: f64,
    pub std_dev_ns: f64,
    pub max_ns: f64,
    pub min_ns: f64,
    pub samples: u64,
}

/// Measures how far each poll cycle started from its scheduled boundary and how
/// long the cycle body took.
#[derive(Debug)]
pub struct CycleTimingReporter {
    period: Duration,
    start_drift: DriftHistogram,
    durations: DriftHistogram,
}

impl CycleTimingReporter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            start_drift: DriftHistogram::default(),
            durations: DriftHistogram::default(),
        }
    }

    pub fn record_start(&self, scheduled: Instant, actual: Instant) {
        let drift = if actual > scheduled {
            actual - scheduled
        } else {
            scheduled - actual
        };
        self.start_drift.record(drift);
    }

    pub fn record_duration(&self, elapsed: Duration) {
        self.durations.record(elapsed);
    }

    /// True when a cycle body took longer than the configured period.
    pub fn overran(&self, elapsed: Duration) -> bool {
        elapsed > self.period
    }

    pub fn start_drift(&self) -> &DriftHistogram {
        &self.start_drift
    }

    pub fn durations(&self) -> &DriftHistogram {
        &self.durations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_summary() {
        assert!(DriftHistogram::default().summary().is_none());
    }

    #[test]
    fn summary_reports_extremes() {
        let histogram = DriftHistogram::default();
        histogram.record(Duration::from_micros(1));
        histogram.record(Duration::from_micros(3));
        let summary = histogram.summary().unwrap();
        assert_eq!(summary.samples, 2);
        assert!((summary.mean_ns - 2_000.0).abs() < 1e-6);
        assert!((summary.max_ns - 3_000.0).abs() < 1e-6);
        assert!((summary.min_ns - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn histogram_retains_only_recent_samples() {
        let histogram = DriftHistogram::default();
        for _ in 0..MAX_SAMPLES + 10 {
            histogram.record(Duration::from_nanos(5));
        }
        assert_eq!(histogram.summary().unwrap().samples, MAX_SAMPLES as u64);
    }

    #[test]
    fn reporter_tracks_drift_in_both_directions() {
        let reporter = CycleTimingReporter::new(Duration::from_secs(30));
        let scheduled = Instant::now();
        reporter.record_start(scheduled, scheduled + Duration::from_millis(2));
        reporter.record_start(scheduled + Duration::from_millis(2), scheduled);
        let summary = reporter.start_drift().summary().unwrap();
        assert!((summary.mean_ns - 2_000_000.0).abs() < 1.0);
        assert!(reporter.overran(Duration::from_secs(31)));
        assert!(!reporter.overran(Duration::from_secs(1)));
    }
}
