//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

use crate::{PersistenceError, Result};

/// Metrics published by the persistence subsystem.
#[derive(Clone)]
pub struct PersistenceMetrics {
    readings_persisted: IntCounter,
    persistence_failures: IntCounterVec,
    event_log_bytes: IntCounter,
    replay_duration: Histogram,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let readings_persisted = IntCounter::with_opts(Opts::new(
            "r_meter_readings_persisted_total",
            "Total number of readings accepted by the store",
        ))?;
        registry.register(Box::new(readings_persisted.clone()))?;

        let persistence_failures = IntCounterVec::new(
            Opts::new(
                "r_meter_persistence_failures_total",
                "Total number of readings the store rejected or failed to write",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(persistence_failures.clone()))?;

        let event_log_bytes = IntCounter::with_opts(Opts::new(
            "r_meter_event_log_bytes_total",
            "Total bytes appended to the reading event log",
        ))?;
        registry.register(Box::new(event_log_bytes.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "r_meter_event_log_replay_seconds",
            "Duration spent replaying the reading event log on open",
        )
        .buckets(prometheus::exponential_buckets(0.001, 2.0, 12)?);
        let replay_duration = Histogram::with_opts(histogram_opts)?;
        registry.register(Box::new(replay_duration.clone()))?;

        Ok(Self {
            readings_persisted,
            persistence_failures,
            event_log_bytes,
            replay_duration,
        })
    }

    /// Record one accepted reading.
    pub fn record_persisted(&self) {
        self.readings_persisted.inc();
    }

    /// Record one failed insert, labelled by error class.
    pub fn record_failure(&self, error: &PersistenceError) {
        self.persistence_failures
            .with_label_values(&[failure_reason(error)])
            .inc();
    }

    /// Add to the total number of bytes written to the event log.
    pub fn record_event_bytes(&self, bytes: usize) {
        self.event_log_bytes.inc_by(bytes as u64);
    }

    /// Observe the duration spent replaying the log.
    pub fn observe_replay_duration(&self, seconds: f64) {
        self.replay_duration.observe(seconds);
    }
}

fn failure_reason(error: &PersistenceError) -> &'static str {
    match error {
        PersistenceError::Io(_) | PersistenceError::Task(_) => "io",
        PersistenceError::Json(_) | PersistenceError::Corrupt { .. } => "encoding",
        PersistenceError::Metrics(_) => "metrics",
        PersistenceError::AlreadyRegistered(_) => "already_registered",
        PersistenceError::UnregisteredCounter(_) => "unregistered",
        PersistenceError::InvalidReading { .. } => "invalid_reading",
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
