//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Append-only storage of validated counter readings.

use std::sync::Arc;

use r_meter_common::config::{StorageBackend, StorageConfig};
use r_meter_common::model::CounterId;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing the event log.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    /// Explicit registration of a counter the store already knows.
    #[error("counter {0} is already registered")]
    AlreadyRegistered(CounterId),
    /// Insert for a counter that was never registered while registration is required.
    #[error("counter {0} is not registered")]
    UnregisteredCounter(CounterId),
    /// A reading carried a negative or non-finite value.
    #[error("invalid reading for counter {counter_id}: {reason}")]
    InvalidReading {
        /// Counter the reading belongs to.
        counter_id: CounterId,
        /// What was wrong with it.
        reason: String,
    },
    /// A blocking log write did not run to completion.
    #[error("event log write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// A line of the event log could not be decoded during replay.
    #[error("event log corrupt at line {line}: {source}")]
    Corrupt {
        /// One-based line number in the log file.
        line: usize,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

pub mod event_log;
pub mod index;
pub mod memory;
pub mod metrics;
pub mod sink;

pub use event_log::{EventLogStore, StoreEvent};
pub use memory::MemoryStore;
pub use metrics::PersistenceMetrics;
pub use sink::{ReadingSink, StoredReading};

/// Open the store selected in configuration.
pub fn open_store(
    config: &StorageConfig,
    metrics: Option<PersistenceMetrics>,
) -> Result<Arc<dyn ReadingSink>> {
    let store: Arc<dyn ReadingSink> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new(config.registration)),
        StorageBackend::EventLog => {
            Arc::new(EventLogStore::open(&config.path, config.registration, metrics)?)
        }
    };
    Ok(store)
}
