//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the R-Meter workspace.
//! This crate exposes configuration loading, logging, the counter data
//! model, and cycle timing utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod time;

pub use config::{
    AppConfig, ConfigError, CounterConfig, LoggingConfig, MetricsConfig, PollerConfig,
    RegistrationPolicy, SimulationConfig, StorageBackend, StorageConfig, TransportKind,
};
pub use logging::{init_tracing, init_tracing_to, ConsoleStream, LogFormat};
pub use metrics::{CycleTimingReporter, DriftHistogram, DriftSummary};
pub use model::{
    AddressPlan, CounterAddress, CounterId, CounterPayload, CounterState, FailureCause,
    PollFailure, PollOutcome, PollReading,
};
