//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Simulated metering counters for the R-Meter project.
//!
//! Each counter is an independent task that owns its state and drifts it on a
//! fixed tick. Other tasks only ever see copies obtained through a
//! [`CounterHandle`].

pub mod counter;
pub mod endpoint;
pub mod registry;

pub use counter::{CounterDrift, CounterHandle, CounterSimulator, SimulatorError, SimulatorSettings};
pub use endpoint::{serve_counter, CounterEndpoints, EndpointServer};
pub use registry::CounterRegistry;
