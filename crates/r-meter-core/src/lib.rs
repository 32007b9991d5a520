//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Poll cycle orchestration and runtime lifecycle for R-Meter.

pub mod orchestrator;
pub mod report;
pub mod runtime;
pub mod targets;

pub use orchestrator::{
    OrchestratorHandle, OrchestratorState, OrchestratorStatus, PollCycleOrchestrator,
};
pub use report::{CycleReport, CycleSummary};
pub use runtime::{build_orchestrator, poll_once, CounterFarm, MeterRuntime, RuntimeMetrics};
pub use targets::TargetSource;
