//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use r_meter_common::config::{ConfigError, PollerConfig};
use r_meter_common::metrics::CycleTimingReporter;
use r_meter_common::model::{FailureCause, PollFailure, PollOutcome};
use r_meter_common::time::{drift_us, duration_to_millis};
use r_meter_metrics::PollerMetrics;
use r_meter_net::EndpointPoller;
use r_meter_persistence::{PersistenceMetrics, ReadingSink};
use r_meter_rt::{FanOut, RateLimiter};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::report::{CycleReport, CycleSummary};
use crate::targets::TargetSource;

/// Whether a cycle is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub cycles_completed: u64,
    /// Cycles whose poll, persist and log work outlasted the period.
    pub overruns: u64,
    pub last_summary: Option<CycleSummary>,
}

/// Polls every target once per cycle and feeds the results to the sink.
pub struct PollCycleOrchestrator {
    targets: Arc<dyn TargetSource>,
    poller: EndpointPoller,
    sink: Arc<dyn ReadingSink>,
    cycle_period: Duration,
    poll_timeout: Duration,
    status: watch::Sender<OrchestratorStatus>,
    timing: CycleTimingReporter,
    poller_metrics: Option<PollerMetrics>,
    persistence_metrics: Option<PersistenceMetrics>,
}

impl std::fmt::Debug for PollCycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollCycleOrchestrator")
            .field("transport", &self.poller.transport_kind())
            .field("sink", &self.sink.name())
            .field("cycle_period", &self.cycle_period)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl PollCycleOrchestrator {
    /// Rejects a poll timeout that is not strictly shorter than the cycle period.
    pub fn new(
        targets: Arc<dyn TargetSource>,
        poller: EndpointPoller,
        sink: Arc<dyn ReadingSink>,
        poller_config: &PollerConfig,
    ) -> Result<Self, ConfigError> {
        poller_config.validate()?;
        let (status, _) = watch::channel(OrchestratorStatus {
            state: OrchestratorState::Idle,
            cycles_completed: 0,
            overruns: 0,
            last_summary: None,
        });
        Ok(Self {
            targets,
            poller,
            sink,
            cycle_period: poller_config.cycle_period,
            poll_timeout: poller_config.poll_timeout,
            status,
            timing: CycleTimingReporter::new(poller_config.cycle_period),
            poller_metrics: None,
            persistence_metrics: None,
        })
    }

    pub fn with_metrics(
        mut self,
        poller: Option<PollerMetrics>,
        persistence: Option<PersistenceMetrics>,
    ) -> Self {
        self.poller_metrics = poller;
        self.persistence_metrics = persistence;
        self
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    /// Execute one full cycle: fan out, join, persist, log.
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle = self.status.borrow().cycles_completed + 1;
        self.status
            .send_modify(|status| status.state = OrchestratorState::Polling);

        let started_at = Utc::now();
        let started = Instant::now();
        let targets = self.targets.targets();
        let mut fan_out = FanOut::with_capacity(targets.len());
        for (counter_id, address) in targets {
            let poller = self.poller.clone();
            let timeout = self.poll_timeout;
            fan_out.spawn(counter_id, async move {
                poller.poll(counter_id, &address, timeout).await
            });
        }
        let outcomes: Vec<PollOutcome> = fan_out
            .join()
            .await
            .into_iter()
            .map(|(counter_id, joined)| match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(counter_id = %counter_id, error = %err, "poll task failed");
                    PollOutcome::Failure(PollFailure::new(
                        counter_id,
                        FailureCause::Unreachable,
                        format!("poll task failed: {err}"),
                    ))
                }
            })
            .collect();
        let elapsed = started.elapsed();

        if let Some(metrics) = &self.poller_metrics {
            for outcome in &outcomes {
                metrics.record_outcome(outcome);
            }
            metrics.record_cycle(outcomes.len(), elapsed);
        }
        let report = CycleReport::new(cycle, started_at, elapsed, outcomes);
        let summary = self.dispatch(&report).await;
        drop(report);
        self.timing.record_duration(started.elapsed());

        info!(
            cycle,
            counters = summary.counters,
            successes = summary.successes,
            failures = summary.failures(),
            persistence_failures = summary.persistence_failures,
            elapsed_ms = summary.elapsed_ms,
            "poll cycle complete"
        );

        self.status.send_modify(|status| {
            status.state = OrchestratorState::Idle;
            status.cycles_completed = cycle;
            status.last_summary = Some(summary.clone());
        });
        summary
    }

    /// Persist successes one after another, then log failures.
    async fn dispatch(&self, report: &CycleReport) -> CycleSummary {
        let mut persistence_failures = 0usize;
        for reading in &report.successes {
            match self.sink.insert_reading(reading).await {
                Ok(()) => {
                    if let Some(metrics) = &self.persistence_metrics {
                        metrics.record_persisted();
                    }
                    debug!(
                        cycle = report.cycle,
                        counter_id = %reading.counter_id,
                        amps = reading.amps,
                        energy_kw = reading.energy_kw,
                        "reading persisted"
                    );
                }
                Err(err) => {
                    persistence_failures += 1;
                    if let Some(metrics) = &self.persistence_metrics {
                        metrics.record_failure(&err);
                    }
                    error!(
                        cycle = report.cycle,
                        counter_id = %reading.counter_id,
                        sink = self.sink.name(),
                        error = %err,
                        "persistence failure"
                    );
                }
            }
        }
        for failure in &report.failures {
            warn!(
                cycle = report.cycle,
                counter_id = %failure.counter_id,
                cause = %failure.cause,
                detail = %failure.detail,
                "poll failed"
            );
        }
        CycleSummary::from_report(report, persistence_failures)
    }

    /// Run cycles on the fixed schedule until the handle is shut down.
    pub fn start(self) -> OrchestratorHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let status = self.status.subscribe();
        info!(
            transport = self.poller.transport_kind(),
            sink = self.sink.name(),
            cycle_period_ms = duration_to_millis(self.cycle_period),
            poll_timeout_ms = duration_to_millis(self.poll_timeout),
            "poll cycle orchestrator started"
        );
        let task = tokio::spawn(self.run(shutdown_rx));
        OrchestratorHandle {
            shutdown: shutdown_tx,
            status,
            task,
        }
    }

    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut limiter = RateLimiter::aligned(self.cycle_period);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("orchestrator shutdown signal received");
                    break;
                }
                scheduled = limiter.tick() => {
                    let now = tokio::time::Instant::now();
                    self.timing.record_start(scheduled.into_std(), now.into_std());
                    let summary = self.run_cycle().await;
                    let elapsed = now.elapsed();
                    if self.timing.overran(elapsed) {
                        self.status.send_modify(|status| status.overruns += 1);
                        warn!(
                            cycle = summary.cycle,
                            elapsed_ms = duration_to_millis(elapsed),
                            poll_ms = summary.elapsed_ms,
                            start_drift_us = drift_us(scheduled.into_std(), now.into_std()),
                            "poll cycle overran its period; next boundary skipped"
                        );
                    }
                }
            }
        }

        if let Some(drift) = self.timing.start_drift().summary() {
            debug!(
                samples = drift.samples,
                mean_ns = drift.mean_ns,
                max_ns = drift.max_ns,
                "cycle start drift summary"
            );
        }
        if let Some(durations) = self.timing.durations().summary() {
            debug!(
                samples = durations.samples,
                mean_ms = durations.mean_ns / 1_000_000.0,
                max_ms = durations.max_ns / 1_000_000.0,
                "cycle duration summary"
            );
        }
        info!(
            cycles = self.status.borrow().cycles_completed,
            "poll cycle orchestrator stopped"
        );
    }
}

/// Control handle for a running orchestrator loop.
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown: broadcast::Sender<()>,
    status: watch::Receiver<OrchestratorStatus>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub fn state(&self) -> OrchestratorState {
        self.status.borrow().state
    }

    pub fn cycles_completed(&self) -> u64 {
        self.status.borrow().cycles_completed
    }

    pub fn last_summary(&self) -> Option<CycleSummary> {
        self.status.borrow().last_summary.clone()
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.clone()
    }

    /// Wait until at least `cycles` cycles have completed.
    pub async fn wait_for_cycles(&self, cycles: u64) -> Result<OrchestratorStatus> {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|status| status.cycles_completed >= cycles)
            .await?;
        Ok(reached.clone())
    }

    /// Stop after the in-flight cycle, if any, completes.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await?;
        Ok(())
    }
}
