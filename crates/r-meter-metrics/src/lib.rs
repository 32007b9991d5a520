//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use r_meter_common::model::{FailureCause, PollOutcome};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let addr = std_listener.local_addr()?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address. Differs from the requested one when port `0` was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "r_meterd_starts_total",
            "Total number of times the R-Meter daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_meterd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "r_meterd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

impl std::fmt::Debug for DaemonMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonMetrics").finish_non_exhaustive()
    }
}

/// Label used for successful polls in `r_meter_poll_outcomes_total`.
pub const OUTCOME_SUCCESS: &str = "success";

/// Poll-cycle instrumentation.
#[derive(Clone, Debug)]
pub struct PollerMetrics {
    cycles_total: IntCounter,
    outcomes: IntCounterVec,
    cycle_seconds: Histogram,
    counters_registered: IntGauge,
}

impl PollerMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles_total = IntCounter::with_opts(Opts::new(
            "r_meter_poll_cycles_total",
            "Number of completed poll cycles",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let outcomes = IntCounterVec::new(
            Opts::new(
                "r_meter_poll_outcomes_total",
                "Poll outcomes by result (success or failure cause)",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(outcomes.clone()))?;

        let buckets = prometheus::exponential_buckets(0.005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let cycle_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_meter_poll_cycle_seconds",
                "Wall time from fan-out to the last outcome of a cycle",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(cycle_seconds.clone()))?;

        let counters_registered = IntGauge::with_opts(Opts::new(
            "r_meter_counters_registered",
            "Counters enumerated by the last poll cycle",
        ))?;
        registry.register(Box::new(counters_registered.clone()))?;

        // Pre-create every label so scrapes show zeros before the first failure.
        outcomes.with_label_values(&[OUTCOME_SUCCESS]);
        for cause in FailureCause::ALL {
            outcomes.with_label_values(&[cause.as_str()]);
        }

        Ok(Self {
            cycles_total,
            outcomes,
            cycle_seconds,
            counters_registered,
        })
    }

    pub fn record_outcome(&self, outcome: &PollOutcome) {
        let label = outcome
            .failure_cause()
            .map(|cause| cause.as_str())
            .unwrap_or(OUTCOME_SUCCESS);
        self.outcomes.with_label_values(&[label]).inc();
    }

    pub fn record_cycle(&self, counters: usize, elapsed: Duration) {
        self.cycles_total.inc();
        self.counters_registered.set(counters as i64);
        self.cycle_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn cycles(&self) -> u64 {
        self.cycles_total.get()
    }

    pub fn outcome_count(&self, label: &str) -> u64 {
        self.outcomes.with_label_values(&[label]).get()
    }
}

pub use prometheus;
