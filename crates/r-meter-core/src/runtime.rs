//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Wiring of simulators, endpoints, store and orchestrator."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use r_meter_common::config::{AppConfig, TransportKind};
use r_meter_metrics::{spawn_http_server, MetricsServer, PollerMetrics, SharedRegistry};
use r_meter_net::{build_transport, EndpointPoller};
use r_meter_persistence::{open_store, PersistenceMetrics, ReadingSink};
use r_meter_sim::{CounterEndpoints, CounterRegistry};
use tracing::{info, warn};

use crate::orchestrator::{OrchestratorHandle, PollCycleOrchestrator};
use crate::report::CycleSummary;
use crate::targets::TargetSource;

/// Simulators plus, when configured, their HTTP listeners.
#[derive(Debug)]
pub struct CounterFarm {
    registry: Arc<CounterRegistry>,
    endpoints: Option<CounterEndpoints>,
}

impl CounterFarm {
    /// Spawn one simulator per configured counter and optionally serve them.
    pub async fn start(config: &AppConfig, serve_endpoints: bool) -> Result<Self> {
        let registry = Arc::new(CounterRegistry::spawn(
            config.address_plan(),
            &config.simulation,
        ));
        let endpoints = if serve_endpoints {
            match CounterEndpoints::serve_all(&registry).await {
                Ok(endpoints) => Some(endpoints),
                Err(err) => {
                    registry.shutdown().await;
                    return Err(err.context("failed to serve counter endpoints"));
                }
            }
        } else {
            None
        };
        Ok(Self {
            registry,
            endpoints,
        })
    }

    pub fn registry(&self) -> Arc<CounterRegistry> {
        self.registry.clone()
    }

    pub async fn shutdown(self) -> Result<()> {
        if let Some(endpoints) = self.endpoints {
            endpoints.shutdown().await?;
        }
        self.registry.shutdown().await;
        Ok(())
    }
}

/// Optional Prometheus wiring shared by the components of one process.
#[derive(Debug, Clone)]
pub struct RuntimeMetrics {
    pub registry: SharedRegistry,
    pub poller: PollerMetrics,
    pub persistence: PersistenceMetrics,
}

impl RuntimeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        Ok(Self {
            poller: PollerMetrics::new(registry.clone())?,
            persistence: PersistenceMetrics::new(registry.clone())?,
            registry,
        })
    }
}

/// Assemble an orchestrator from configuration. Targets always come from the
/// address plan, so a counter missing from the registry still gets polled and
/// reported as unreachable.
pub fn build_orchestrator(
    config: &AppConfig,
    registry: Option<Arc<CounterRegistry>>,
    sink: Arc<dyn ReadingSink>,
    metrics: Option<&RuntimeMetrics>,
) -> Result<PollCycleOrchestrator> {
    let targets: Arc<dyn TargetSource> = Arc::new(config.address_plan());
    let transport = build_transport(config.poller.transport, registry)
        .context("failed to build counter transport")?;
    let orchestrator = PollCycleOrchestrator::new(
        targets,
        EndpointPoller::new(transport),
        sink,
        &config.poller,
    )?;
    Ok(orchestrator.with_metrics(
        metrics.map(|metrics| metrics.poller.clone()),
        metrics.map(|metrics| metrics.persistence.clone()),
    ))
}

/// The full daemon: counter farm, store, orchestrator loop and metrics exporter.
#[derive(Debug)]
pub struct MeterRuntime {
    farm: Option<CounterFarm>,
    orchestrator: OrchestratorHandle,
    metrics_server: Option<MetricsServer>,
}

impl MeterRuntime {
    pub async fn start(config: &AppConfig, metrics_registry: Option<SharedRegistry>) -> Result<Self> {
        config.validate()?;
        let metrics = metrics_registry.map(RuntimeMetrics::new).transpose()?;

        let farm = if config.simulation.enabled {
            Some(CounterFarm::start(config, config.simulation.serve_endpoints).await?)
        } else {
            if config.poller.transport == TransportKind::InProcess {
                bail!("poller.transport = \"in-process\" requires simulation.enabled = true");
            }
            None
        };

        let sink = open_store(
            &config.storage,
            metrics.as_ref().map(|metrics| metrics.persistence.clone()),
        )
        .with_context(|| format!("failed to open {:?} store", config.storage.backend))?;
        let orchestrator = build_orchestrator(
            config,
            farm.as_ref().map(CounterFarm::registry),
            sink,
            metrics.as_ref(),
        )?
        .start();

        let metrics_server = match &metrics {
            Some(metrics) if config.metrics.enabled => Some(
                spawn_http_server(metrics.registry.clone(), config.metrics.listen)
                    .context("failed to start metrics exporter")?,
            ),
            _ => None,
        };

        info!(
            counters = config.counters.count,
            simulated = farm.is_some(),
            transport = ?config.poller.transport,
            "r-meter runtime started"
        );
        Ok(Self {
            farm,
            orchestrator,
            metrics_server,
        })
    }

    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }

    pub fn farm(&self) -> Option<&CounterFarm> {
        self.farm.as_ref()
    }

    /// Bound address of the Prometheus exporter, when one is running.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_server.as_ref().map(MetricsServer::addr)
    }

    /// Stop polling first so no cycle observes half-stopped counters.
    pub async fn shutdown(self) -> Result<()> {
        self.orchestrator.shutdown().await?;
        if let Some(farm) = self.farm {
            farm.shutdown().await?;
        }
        if let Some(server) = self.metrics_server {
            if let Err(err) = server.shutdown().await {
                warn!(error = %err, "metrics exporter did not shut down cleanly");
            }
        }
        info!("r-meter runtime stopped");
        Ok(())
    }
}

/// Run exactly one cycle. Local simulators are started only for the in-process
/// transport; the HTTP transport polls whatever is listening on the plan.
pub async fn poll_once(config: &AppConfig) -> Result<CycleSummary> {
    config.validate()?;
    let farm = match config.poller.transport {
        TransportKind::InProcess => Some(CounterFarm::start(config, false).await?),
        TransportKind::Http => None,
    };
    let sink = open_store(&config.storage, None)
        .with_context(|| format!("failed to open {:?} store", config.storage.backend))?;
    let orchestrator = build_orchestrator(
        config,
        farm.as_ref().map(CounterFarm::registry),
        sink,
        None,
    )?;
    let summary = orchestrator.run_cycle().await;
    if let Some(farm) = farm {
        farm.shutdown().await?;
    }
    Ok(summary)
}
