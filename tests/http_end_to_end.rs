//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Integration and validation tests for the R-Meter stack."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use r_meter_common::config::{PollerConfig, RegistrationPolicy, SimulationConfig, TransportKind};
use r_meter_common::model::{AddressPlan, CounterAddress, CounterId};
use r_meter_core::PollCycleOrchestrator;
use r_meter_net::{EndpointPoller, HttpTransport};
use r_meter_persistence::{EventLogStore, ReadingSink};
use r_meter_sim::{serve_counter, CounterRegistry};
use tempfile::tempdir;

fn frozen() -> SimulationConfig {
    SimulationConfig {
        ticks_enabled: false,
        ..SimulationConfig::default()
    }
}

async fn closed_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counter_two_down_yields_two_inserts_and_one_unreachable() -> Result<()> {
    let registry = CounterRegistry::spawn(AddressPlan::new("127.0.0.1", 9001, 3), &frozen());
    let first = serve_counter(registry.get(CounterId(1)).unwrap(), "127.0.0.1", 0).await?;
    let third = serve_counter(registry.get(CounterId(3)).unwrap(), "127.0.0.1", 0).await?;
    let targets = vec![
        (CounterId(1), CounterAddress::new("127.0.0.1", first.local_addr().port())),
        (CounterId(2), CounterAddress::new("127.0.0.1", closed_port().await?)),
        (CounterId(3), CounterAddress::new("127.0.0.1", third.local_addr().port())),
    ];

    let dir = tempdir()?;
    let log_path = dir.path().join("readings.log");
    let store = Arc::new(EventLogStore::open(&log_path, RegistrationPolicy::Auto, None)?);
    let orchestrator = PollCycleOrchestrator::new(
        Arc::new(targets),
        EndpointPoller::new(Arc::new(HttpTransport::new()?)),
        store.clone(),
        &PollerConfig {
            cycle_period: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(5),
            transport: TransportKind::Http,
        },
    )?;

    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.counters, 3);
    assert_eq!(summary.persisted, 2);
    assert_eq!(summary.unreachable, 1);
    assert_eq!(summary.timeouts + summary.malformed, 0);
    assert_eq!(summary.failed_counters, vec![CounterId(2)]);
    assert_eq!(store.len(), 2);

    first.shutdown().await?;
    third.shutdown().await?;
    registry.shutdown().await;
    drop(orchestrator);
    drop(store);

    // The durable log replays the same two readings.
    let reopened = EventLogStore::open(&log_path, RegistrationPolicy::Auto, None)?;
    let epoch = Utc.timestamp_opt(0, 0).unwrap();
    for id in [1, 3] {
        let history = reopened.query_range(CounterId(id), epoch, Utc::now()).await?;
        assert_eq!(history.len(), 1, "counter {id}");
        assert_eq!(history[0].amps, 50.0);
        assert_eq!(history[0].energy_kw, 680.0);
    }
    assert!(!reopened.is_registered(CounterId(2)).await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ticking_counters_are_non_decreasing_across_cycles() -> Result<()> {
    let simulation = SimulationConfig {
        tick_period: Duration::from_millis(20),
        ..SimulationConfig::default()
    };
    let registry = CounterRegistry::spawn(AddressPlan::new("127.0.0.1", 9001, 2), &simulation);
    let mut servers = Vec::new();
    let mut targets = Vec::new();
    for id in registry.ids() {
        let server = serve_counter(registry.get(id).unwrap(), "127.0.0.1", 0).await?;
        targets.push((id, CounterAddress::new("127.0.0.1", server.local_addr().port())));
        servers.push(server);
    }

    let dir = tempdir()?;
    let store = Arc::new(EventLogStore::open(
        dir.path().join("readings.log"),
        RegistrationPolicy::Auto,
        None,
    )?);
    let orchestrator = PollCycleOrchestrator::new(
        Arc::new(targets),
        EndpointPoller::new(Arc::new(HttpTransport::new()?)),
        store.clone(),
        &PollerConfig {
            cycle_period: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(500),
            transport: TransportKind::Http,
        },
    )?;
    for _ in 0..4 {
        orchestrator.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    let epoch = Utc.timestamp_opt(0, 0).unwrap();
    for id in registry.ids() {
        let history = store.query_range(id, epoch, Utc::now()).await?;
        assert_eq!(history.len(), 4);
        for pair in history.windows(2) {
            assert!(pair[1].amps >= pair[0].amps);
            assert!(pair[1].energy_kw >= pair[0].energy_kw);
        }
        assert!(history[3].energy_kw > history[0].energy_kw);
    }

    for server in servers {
        server.shutdown().await?;
    }
    registry.shutdown().await;
    Ok(())
}
