//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Poll cycle behaviour against in-process counters."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use r_meter_common::config::{PollerConfig, RegistrationPolicy, SimulationConfig, TransportKind};
use r_meter_common::model::{AddressPlan, CounterId};
use r_meter_core::{OrchestratorState, PollCycleOrchestrator};
use r_meter_net::{EndpointPoller, InProcessTransport};
use r_meter_persistence::{MemoryStore, ReadingSink};
use r_meter_sim::CounterRegistry;

fn frozen() -> SimulationConfig {
    SimulationConfig {
        ticks_enabled: false,
        ..SimulationConfig::default()
    }
}

fn poller_config(timeout: Duration) -> PollerConfig {
    PollerConfig {
        cycle_period: Duration::from_secs(30),
        poll_timeout: timeout,
        transport: TransportKind::InProcess,
    }
}

#[tokio::test]
async fn unreachable_counter_is_reported_and_others_persisted() {
    let plan = AddressPlan::new("127.0.0.1", 9001, 3);
    let registry = Arc::new(CounterRegistry::spawn(plan.clone(), &frozen()));
    registry.remove(CounterId(2));
    let sink = Arc::new(MemoryStore::new(RegistrationPolicy::Auto));

    let orchestrator = PollCycleOrchestrator::new(
        Arc::new(plan),
        EndpointPoller::new(Arc::new(InProcessTransport::new(registry.clone()))),
        sink.clone(),
        &poller_config(Duration::from_secs(5)),
    )
    .unwrap();
    let summary = orchestrator.run_cycle().await;

    assert_eq!(summary.counters, 3);
    assert_eq!(summary.successes, 2);
    assert_eq!(summary.persisted, 2);
    assert_eq!(summary.unreachable, 1);
    assert_eq!(summary.failed_counters, vec![CounterId(2)]);
    assert_eq!(sink.len(), 2);
    assert!(sink.query_latest(CounterId(1)).await.unwrap().is_some());
    assert!(sink.query_latest(CounterId(2)).await.unwrap().is_none());
    assert!(sink.query_latest(CounterId(3)).await.unwrap().is_some());
    registry.shutdown().await;
}

#[tokio::test]
async fn frozen_counters_persist_identical_values_across_cycles() {
    let plan = AddressPlan::new("127.0.0.1", 9001, 4);
    let registry = Arc::new(CounterRegistry::spawn(plan, &frozen()));
    let sink = Arc::new(MemoryStore::new(RegistrationPolicy::Auto));
    let orchestrator = PollCycleOrchestrator::new(
        registry.clone(),
        EndpointPoller::new(Arc::new(InProcessTransport::new(registry.clone()))),
        sink.clone(),
        &poller_config(Duration::from_secs(5)),
    )
    .unwrap();

    orchestrator.run_cycle().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    orchestrator.run_cycle().await;

    let epoch = Utc.timestamp_opt(0, 0).unwrap();
    for id in 1..=4 {
        let history = sink
            .query_range(CounterId(id), epoch, Utc::now())
            .await
            .unwrap();
        assert_eq!(history.len(), 2, "counter {id}");
        assert_eq!(history[0].amps, history[1].amps);
        assert_eq!(history[0].energy_kw, history[1].energy_kw);
        assert!(history[0].timestamp < history[1].timestamp);
    }
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_counters_time_out_within_the_bound() {
    let plan = AddressPlan::new("127.0.0.1", 9001, 10);
    let registry = Arc::new(CounterRegistry::spawn(plan, &frozen()));
    let transport = InProcessTransport::new(registry.clone()).with_latency(Duration::from_secs(20));
    let sink = Arc::new(MemoryStore::new(RegistrationPolicy::Auto));
    let orchestrator = PollCycleOrchestrator::new(
        registry.clone(),
        EndpointPoller::new(Arc::new(transport)),
        sink.clone(),
        &poller_config(Duration::from_secs(2)),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    let summary = orchestrator.run_cycle().await;
    assert_eq!(summary.timeouts, 10);
    assert_eq!(summary.successes, 0);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert!(sink.is_empty());
    assert_eq!(orchestrator.status().state, OrchestratorState::Idle);
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn loop_keeps_polling_and_stops_between_cycles() {
    let plan = AddressPlan::new("127.0.0.1", 9001, 5);
    let registry = Arc::new(CounterRegistry::spawn(plan, &frozen()));
    let sink = Arc::new(MemoryStore::new(RegistrationPolicy::Auto));
    let handle = PollCycleOrchestrator::new(
        registry.clone(),
        EndpointPoller::new(Arc::new(InProcessTransport::new(registry.clone()))),
        sink.clone(),
        &poller_config(Duration::from_secs(5)),
    )
    .unwrap()
    .start();

    let status = handle.wait_for_cycles(2).await.unwrap();
    assert_eq!(status.last_summary.unwrap().successes, 5);
    assert_eq!(handle.state(), OrchestratorState::Idle);
    handle.shutdown().await.unwrap();
    assert_eq!(sink.len(), 10);
    registry.shutdown().await;
}
