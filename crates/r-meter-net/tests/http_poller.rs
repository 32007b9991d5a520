//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Poller behaviour against real HTTP listeners."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use r_meter_common::model::{CounterAddress, CounterId, FailureCause, PollOutcome};
use r_meter_net::{EndpointPoller, HttpTransport};
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    address
}

fn serving(body: Value) -> Router {
    Router::new().route(
        "/get_current_state",
        get(move || {
            let body = body.clone();
            async move { Json(body) }
        }),
    )
}

fn poller() -> EndpointPoller {
    EndpointPoller::new(Arc::new(HttpTransport::new().unwrap()))
}

fn counter_address(address: SocketAddr) -> CounterAddress {
    CounterAddress::new(address.ip().to_string(), address.port())
}

#[tokio::test]
async fn polls_a_live_endpoint() {
    let address = spawn(serving(json!({"id": 5, "A": 55, "kW": 690}))).await;
    let outcome = poller()
        .poll(CounterId(5), &counter_address(address), Duration::from_secs(2))
        .await;
    let PollOutcome::Success(reading) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(reading.amps, 55.0);
    assert_eq!(reading.energy_kw, 690.0);
}

#[tokio::test]
async fn missing_kw_is_malformed() {
    let address = spawn(serving(json!({"id": 5, "A": 55}))).await;
    let outcome = poller()
        .poll(CounterId(5), &counter_address(address), Duration::from_secs(2))
        .await;
    assert_eq!(outcome.failure_cause(), Some(FailureCause::MalformedPayload));
}

#[tokio::test]
async fn error_status_is_unreachable() {
    let router = Router::new().route(
        "/get_current_state",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let address = spawn(router).await;
    let outcome = poller()
        .poll(CounterId(1), &counter_address(address), Duration::from_secs(2))
        .await;
    assert_eq!(outcome.failure_cause(), Some(FailureCause::Unreachable));
}

#[tokio::test]
async fn slow_endpoint_times_out_without_blocking() {
    let router = Router::new().route(
        "/get_current_state",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!({"id": 1, "A": 50, "kW": 680}))
        }),
    );
    let address = spawn(router).await;
    let started = Instant::now();
    let outcome = poller()
        .poll(CounterId(1), &counter_address(address), Duration::from_millis(200))
        .await;
    assert_eq!(outcome.failure_cause(), Some(FailureCause::Timeout));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    let outcome = poller()
        .poll(CounterId(1), &counter_address(address), Duration::from_secs(2))
        .await;
    assert_eq!(outcome.failure_cause(), Some(FailureCause::Unreachable));
}
