//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Scrape test for the metrics exporter."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use r_meter_metrics::{new_registry, spawn_http_server, PollerMetrics};

#[tokio::test]
async fn metrics_endpoint_serves_poller_families() {
    let registry = new_registry();
    let metrics = PollerMetrics::new(registry.clone()).unwrap();
    metrics.record_cycle(100, Duration::from_millis(250));

    let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
    let body = reqwest::get(format!("http://{}/metrics", server.addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("r_meter_poll_cycles_total 1"));
    assert!(body.contains("r_meter_counters_registered 100"));
    assert!(body.contains(r#"r_meter_poll_outcomes_total{outcome="malformed_payload"} 0"#));
    server.shutdown().await.unwrap();
}
