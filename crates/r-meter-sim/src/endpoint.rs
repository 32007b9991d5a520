//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP faces of the simulated counters."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use r_meter_common::model::CounterId;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::counter::CounterHandle;
use crate::registry::CounterRegistry;

/// Path every counter serves its current reading on.
pub const STATE_PATH: &str = "/get_current_state";

async fn current_state(State(handle): State<CounterHandle>) -> Response {
    match handle.snapshot().await {
        Ok(state) => Json(state.to_payload()).into_response(),
        Err(err) => {
            debug!(counter_id = %handle.id(), error = %err, "snapshot unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
    }
}

/// One listener serving a single counter.
#[derive(Debug)]
pub struct EndpointServer {
    counter_id: CounterId,
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl EndpointServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> Result<()> {
        let counter_id = self.counter_id;
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|join| anyhow::anyhow!("endpoint task for counter {counter_id}: {join}"))
    }
}

/// Serve `handle` on `host:port`. Port `0` binds an ephemeral port.
pub async fn serve_counter(handle: CounterHandle, host: &str, port: u16) -> Result<EndpointServer> {
    let counter_id = handle.id();
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind counter {counter_id} endpoint on {host}:{port}"))?;
    let address = listener.local_addr()?;

    let router = Router::new()
        .route(STATE_PATH, get(current_state))
        .with_state(handle);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = server.await {
            warn!(counter_id = %counter_id, error = %err, "counter endpoint exited with error");
        }
    });
    debug!(counter_id = %counter_id, address = %address, "counter endpoint listening");

    Ok(EndpointServer {
        counter_id,
        address,
        task,
        shutdown: shutdown_tx,
    })
}

/// The full farm of counter listeners, one per registered counter.
#[derive(Debug, Default)]
pub struct CounterEndpoints {
    servers: Vec<EndpointServer>,
}

impl CounterEndpoints {
    /// Bind every registered counter on its derived address. Already-bound
    /// listeners are shut down again if a later bind fails.
    pub async fn serve_all(registry: &CounterRegistry) -> Result<Self> {
        let mut endpoints = Self::default();
        for (id, address) in registry.targets() {
            let Some(handle) = registry.get(id) else {
                continue;
            };
            match serve_counter(handle, &address.host, address.port).await {
                Ok(server) => endpoints.servers.push(server),
                Err(err) => {
                    endpoints.shutdown().await?;
                    return Err(err);
                }
            }
        }
        info!(endpoints = endpoints.servers.len(), "counter endpoints listening");
        Ok(endpoints)
    }

    pub async fn shutdown(self) -> Result<()> {
        for server in self.servers {
            server.shutdown().await?;
        }
        Ok(())
    }
}
