//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transports used to fetch counter payloads."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use r_meter_common::model::CounterAddress;
use r_meter_sim::CounterRegistry;
use reqwest::Client;
use tracing::trace;
use url::Url;

/// Errors raised while fetching a raw payload from a counter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request never produced a response (refused, reset, DNS).
    #[error("counter at {address} unreachable: {message}")]
    Unreachable { address: String, message: String },
    /// The endpoint answered but not with a success status.
    #[error("counter at {address} answered with HTTP {status}")]
    Status { address: String, status: u16 },
    /// The address cannot be turned into a request URL.
    #[error("invalid counter address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },
    /// Nothing is registered behind the address.
    #[error("no counter registered at {0}")]
    NoSuchCounter(String),
    #[error("failed to encode counter payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("in-process transport requires local simulators")]
    NoRegistry,
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Fetches the raw state payload served by a counter. Validation is the poller's job.
#[async_trait]
pub trait CounterTransport: Send + Sync + 'static {
    /// Short label used in logs and config (`http`, `in-process`).
    fn kind(&self) -> &'static str;

    /// Perform exactly one fetch. Implementations must not retry.
    async fn fetch(&self, address: &CounterAddress) -> Result<Vec<u8>, TransportError>;
}

/// `GET http://host:port/get_current_state` over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().pool_idle_timeout(Duration::from_secs(90)).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CounterTransport for HttpTransport {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, address: &CounterAddress) -> Result<Vec<u8>, TransportError> {
        let url = Url::parse(&address.state_url()).map_err(|source| TransportError::InvalidAddress {
            address: address.to_string(),
            source,
        })?;
        let unreachable = |err: reqwest::Error| TransportError::Unreachable {
            address: address.to_string(),
            message: err.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(unreachable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(unreachable)?;
        trace!(address = %address, bytes = body.len(), "counter payload fetched");
        Ok(body.to_vec())
    }
}

/// Resolves addresses through the registry and asks the simulator actor directly.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    registry: Arc<CounterRegistry>,
    latency: Option<Duration>,
}

impl InProcessTransport {
    pub fn new(registry: Arc<CounterRegistry>) -> Self {
        Self {
            registry,
            latency: None,
        }
    }

    /// Delay every fetch by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl CounterTransport for InProcessTransport {
    fn kind(&self) -> &'static str {
        "in-process"
    }

    async fn fetch(&self, address: &CounterAddress) -> Result<Vec<u8>, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let handle = self
            .registry
            .resolve(address)
            .ok_or_else(|| TransportError::NoSuchCounter(address.to_string()))?;
        let state = handle
            .snapshot()
            .await
            .map_err(|err| TransportError::Unreachable {
                address: address.to_string(),
                message: err.to_string(),
            })?;
        Ok(serde_json::to_vec(&state.to_payload())?)
    }
}
