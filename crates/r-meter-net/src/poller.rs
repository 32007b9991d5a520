//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bounded-latency poll of a single counter endpoint."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use r_meter_common::model::{
    CounterAddress, CounterId, CounterPayload, FailureCause, PollFailure, PollOutcome, PollReading,
};
use tracing::debug;

use crate::transport::CounterTransport;

/// Reasons a fetched body is rejected.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload does not decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("payload belongs to counter {found}, expected {expected}")]
    IdMismatch { expected: CounterId, found: u32 },
    #[error("field {field} is not a non-negative finite number: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Decode and validate a counter body. Every field of the wire shape is required.
pub fn decode_payload(expected: CounterId, body: &[u8]) -> Result<CounterPayload, PayloadError> {
    let payload: CounterPayload = serde_json::from_slice(body)?;
    if payload.id != expected.get() {
        return Err(PayloadError::IdMismatch {
            expected,
            found: payload.id,
        });
    }
    for (field, value) in [("A", payload.amps), ("kW", payload.energy_kw)] {
        if !value.is_finite() || value < 0.0 {
            return Err(PayloadError::OutOfRange { field, value });
        }
    }
    Ok(payload)
}

/// Issues one fetch per call through a [`CounterTransport`] and types the result.
#[derive(Clone)]
pub struct EndpointPoller {
    transport: Arc<dyn CounterTransport>,
}

impl std::fmt::Debug for EndpointPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPoller")
            .field("transport", &self.transport.kind())
            .finish()
    }
}

impl EndpointPoller {
    pub fn new(transport: Arc<dyn CounterTransport>) -> Self {
        Self { transport }
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Poll `address` once. Never waits longer than `timeout` and never retries.
    pub async fn poll(
        &self,
        counter_id: CounterId,
        address: &CounterAddress,
        timeout: Duration,
    ) -> PollOutcome {
        let body = match tokio::time::timeout(timeout, self.transport.fetch(address)).await {
            Err(_) => {
                return failure(
                    counter_id,
                    FailureCause::Timeout,
                    format!("no response from {address} within {}ms", timeout.as_millis()),
                )
            }
            Ok(Err(err)) => return failure(counter_id, FailureCause::Unreachable, err.to_string()),
            Ok(Ok(body)) => body,
        };

        match decode_payload(counter_id, &body) {
            Ok(payload) => {
                let reading = PollReading {
                    counter_id,
                    amps: payload.amps,
                    energy_kw: payload.energy_kw,
                    observed_at: Utc::now(),
                };
                debug!(
                    counter_id = %counter_id,
                    amps = reading.amps,
                    energy_kw = reading.energy_kw,
                    "counter polled"
                );
                PollOutcome::Success(reading)
            }
            Err(err) => failure(counter_id, FailureCause::MalformedPayload, err.to_string()),
        }
    }
}

fn failure(counter_id: CounterId, cause: FailureCause, detail: String) -> PollOutcome {
    PollOutcome::Failure(PollFailure::new(counter_id, cause, detail))
}
